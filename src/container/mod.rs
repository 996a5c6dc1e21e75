//! Simulated MCP containers
//!
//! No process is ever launched. Status changes go through
//! [`lifecycle`] and settle after configurable delays driven by
//! [`ContainerSupervisor`].

pub mod lifecycle;
mod supervisor;
mod task;

pub use lifecycle::ContainerAction;
pub use supervisor::{Capabilities, ContainerSpec, ContainerSupervisor, ExecResult, TestReport};
pub use task::{PendingTransition, TransitionOutcome};
