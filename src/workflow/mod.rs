//! Workflows: status state machine, step graph, validator and service
//!
//! This module handles:
//! - Workflow status transitions (`draft`, `active`, `paused`, `error`)
//! - Execution status transitions (`running` to a terminal status)
//! - Graph view over step connections
//! - Step-graph validation with typed findings
//!
//! # Example
//!
//! ```ignore
//! use flowdeck::workflow::WorkflowService;
//!
//! let service = WorkflowService::new(store, events);
//! let workflow = service.create(&principal, definition).await?;
//! let workflow = service.start(&principal, &workflow.id).await?;
//! ```

mod graph;
mod service;
pub mod state_machine;
mod validator;

pub use service::WorkflowService;
pub use state_machine::Transition;
pub use validator::{Issue, IssueKind, ValidationReport, validate_steps};
