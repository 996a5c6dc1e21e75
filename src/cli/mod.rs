//! CLI module for flowdeck
//!
//! This module provides:
//! - Command implementations (validate, workflow, container, integration)
//! - Output handlers (console, JSON, quiet)
//! - Signal handling so Ctrl-C rolls back an in-flight container transition
//!
//! # Example
//!
//! ```ignore
//! use flowdeck::cli::{commands, output};
//!
//! let handler = output::create_handler(output::OutputMode::Console, false);
//! let exit_code = commands::validate_definition(path, &*handler)?;
//! ```

pub mod commands;
pub mod output;
pub mod signals;

pub use commands::{
    ContainerCommand, Context, IntegrationCommand, WorkflowCommand, run_container,
    run_integration, run_workflow, validate_definition,
};
pub use output::{OutputMode, create_handler};
pub use signals::setup_signal_handlers;
