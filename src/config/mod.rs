//! Configuration types and loading for flowdeck

mod loader;
mod workflow;

pub use loader::{ContainerConfig, FlowdeckConfig, load_definition};
pub use workflow::{SettingsDefinition, StepDefinition, WorkflowDefinition};
