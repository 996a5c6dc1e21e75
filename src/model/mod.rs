//! Domain records

mod container;
mod execution;
mod integration;
mod workflow;

pub use container::{
    ContainerPatch, ContainerStatus, Endpoint, Health, HealthStatus, LogEntry, McpContainer,
};
pub use execution::{Execution, ExecutionOutcome, ExecutionStatus};
pub use integration::{
    CredentialKind, Credentials, Integration, IntegrationStatus, SyncStatus, UsageStats,
};
pub(crate) use workflow::{MAX_INTERVAL_DAYS, parse_interval};
pub use workflow::{
    OnError, Position, Schedule, ScheduleKind, Settings, Step, StepType, Workflow,
    WorkflowStatus,
};
