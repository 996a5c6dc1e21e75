//! Error types for flowdeck

use crate::store::StoreError;
use crate::workflow::{Issue, IssueKind};
use std::fmt;
use thiserror::Error;

/// Kind of record a transition was attempted on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Workflow,
    Execution,
    Container,
    Integration,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Workflow => "workflow",
            Entity::Execution => "execution",
            Entity::Container => "container",
            Entity::Integration => "integration",
        })
    }
}

/// Errors surfaced by the workflow, container and integration services
#[derive(Debug, Error)]
pub enum FlowError {
    // Rejected state changes - the record is left untouched
    #[error("cannot {action} {entity} '{id}' while it is {from}")]
    InvalidTransition {
        entity: Entity,
        id: String,
        from: String,
        action: &'static str,
    },

    #[error("workflow failed validation with {} error(s)", count_errors(.issues))]
    ValidationFailed { issues: Vec<Issue> },

    #[error("container '{id}' is not running")]
    NotRunning { id: String },

    // Bad input
    #[error("invalid workflow definition: {}", .errors.join("; "))]
    InvalidDefinition { errors: Vec<String> },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{entity} already exists: {key}")]
    AlreadyExists { entity: Entity, key: String },

    // Passed through from persistence
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn count_errors(issues: &[Issue]) -> usize {
    issues.iter().filter(|i| i.kind == IssueKind::Error).count()
}

impl FlowError {
    pub fn invalid_transition(
        entity: Entity,
        id: impl Into<String>,
        from: impl fmt::Display,
        action: &'static str,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            id: id.into(),
            from: from.to_string(),
            action,
        }
    }

    /// True for errors caused by the caller rather than the environment
    pub fn is_client_error(&self) -> bool {
        match self {
            FlowError::Store(err) => {
                err.is_not_found() || matches!(err, StoreError::AlreadyExists(_))
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_display() {
        let err = FlowError::invalid_transition(Entity::Workflow, "wf-1", "active", "start");
        assert_eq!(
            err.to_string(),
            "cannot start workflow 'wf-1' while it is active"
        );
    }

    #[test]
    fn test_validation_failed_counts_errors_only() {
        let err = FlowError::ValidationFailed {
            issues: vec![
                Issue::error("Workflow must have at least one trigger", None),
                Issue::warning("Workflow should have at least one action", None),
            ],
        };
        assert_eq!(
            err.to_string(),
            "workflow failed validation with 1 error(s)"
        );
    }

    #[test]
    fn test_client_errors() {
        assert!(FlowError::InvalidRequest("missing command".into()).is_client_error());
        assert!(FlowError::Store(StoreError::NotFound("wf-1".into())).is_client_error());
        assert!(
            !FlowError::Store(StoreError::Conflict {
                id: "wf-1".into(),
                expected: 1,
                actual: 2
            })
            .is_client_error()
        );
    }
}
