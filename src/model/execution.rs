//! Execution records for manual workflow runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a single execution
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reported result of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success,
    Failure { error: String },
}

impl ExecutionOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }
}

/// One run of a workflow
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub owner: String,
    pub status: ExecutionStatus,

    #[serde(default)]
    pub input: serde_json::Value,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub steps_completed: usize,
    pub steps_total: usize,
    pub error: Option<String>,

    #[serde(default)]
    pub version: u64,
}

impl Execution {
    pub fn start(
        workflow_id: impl Into<String>,
        owner: impl Into<String>,
        steps_total: usize,
        input: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            owner: owner.into(),
            status: ExecutionStatus::Running,
            input,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            steps_completed: 0,
            steps_total,
            error: None,
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_starts_running() {
        let exec = Execution::start("wf-1", "user-1", 3, serde_json::Value::Null);
        assert_eq!(exec.status, ExecutionStatus::Running);
        assert_eq!(exec.steps_total, 3);
        assert!(exec.completed_at.is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }
}
