//! Workflow and execution status transitions
//!
//! ```text
//!   draft ──start──▶ active ──pause──▶ paused
//!                      ▲                  │
//!                      └──────start───────┘
//!   any ──fail──▶ error ──reset──▶ draft
//!
//!   execution: running ──▶ completed | failed | cancelled
//! ```
//!
//! Functions here mutate records in place and never touch persistence or
//! events; on rejection the record is left exactly as it was.

use crate::error::{Entity, FlowError};
use crate::model::{Execution, ExecutionOutcome, ExecutionStatus, Workflow, WorkflowStatus};
use chrono::{DateTime, Utc};

/// Status-changing operations on a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowAction {
    Start,
    Pause,
    Fail,
    Reset,
}

impl WorkflowAction {
    pub fn verb(&self) -> &'static str {
        match self {
            WorkflowAction::Start => "start",
            WorkflowAction::Pause => "pause",
            WorkflowAction::Fail => "fail",
            WorkflowAction::Reset => "reset",
        }
    }
}

/// A status change that was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S> {
    pub from: S,
    pub to: S,
}

/// Target status for `action` from `current`, or `None` if not permitted
pub fn next_status(current: WorkflowStatus, action: WorkflowAction) -> Option<WorkflowStatus> {
    use WorkflowStatus::*;

    match (action, current) {
        (WorkflowAction::Start, Draft | Paused) => Some(Active),
        (WorkflowAction::Pause, Active) => Some(Paused),
        (WorkflowAction::Fail, _) => Some(Error),
        (WorkflowAction::Reset, Error) => Some(Draft),
        _ => None,
    }
}

/// Apply `action` to the workflow, updating `updated_at` on success.
///
/// `reason` is recorded as `last_error` for [`WorkflowAction::Fail`] and
/// ignored otherwise.
pub fn apply(
    workflow: &mut Workflow,
    action: WorkflowAction,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Transition<WorkflowStatus>, FlowError> {
    let from = workflow.status;
    let to = next_status(from, action).ok_or_else(|| {
        FlowError::invalid_transition(Entity::Workflow, &workflow.id, from, action.verb())
    })?;

    workflow.status = to;
    workflow.updated_at = now;

    match action {
        WorkflowAction::Start => {
            workflow.execution.next_run = workflow
                .schedule
                .as_ref()
                .and_then(|s| s.interval())
                .and_then(|interval| now.checked_add_signed(interval));
        }
        WorkflowAction::Pause => {
            workflow.execution.next_run = None;
        }
        WorkflowAction::Fail => {
            workflow.last_error = Some(reason.unwrap_or("unspecified failure").to_string());
            workflow.execution.next_run = None;
        }
        WorkflowAction::Reset => {
            workflow.last_error = None;
        }
    }

    Ok(Transition { from, to })
}

/// Fold a finished run into the workflow's counters. Status is not changed.
pub fn record_execution_result(
    workflow: &mut Workflow,
    outcome: &ExecutionOutcome,
    duration_ms: u64,
    now: DateTime<Utc>,
) {
    let stats = &mut workflow.execution;
    stats.total_runs += 1;
    if outcome.is_success() {
        stats.successful_runs += 1;
    } else {
        stats.failed_runs += 1;
    }
    stats.last_run = Some(now);

    // running mean over all recorded runs
    let n = stats.total_runs as f64;
    stats.average_run_time_ms += (duration_ms as f64 - stats.average_run_time_ms) / n;

    if workflow.status == WorkflowStatus::Active {
        stats.next_run = workflow
            .schedule
            .as_ref()
            .and_then(|s| s.interval())
            .and_then(|interval| now.checked_add_signed(interval));
    }

    workflow.updated_at = now;
}

/// Move a running execution to `completed` or `failed`
pub fn finish_execution(
    execution: &mut Execution,
    outcome: &ExecutionOutcome,
    duration_ms: u64,
    now: DateTime<Utc>,
) -> Result<Transition<ExecutionStatus>, FlowError> {
    let to = match outcome {
        ExecutionOutcome::Success => ExecutionStatus::Completed,
        ExecutionOutcome::Failure { .. } => ExecutionStatus::Failed,
    };
    let from = ensure_running(execution, if outcome.is_success() { "complete" } else { "fail" })?;

    execution.status = to;
    execution.completed_at = Some(now);
    execution.duration_ms = Some(duration_ms);
    match outcome {
        ExecutionOutcome::Success => execution.steps_completed = execution.steps_total,
        ExecutionOutcome::Failure { error } => execution.error = Some(error.clone()),
    }

    Ok(Transition { from, to })
}

/// Move a running execution to `cancelled`
pub fn cancel_execution(
    execution: &mut Execution,
    now: DateTime<Utc>,
) -> Result<Transition<ExecutionStatus>, FlowError> {
    let from = ensure_running(execution, "cancel")?;

    execution.status = ExecutionStatus::Cancelled;
    execution.completed_at = Some(now);
    execution.duration_ms = Some((now - execution.started_at).num_milliseconds().max(0) as u64);

    Ok(Transition {
        from,
        to: ExecutionStatus::Cancelled,
    })
}

fn ensure_running(
    execution: &Execution,
    action: &'static str,
) -> Result<ExecutionStatus, FlowError> {
    if execution.status.is_terminal() {
        return Err(FlowError::invalid_transition(
            Entity::Execution,
            &execution.id,
            execution.status,
            action,
        ));
    }
    Ok(execution.status)
}
