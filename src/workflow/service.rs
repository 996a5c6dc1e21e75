//! Workflow service - CRUD, status transitions and execution records

use super::state_machine::{self, Transition, WorkflowAction};
use super::validator::{ValidationReport, validate_steps};
use crate::config::WorkflowDefinition;
use crate::error::FlowError;
use crate::events::{Event, EventKind, EventSink};
use crate::locks::KeyedLocks;
use crate::model::{
    Execution, ExecutionOutcome, ExecutionStatus, Settings, Workflow, WorkflowStatus,
};
use crate::principal::Principal;
use crate::store::{Page, Store, WorkflowQuery};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Dashboard counters over all of a principal's workflows
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowStats {
    pub total: usize,
    pub draft: usize,
    pub active: usize,
    pub paused: usize,
    pub error: usize,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
}

impl WorkflowStats {
    /// Share of recorded runs that succeeded, 0.0 when nothing ran yet
    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.successful_runs as f64 / self.total_runs as f64
        }
    }
}

/// Workflow operations, scoped to the calling principal.
///
/// Every read-modify-write runs under the workflow's per-id lock, and the
/// store's version check backs that up across processes.
pub struct WorkflowService {
    store: Arc<dyn Store>,
    events: Arc<dyn EventSink>,
    locks: KeyedLocks,
    defaults: Settings,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn Store>, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            events,
            locks: KeyedLocks::new(),
            defaults: Settings::default(),
        }
    }

    /// Settings for definitions that leave them unset
    pub fn with_defaults(mut self, defaults: Settings) -> Self {
        self.defaults = defaults;
        self
    }

    pub async fn create(
        &self,
        principal: &Principal,
        definition: WorkflowDefinition,
    ) -> Result<Workflow, FlowError> {
        let workflow = definition.into_workflow(principal.id(), &self.defaults)?;
        self.store.insert_workflow(&workflow).await?;

        tracing::info!(
            workflow_id = %workflow.id,
            owner = %workflow.owner,
            steps = workflow.steps.len(),
            "Created workflow"
        );
        self.publish(
            EventKind::WorkflowCreated,
            &workflow,
            json!({ "name": workflow.name, "status": workflow.status }),
        );
        Ok(workflow)
    }

    pub async fn get(&self, principal: &Principal, id: &str) -> Result<Workflow, FlowError> {
        Ok(self.store.get_workflow(principal.id(), id).await?)
    }

    pub async fn list(
        &self,
        principal: &Principal,
        query: &WorkflowQuery,
    ) -> Result<Page<Workflow>, FlowError> {
        Ok(self.store.list_workflows(principal.id(), query).await?)
    }

    /// Replace the editable fields; status and run counters are kept
    pub async fn update(
        &self,
        principal: &Principal,
        id: &str,
        definition: WorkflowDefinition,
    ) -> Result<Workflow, FlowError> {
        let _guard = self.locks.lock(id).await;
        let mut workflow = self.store.get_workflow(principal.id(), id).await?;

        definition.apply_to(&mut workflow, &self.defaults)?;
        workflow.touch();
        workflow.version = self.store.update_workflow(&workflow).await?;

        tracing::info!(workflow_id = %workflow.id, version = workflow.version, "Updated workflow");
        self.publish(
            EventKind::WorkflowUpdated,
            &workflow,
            json!({ "name": workflow.name, "status": workflow.status }),
        );
        Ok(workflow)
    }

    /// Delete in any status
    pub async fn delete(&self, principal: &Principal, id: &str) -> Result<(), FlowError> {
        let guard = self.locks.lock(id).await;
        let workflow = self.store.get_workflow(principal.id(), id).await?;
        self.store.delete_workflow(principal.id(), id).await?;
        drop(guard);
        self.locks.forget(id);

        tracing::info!(workflow_id = %id, "Deleted workflow");
        self.publish(
            EventKind::WorkflowDeleted,
            &workflow,
            json!({ "name": workflow.name, "status": workflow.status }),
        );
        Ok(())
    }

    /// `draft`/`paused` to `active`, refused while the step graph has errors
    pub async fn start(&self, principal: &Principal, id: &str) -> Result<Workflow, FlowError> {
        self.transition(principal, id, WorkflowAction::Start, None).await
    }

    /// `active` to `paused`
    pub async fn pause(&self, principal: &Principal, id: &str) -> Result<Workflow, FlowError> {
        self.transition(principal, id, WorkflowAction::Pause, None).await
    }

    /// Any status to `error`, recording `reason`
    pub async fn fail(
        &self,
        principal: &Principal,
        id: &str,
        reason: &str,
    ) -> Result<Workflow, FlowError> {
        self.transition(principal, id, WorkflowAction::Fail, Some(reason))
            .await
    }

    /// `error` back to `draft`
    pub async fn reset(&self, principal: &Principal, id: &str) -> Result<Workflow, FlowError> {
        self.transition(principal, id, WorkflowAction::Reset, None).await
    }

    pub async fn validate(
        &self,
        principal: &Principal,
        id: &str,
    ) -> Result<ValidationReport, FlowError> {
        let workflow = self.store.get_workflow(principal.id(), id).await?;
        Ok(validate_steps(&workflow.steps))
    }

    async fn transition(
        &self,
        principal: &Principal,
        id: &str,
        action: WorkflowAction,
        reason: Option<&str>,
    ) -> Result<Workflow, FlowError> {
        let _guard = self.locks.lock(id).await;
        let mut workflow = self.store.get_workflow(principal.id(), id).await?;

        if action == WorkflowAction::Start {
            // an illegal start is reported as such even when the graph is also bad
            if state_machine::next_status(workflow.status, action).is_some() {
                let report = validate_steps(&workflow.steps);
                if !report.valid {
                    tracing::warn!(
                        workflow_id = %workflow.id,
                        errors = report.errors().count(),
                        "Refusing to start workflow with validation errors"
                    );
                    return Err(FlowError::ValidationFailed {
                        issues: report.issues,
                    });
                }
            }
        }

        let Transition { from, to } =
            state_machine::apply(&mut workflow, action, reason, Utc::now()).inspect_err(|e| {
                tracing::debug!(workflow_id = %id, error = %e, "Rejected workflow transition");
            })?;
        workflow.version = self.store.update_workflow(&workflow).await?;

        tracing::info!(
            workflow_id = %workflow.id,
            from = %from,
            to = %to,
            "Workflow transition"
        );

        let kind = match action {
            WorkflowAction::Start => EventKind::WorkflowStarted,
            WorkflowAction::Pause => EventKind::WorkflowPaused,
            WorkflowAction::Fail => EventKind::WorkflowError,
            WorkflowAction::Reset => EventKind::WorkflowReset,
        };
        let mut payload = json!({ "from": from, "to": to });
        if let Some(error) = workflow.last_error.as_deref().filter(|_| to == WorkflowStatus::Error)
        {
            payload["error"] = json!(error);
        }
        self.publish(kind, &workflow, payload);

        Ok(workflow)
    }

    /// Record a manual run. Not gated on status.
    pub async fn execute(
        &self,
        principal: &Principal,
        id: &str,
        input: serde_json::Value,
    ) -> Result<Execution, FlowError> {
        let _guard = self.locks.lock(id).await;
        let workflow = self.store.get_workflow(principal.id(), id).await?;

        let execution = Execution::start(&workflow.id, principal.id(), workflow.steps.len(), input);
        self.store.insert_execution(&execution).await?;

        tracing::info!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            status = %workflow.status,
            "Started workflow execution"
        );
        self.events.publish(Event::new(
            EventKind::WorkflowExecutionStarted,
            &execution.owner,
            &execution.id,
            json!({ "workflow_id": workflow.id, "steps_total": execution.steps_total }),
        ));
        Ok(execution)
    }

    /// Finish a running execution and fold the result into the workflow's
    /// counters. `duration_ms` defaults to the time since the run started.
    pub async fn complete_execution(
        &self,
        principal: &Principal,
        execution_id: &str,
        outcome: ExecutionOutcome,
        duration_ms: Option<u64>,
    ) -> Result<Execution, FlowError> {
        let workflow_id = self
            .store
            .get_execution(principal.id(), execution_id)
            .await?
            .workflow_id;

        // workflow before execution, always
        let workflow_guard = self.locks.lock(&workflow_id).await;
        let execution_guard = self.locks.lock(execution_id).await;
        let finished = self
            .finish_locked(principal, &workflow_id, execution_id, outcome, duration_ms)
            .await;
        drop(execution_guard);
        drop(workflow_guard);
        // runs only move to a terminal status, so the id is never locked again
        self.locks.forget(execution_id);
        finished
    }

    async fn finish_locked(
        &self,
        principal: &Principal,
        workflow_id: &str,
        execution_id: &str,
        outcome: ExecutionOutcome,
        duration_ms: Option<u64>,
    ) -> Result<Execution, FlowError> {
        let mut execution = self.store.get_execution(principal.id(), execution_id).await?;
        let now = Utc::now();
        let duration_ms = duration_ms
            .unwrap_or_else(|| (now - execution.started_at).num_milliseconds().max(0) as u64);

        let transition = state_machine::finish_execution(&mut execution, &outcome, duration_ms, now)?;
        execution.version = self.store.update_execution(&execution).await?;

        // the workflow may have been deleted while the run was in flight
        match self.store.get_workflow(principal.id(), workflow_id).await {
            Ok(mut workflow) => {
                state_machine::record_execution_result(&mut workflow, &outcome, duration_ms, now);
                self.store.update_workflow(&workflow).await?;
            }
            Err(err) if err.is_not_found() => {
                tracing::warn!(
                    workflow_id = %workflow_id,
                    execution_id = %execution_id,
                    "Execution finished after its workflow was deleted"
                );
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(
            workflow_id = %workflow_id,
            execution_id = %execution.id,
            status = %transition.to,
            duration_ms,
            "Finished workflow execution"
        );

        let kind = match transition.to {
            ExecutionStatus::Completed => EventKind::WorkflowExecutionCompleted,
            _ => EventKind::WorkflowExecutionFailed,
        };
        self.events.publish(Event::new(
            kind,
            &execution.owner,
            &execution.id,
            json!({
                "workflow_id": workflow_id,
                "status": execution.status,
                "duration_ms": duration_ms,
                "error": execution.error,
            }),
        ));
        Ok(execution)
    }

    /// Cancel a running execution. Cancelled runs are not counted.
    pub async fn cancel_execution(
        &self,
        principal: &Principal,
        execution_id: &str,
    ) -> Result<Execution, FlowError> {
        let workflow_id = self
            .store
            .get_execution(principal.id(), execution_id)
            .await?
            .workflow_id;

        let workflow_guard = self.locks.lock(&workflow_id).await;
        let execution_guard = self.locks.lock(execution_id).await;
        let cancelled = async {
            let mut execution = self.store.get_execution(principal.id(), execution_id).await?;
            state_machine::cancel_execution(&mut execution, Utc::now())?;
            execution.version = self.store.update_execution(&execution).await?;
            Ok::<_, FlowError>(execution)
        }
        .await;
        drop(execution_guard);
        drop(workflow_guard);
        self.locks.forget(execution_id);
        let execution = cancelled?;

        tracing::info!(
            workflow_id = %workflow_id,
            execution_id = %execution.id,
            "Cancelled workflow execution"
        );
        self.events.publish(Event::new(
            EventKind::WorkflowExecutionCancelled,
            &execution.owner,
            &execution.id,
            json!({ "workflow_id": workflow_id }),
        ));
        Ok(execution)
    }

    pub async fn get_execution(
        &self,
        principal: &Principal,
        execution_id: &str,
    ) -> Result<Execution, FlowError> {
        Ok(self.store.get_execution(principal.id(), execution_id).await?)
    }

    /// Runs of one workflow, newest first
    pub async fn executions(
        &self,
        principal: &Principal,
        id: &str,
        page: usize,
        limit: usize,
    ) -> Result<Page<Execution>, FlowError> {
        // 404 for a workflow the principal cannot see
        self.store.get_workflow(principal.id(), id).await?;
        Ok(self
            .store
            .list_executions(principal.id(), id, page, limit)
            .await?)
    }

    pub async fn stats(&self, principal: &Principal) -> Result<WorkflowStats, FlowError> {
        let workflows = self
            .store
            .list_workflows(principal.id(), &WorkflowQuery::all())
            .await?;

        let mut stats = WorkflowStats {
            total: workflows.total,
            ..Default::default()
        };
        for workflow in &workflows.items {
            match workflow.status {
                WorkflowStatus::Draft => stats.draft += 1,
                WorkflowStatus::Active => stats.active += 1,
                WorkflowStatus::Paused => stats.paused += 1,
                WorkflowStatus::Error => stats.error += 1,
            }
            stats.total_runs += workflow.execution.total_runs;
            stats.successful_runs += workflow.execution.successful_runs;
            stats.failed_runs += workflow.execution.failed_runs;
        }
        Ok(stats)
    }

    fn publish(&self, kind: EventKind, workflow: &Workflow, payload: serde_json::Value) {
        self.events
            .publish(Event::new(kind, &workflow.owner, &workflow.id, payload));
    }
}
