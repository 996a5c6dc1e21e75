//! Container supervisor - CRUD and simulated lifecycle for MCP containers

use super::lifecycle::{self, ContainerAction, mark_healthy};
use super::task::{PendingTransition, TransitionCompleter, TransitionOutcome};
use crate::config::ContainerConfig;
use crate::error::FlowError;
use crate::events::{Event, EventKind, EventSink};
use crate::locks::KeyedLocks;
use crate::model::{
    ContainerPatch, ContainerStatus, Endpoint, Health, LogEntry, McpContainer,
};
use crate::principal::Principal;
use crate::store::Store;
use crate::workflow::Transition;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Fields for a new container
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub image: String,
    /// Falls back to the configured default port
    pub port: Option<u16>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Result of a simulated connection test
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub success: bool,
    pub message: String,
    pub response_time_ms: u64,
    pub endpoints: Vec<Endpoint>,
    pub capabilities: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Result of a simulated command execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecResult {
    pub command: String,
    pub args: Vec<String>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    pub capabilities: Vec<String>,
    pub endpoints: Vec<Endpoint>,
    pub status: ContainerStatus,
    pub health: Health,
}

/// Container operations, scoped to the calling principal.
///
/// `start`, `stop` and `restart` return as soon as the container has entered
/// its transitional status; a background task settles it after the
/// configured delay unless the returned [`PendingTransition`] is cancelled
/// first.
#[derive(Clone)]
pub struct ContainerSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn Store>,
    events: Arc<dyn EventSink>,
    locks: KeyedLocks,
    /// In-flight transitions by container id
    pending: DashMap<String, PendingTransition>,
    config: ContainerConfig,
}

impl ContainerSupervisor {
    pub fn new(store: Arc<dyn Store>, events: Arc<dyn EventSink>, config: ContainerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                events,
                locks: KeyedLocks::new(),
                pending: DashMap::new(),
                config,
            }),
        }
    }

    pub async fn create(
        &self,
        principal: &Principal,
        spec: ContainerSpec,
    ) -> Result<McpContainer, FlowError> {
        if spec.name.trim().is_empty() || spec.image.trim().is_empty() {
            return Err(FlowError::InvalidRequest(
                "name and image are required".into(),
            ));
        }

        let port = spec.port.unwrap_or(self.inner.config.default_port);
        let mut container = McpContainer::new(principal.id(), spec.name, spec.image, port);
        container.description = spec.description;
        container.environment = spec.environment;
        container.capabilities = spec.capabilities;

        self.inner.store.insert_container(&container).await?;

        tracing::info!(
            container_id = %container.id,
            image = %container.image,
            port = container.port,
            "Created container"
        );
        self.inner.publish(
            EventKind::ContainerCreated,
            &container,
            json!({ "name": container.name, "status": container.status }),
        );
        Ok(container)
    }

    pub async fn get(&self, principal: &Principal, id: &str) -> Result<McpContainer, FlowError> {
        let mut container = self.inner.store.get_container(principal.id(), id).await?;
        container.health.uptime_secs = container.uptime_secs(Utc::now());
        Ok(container)
    }

    pub async fn list(&self, principal: &Principal) -> Result<Vec<McpContainer>, FlowError> {
        let now = Utc::now();
        let mut containers = self.inner.store.list_containers(principal.id()).await?;
        for container in &mut containers {
            container.health.uptime_secs = container.uptime_secs(now);
        }
        Ok(containers)
    }

    pub async fn update(
        &self,
        principal: &Principal,
        id: &str,
        patch: ContainerPatch,
    ) -> Result<McpContainer, FlowError> {
        let blank = |field: &Option<String>| field.as_deref().is_some_and(|v| v.trim().is_empty());
        if blank(&patch.name) || blank(&patch.image) {
            return Err(FlowError::InvalidRequest(
                "name and image must not be empty".into(),
            ));
        }

        let _guard = self.inner.locks.lock(id).await;
        let mut container = self.inner.store.get_container(principal.id(), id).await?;

        patch.apply(&mut container);
        if !container.endpoints.is_empty() {
            container.endpoints = container.default_endpoints();
        }
        container.touch();
        container.version = self.inner.store.update_container(&container).await?;

        tracing::info!(container_id = %container.id, "Updated container");
        self.inner.publish(
            EventKind::ContainerUpdated,
            &container,
            json!({ "name": container.name, "status": container.status }),
        );
        Ok(container)
    }

    /// Delete in any status; an in-flight transition is cancelled first
    pub async fn delete(&self, principal: &Principal, id: &str) -> Result<(), FlowError> {
        // 404 before touching anything
        self.inner.store.get_container(principal.id(), id).await?;

        if let Some(pending) = self.pending(id) {
            pending.cancel();
            pending.wait().await;
        }

        let guard = self.inner.locks.lock(id).await;
        let container = self.inner.store.get_container(principal.id(), id).await?;
        self.inner.store.delete_container(principal.id(), id).await?;
        drop(guard);
        self.inner.locks.forget(id);

        tracing::info!(container_id = %id, status = %container.status, "Deleted container");
        self.inner.publish(
            EventKind::ContainerDeleted,
            &container,
            json!({ "name": container.name, "status": container.status }),
        );
        Ok(())
    }

    /// `stopped` to `starting`, then `running` after the start delay
    pub async fn start(
        &self,
        principal: &Principal,
        id: &str,
    ) -> Result<PendingTransition, FlowError> {
        self.begin(principal, id, ContainerAction::Start).await
    }

    /// `running` to `stopping`, then `stopped` after the stop delay
    pub async fn stop(
        &self,
        principal: &Principal,
        id: &str,
    ) -> Result<PendingTransition, FlowError> {
        self.begin(principal, id, ContainerAction::Stop).await
    }

    /// `running` to `restarting`, then `running` after the restart delay
    pub async fn restart(
        &self,
        principal: &Principal,
        id: &str,
    ) -> Result<PendingTransition, FlowError> {
        self.begin(principal, id, ContainerAction::Restart).await
    }

    /// The in-flight transition of a container, if any
    pub fn pending(&self, id: &str) -> Option<PendingTransition> {
        self.inner.pending.get(id).map(|entry| entry.value().clone())
    }

    /// Cancel the in-flight transition of a container
    pub async fn cancel(
        &self,
        principal: &Principal,
        id: &str,
    ) -> Result<TransitionOutcome, FlowError> {
        self.inner.store.get_container(principal.id(), id).await?;
        let pending = self.pending(id).ok_or_else(|| {
            FlowError::InvalidRequest(format!("container '{}' has no transition in progress", id))
        })?;
        pending.cancel();
        Ok(pending.wait().await)
    }

    async fn begin(
        &self,
        principal: &Principal,
        id: &str,
        action: ContainerAction,
    ) -> Result<PendingTransition, FlowError> {
        let _guard = self.inner.locks.lock(id).await;
        let mut container = self.inner.store.get_container(principal.id(), id).await?;

        let Transition { from, to } = lifecycle::begin(&mut container, action, Utc::now())
            .inspect_err(|e| {
                tracing::debug!(container_id = %id, error = %e, "Rejected container transition");
            })?;
        container.version = self.inner.store.update_container(&container).await?;

        tracing::info!(
            container_id = %container.id,
            from = %from,
            to = %to,
            "Container transition started"
        );
        self.inner.publish(
            transition_event(to),
            &container,
            json!({ "from": from, "to": to }),
        );

        let (pending, completer) = PendingTransition::new(action, container);
        self.inner.pending.insert(id.to_string(), pending.clone());

        let inner = self.inner.clone();
        let owner = principal.id().to_string();
        let transition_id = pending.id();
        let container_id = id.to_string();
        let delay = self.inner.delay(action);
        tokio::spawn(async move {
            inner
                .drive(owner, container_id, transition_id, action, from, delay, completer)
                .await;
        });

        Ok(pending)
    }

    /// Canned log lines, newest last
    pub async fn logs(
        &self,
        principal: &Principal,
        id: &str,
        lines: usize,
    ) -> Result<Vec<LogEntry>, FlowError> {
        let container = self.inner.store.get_container(principal.id(), id).await?;
        let mut entries = canned_logs(&container);
        let keep = lines.min(self.inner.config.log_lines);
        let skip = entries.len().saturating_sub(keep);
        Ok(entries.split_off(skip))
    }

    /// Simulated connection test; marks the container healthy
    pub async fn test(&self, principal: &Principal, id: &str) -> Result<TestReport, FlowError> {
        let _guard = self.inner.locks.lock(id).await;
        let mut container = self.inner.store.get_container(principal.id(), id).await?;
        ensure_running(&container)?;

        let now = Utc::now();
        let response_time_ms = rand::rng().random_range(50..250);
        mark_healthy(&mut container, now);
        container.version = self.inner.store.update_container(&container).await?;

        tracing::debug!(container_id = %id, response_time_ms, "Container test passed");
        Ok(TestReport {
            success: true,
            message: "Connection test successful".into(),
            response_time_ms,
            endpoints: container.endpoints,
            capabilities: container.capabilities,
            timestamp: now,
        })
    }

    /// Simulated command execution
    pub async fn execute(
        &self,
        principal: &Principal,
        id: &str,
        command: &str,
        args: Vec<String>,
    ) -> Result<ExecResult, FlowError> {
        let container = self.inner.store.get_container(principal.id(), id).await?;
        ensure_running(&container)?;
        if command.trim().is_empty() {
            return Err(FlowError::InvalidRequest("command is required".into()));
        }

        let execution_time_ms = rand::rng().random_range(100..1100);
        tracing::debug!(container_id = %id, command, "Executed container command");
        Ok(ExecResult {
            command: command.to_string(),
            args,
            stdout: "Command executed successfully".into(),
            stderr: String::new(),
            exit_code: 0,
            execution_time_ms,
            timestamp: Utc::now(),
        })
    }

    pub async fn capabilities(
        &self,
        principal: &Principal,
        id: &str,
    ) -> Result<Capabilities, FlowError> {
        let container = self.get(principal, id).await?;
        Ok(Capabilities {
            capabilities: container.capabilities,
            endpoints: container.endpoints,
            status: container.status,
            health: container.health,
        })
    }
}

impl Inner {
    fn delay(&self, action: ContainerAction) -> Duration {
        match action {
            ContainerAction::Start => self.config.start_delay(),
            ContainerAction::Stop => self.config.stop_delay(),
            ContainerAction::Restart => self.config.restart_delay(),
        }
    }

    /// Wait out the delay, then settle or roll back under the container lock
    #[allow(clippy::too_many_arguments)]
    async fn drive(
        self: Arc<Self>,
        owner: String,
        id: String,
        transition_id: u64,
        action: ContainerAction,
        previous: ContainerStatus,
        delay: Duration,
        completer: TransitionCompleter,
    ) {
        tokio::select! {
            biased;
            _ = completer.token().cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }

        let guard = self.locks.lock(&id).await;

        // a cancel that lands while waiting for the lock still wins
        let outcome = if completer.token().is_cancelled() {
            match self.roll_back(&owner, &id, action, previous).await {
                Ok(container) => TransitionOutcome::Cancelled(container),
                Err(err) => TransitionOutcome::Failed(err.to_string()),
            }
        } else {
            match self.settle(&owner, &id, action).await {
                Ok(container) => TransitionOutcome::Completed(container),
                Err(err) => TransitionOutcome::Failed(err.to_string()),
            }
        };

        if let TransitionOutcome::Failed(reason) = &outcome {
            tracing::warn!(container_id = %id, action = action.verb(), reason = %reason, "Container transition failed");
        }

        self.pending
            .remove_if(&id, |_, pending| pending.id() == transition_id);
        drop(guard);
        completer.finish(outcome);
    }

    async fn settle(
        &self,
        owner: &str,
        id: &str,
        action: ContainerAction,
    ) -> Result<McpContainer, FlowError> {
        let mut container = self.store.get_container(owner, id).await?;
        let Transition { from, to } = lifecycle::complete(&mut container, action, Utc::now())?;
        container.version = self.store.update_container(&container).await?;

        tracing::info!(
            container_id = %id,
            from = %from,
            to = %to,
            runtime_id = container.runtime_id.as_deref().unwrap_or("-"),
            "Container transition completed"
        );
        self.publish(
            transition_event(to),
            &container,
            json!({ "from": from, "to": to, "runtime_id": container.runtime_id }),
        );
        Ok(container)
    }

    async fn roll_back(
        &self,
        owner: &str,
        id: &str,
        action: ContainerAction,
        previous: ContainerStatus,
    ) -> Result<McpContainer, FlowError> {
        let mut container = self.store.get_container(owner, id).await?;
        if let Some(Transition { from, to }) =
            lifecycle::roll_back(&mut container, action, previous, Utc::now())
        {
            container.version = self.store.update_container(&container).await?;

            tracing::info!(
                container_id = %id,
                action = action.verb(),
                from = %from,
                to = %to,
                "Container transition cancelled"
            );
            self.publish(
                EventKind::ContainerTransitionCancelled,
                &container,
                json!({ "action": action.verb(), "from": from, "to": to }),
            );
        }
        Ok(container)
    }

    fn publish(&self, kind: EventKind, container: &McpContainer, payload: serde_json::Value) {
        self.events
            .publish(Event::new(kind, &container.owner, &container.id, payload));
    }
}

fn transition_event(status: ContainerStatus) -> EventKind {
    match status {
        ContainerStatus::Starting => EventKind::ContainerStarting,
        ContainerStatus::Running => EventKind::ContainerRunning,
        ContainerStatus::Stopping => EventKind::ContainerStopping,
        ContainerStatus::Stopped => EventKind::ContainerStopped,
        ContainerStatus::Restarting => EventKind::ContainerRestarting,
    }
}

fn ensure_running(container: &McpContainer) -> Result<(), FlowError> {
    if container.status != ContainerStatus::Running {
        return Err(FlowError::NotRunning {
            id: container.id.clone(),
        });
    }
    Ok(())
}

fn canned_logs(container: &McpContainer) -> Vec<LogEntry> {
    let entry = |at: DateTime<Utc>, level: &str, message: String| LogEntry {
        timestamp: at,
        level: level.to_string(),
        message,
    };

    let created = container.created_at;
    let mut entries = vec![entry(
        created,
        "info",
        format!("Container created from image {}", container.image),
    )];

    if let Some(started) = container.started_at {
        entries.push(entry(started, "info", "Container started successfully".into()));
        entries.push(entry(
            started,
            "info",
            format!("MCP server listening on port {}", container.port),
        ));
        entries.push(entry(started, "info", "API endpoints initialized".into()));
        if let Some(checked) = container.health.last_check {
            entries.push(entry(checked, "debug", "Health check passed".into()));
        }
    }

    if container.status.is_transitional() || container.status == ContainerStatus::Stopped {
        entries.push(entry(
            container.updated_at,
            "info",
            format!("Container is {}", container.status),
        ));
    }

    entries
}
