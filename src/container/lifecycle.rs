//! Container status transitions
//!
//! ```text
//!   stopped ──start──▶ starting ──(delay)──▶ running
//!   running ──stop───▶ stopping ──(delay)──▶ stopped
//!   running ─restart─▶ restarting ─(delay)─▶ running
//! ```
//!
//! A transition happens in two halves: [`begin`] moves the container into the
//! transitional status, [`complete`] settles it. While a container is in a
//! transitional status no other transition may begin.

use crate::error::{Entity, FlowError};
use crate::model::{ContainerStatus, HealthStatus, McpContainer};
use crate::workflow::Transition;
use chrono::{DateTime, Utc};
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerAction {
    Start,
    Stop,
    Restart,
}

impl ContainerAction {
    pub fn verb(&self) -> &'static str {
        match self {
            ContainerAction::Start => "start",
            ContainerAction::Stop => "stop",
            ContainerAction::Restart => "restart",
        }
    }

    /// Status held while the action is in flight
    pub fn transitional(&self) -> ContainerStatus {
        match self {
            ContainerAction::Start => ContainerStatus::Starting,
            ContainerAction::Stop => ContainerStatus::Stopping,
            ContainerAction::Restart => ContainerStatus::Restarting,
        }
    }

    /// Status the action settles in
    pub fn settled(&self) -> ContainerStatus {
        match self {
            ContainerAction::Start | ContainerAction::Restart => ContainerStatus::Running,
            ContainerAction::Stop => ContainerStatus::Stopped,
        }
    }

    fn allowed_from(&self) -> ContainerStatus {
        match self {
            ContainerAction::Start => ContainerStatus::Stopped,
            ContainerAction::Stop | ContainerAction::Restart => ContainerStatus::Running,
        }
    }
}

/// Enter the transitional status for `action`
pub fn begin(
    container: &mut McpContainer,
    action: ContainerAction,
    now: DateTime<Utc>,
) -> Result<Transition<ContainerStatus>, FlowError> {
    let from = container.status;
    if from != action.allowed_from() {
        return Err(FlowError::invalid_transition(
            Entity::Container,
            &container.id,
            from,
            action.verb(),
        ));
    }

    let to = action.transitional();
    container.status = to;
    container.updated_at = now;
    Ok(Transition { from, to })
}

/// Settle a transition begun with [`begin`]
pub fn complete(
    container: &mut McpContainer,
    action: ContainerAction,
    now: DateTime<Utc>,
) -> Result<Transition<ContainerStatus>, FlowError> {
    let from = container.status;
    if from != action.transitional() {
        return Err(FlowError::invalid_transition(
            Entity::Container,
            &container.id,
            from,
            "complete",
        ));
    }

    let to = action.settled();
    container.status = to;
    container.updated_at = now;

    match action {
        ContainerAction::Start => {
            container.runtime_id = Some(runtime_id());
            container.endpoints = container.default_endpoints();
            container.started_at = Some(now);
            mark_healthy(container, now);
        }
        ContainerAction::Restart => {
            if container.runtime_id.is_none() {
                container.runtime_id = Some(runtime_id());
            }
            if container.endpoints.is_empty() {
                container.endpoints = container.default_endpoints();
            }
            container.started_at = Some(now);
            mark_healthy(container, now);
        }
        ContainerAction::Stop => {
            container.runtime_id = None;
            container.endpoints.clear();
            container.started_at = None;
            container.health.status = HealthStatus::Unknown;
            container.health.uptime_secs = 0;
        }
    }

    Ok(Transition { from, to })
}

/// Undo a transition begun with [`begin`], restoring `previous`.
///
/// Returns `None` when the container is no longer in the action's
/// transitional status (it already settled, or something else moved it).
pub fn roll_back(
    container: &mut McpContainer,
    action: ContainerAction,
    previous: ContainerStatus,
    now: DateTime<Utc>,
) -> Option<Transition<ContainerStatus>> {
    let from = container.status;
    if from != action.transitional() {
        return None;
    }
    container.status = previous;
    container.updated_at = now;
    Some(Transition { from, to: previous })
}

pub(crate) fn mark_healthy(container: &mut McpContainer, now: DateTime<Utc>) {
    container.health.status = HealthStatus::Healthy;
    container.health.last_check = Some(now);
    container.health.uptime_secs = container.uptime_secs(now);
}

/// `mcp_` followed by 8 hex digits
fn runtime_id() -> String {
    format!("mcp_{:08x}", rand::rng().random::<u32>())
}
