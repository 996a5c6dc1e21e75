//! Change events emitted on every workflow, execution and container transition
//!
//! Publishing is fire-and-forget: a sink never fails the operation that
//! produced the event, and a sink with nobody listening drops it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    WorkflowCreated,
    WorkflowUpdated,
    WorkflowDeleted,
    WorkflowStarted,
    WorkflowPaused,
    WorkflowError,
    WorkflowReset,
    WorkflowExecutionStarted,
    WorkflowExecutionCompleted,
    WorkflowExecutionFailed,
    WorkflowExecutionCancelled,
    ContainerCreated,
    ContainerStarting,
    ContainerRunning,
    ContainerStopping,
    ContainerStopped,
    ContainerRestarting,
    ContainerUpdated,
    ContainerDeleted,
    ContainerTransitionCancelled,
    IntegrationConnected,
    IntegrationUpdated,
    IntegrationDeleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::WorkflowCreated => "workflow-created",
            EventKind::WorkflowUpdated => "workflow-updated",
            EventKind::WorkflowDeleted => "workflow-deleted",
            EventKind::WorkflowStarted => "workflow-started",
            EventKind::WorkflowPaused => "workflow-paused",
            EventKind::WorkflowError => "workflow-error",
            EventKind::WorkflowReset => "workflow-reset",
            EventKind::WorkflowExecutionStarted => "workflow-execution-started",
            EventKind::WorkflowExecutionCompleted => "workflow-execution-completed",
            EventKind::WorkflowExecutionFailed => "workflow-execution-failed",
            EventKind::WorkflowExecutionCancelled => "workflow-execution-cancelled",
            EventKind::ContainerCreated => "container-created",
            EventKind::ContainerStarting => "container-starting",
            EventKind::ContainerRunning => "container-running",
            EventKind::ContainerStopping => "container-stopping",
            EventKind::ContainerStopped => "container-stopped",
            EventKind::ContainerRestarting => "container-restarting",
            EventKind::ContainerUpdated => "container-updated",
            EventKind::ContainerDeleted => "container-deleted",
            EventKind::ContainerTransitionCancelled => "container-transition-cancelled",
            EventKind::IntegrationConnected => "integration-connected",
            EventKind::IntegrationUpdated => "integration-updated",
            EventKind::IntegrationDeleted => "integration-deleted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// Owner of the subject record
    pub owner: String,
    /// Id of the workflow, execution, container or integration that changed
    pub subject: String,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        kind: EventKind,
        owner: impl Into<String>,
        subject: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            owner: owner.into(),
            subject: subject.into(),
            payload,
            at: Utc::now(),
        }
    }
}

/// Receives change events.
///
/// Services call `publish` after the change is persisted. Implementations
/// decide what to do with the event (broadcast, log, ignore).
pub trait EventSink: Send + Sync {
    fn publish(&self, event: Event);
}

/// Discards every event
#[derive(Debug, Clone, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn publish(&self, _event: Event) {}
}

/// Writes each event as a structured log line
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: Event) {
        tracing::info!(
            event = %event.kind,
            owner = %event.owner,
            subject = %event.subject,
            payload = %event.payload,
            "event"
        );
    }
}

/// Fans events out to any number of async subscribers.
///
/// Slow subscribers lag and lose the oldest events rather than holding up
/// the publisher.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<Event>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: Event) {
        // No receivers is not an error
        let _ = self.sender.send(event);
    }
}

/// Forwards every event to each inner sink in order
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn publish(&self, event: Event) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.publish(event.clone());
            }
            last.publish(event);
        }
    }
}

/// Keeps every event in memory for assertions
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink {
    events: std::sync::Mutex<Vec<Event>>,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(|e| e.kind).collect()
    }
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn publish(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&EventKind::WorkflowExecutionStarted).unwrap();
        assert_eq!(json, "\"workflow-execution-started\"");
        assert_eq!(
            EventKind::ContainerTransitionCancelled.to_string(),
            "container-transition-cancelled"
        );
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscribers() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();

        sink.publish(Event::new(
            EventKind::WorkflowStarted,
            "alice",
            "wf-1",
            json!({"from": "draft", "to": "active"}),
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::WorkflowStarted);
        assert_eq!(event.subject, "wf-1");
    }

    #[test]
    fn test_broadcast_without_subscribers_does_not_fail() {
        let sink = BroadcastSink::new(1);
        sink.publish(Event::new(EventKind::WorkflowCreated, "alice", "wf-1", json!({})));
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let first = Arc::new(RecordingSink::default());
        let second = Arc::new(RecordingSink::default());
        let fanout = FanoutSink::new()
            .with(first.clone())
            .with(Arc::new(NoopSink))
            .with(second.clone());

        fanout.publish(Event::new(EventKind::ContainerCreated, "alice", "c-1", json!({})));

        assert_eq!(first.kinds(), vec![EventKind::ContainerCreated]);
        assert_eq!(second.kinds(), vec![EventKind::ContainerCreated]);
    }
}
