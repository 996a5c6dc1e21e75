//! Handle on a delayed container transition

use super::lifecycle::ContainerAction;
use crate::cancel::CancellationToken;
use crate::model::McpContainer;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

static NEXT_TRANSITION_ID: AtomicU64 = AtomicU64::new(1);

/// How a delayed transition ended
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The container settled; holds the settled record
    Completed(McpContainer),
    /// Cancelled before settling; holds the rolled-back record
    Cancelled(McpContainer),
    /// The completion step could not be applied
    Failed(String),
}

impl TransitionOutcome {
    pub fn container(&self) -> Option<&McpContainer> {
        match self {
            TransitionOutcome::Completed(c) | TransitionOutcome::Cancelled(c) => Some(c),
            TransitionOutcome::Failed(_) => None,
        }
    }
}

/// A transition that has begun and will settle after a delay.
///
/// Clones share the same underlying transition: cancelling any clone
/// cancels it, and every clone observes the same outcome.
#[derive(Debug, Clone)]
pub struct PendingTransition {
    id: u64,
    action: ContainerAction,
    container: McpContainer,
    token: CancellationToken,
    outcome: watch::Receiver<Option<TransitionOutcome>>,
}

/// Producer side, held by the task that drives the transition
pub(crate) struct TransitionCompleter {
    token: CancellationToken,
    sender: watch::Sender<Option<TransitionOutcome>>,
}

impl PendingTransition {
    /// `container` is the record as it looked when the transition began
    pub(crate) fn new(
        action: ContainerAction,
        container: McpContainer,
    ) -> (Self, TransitionCompleter) {
        let token = CancellationToken::new();
        let (sender, receiver) = watch::channel(None);
        let pending = Self {
            id: NEXT_TRANSITION_ID.fetch_add(1, Ordering::Relaxed),
            action,
            container,
            token: token.clone(),
            outcome: receiver,
        };
        (pending, TransitionCompleter { token, sender })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn action(&self) -> ContainerAction {
        self.action
    }

    pub fn container_id(&self) -> &str {
        &self.container.id
    }

    /// The container in its transitional status
    pub fn container(&self) -> &McpContainer {
        &self.container
    }

    /// Ask for the transition to be rolled back. Has no effect once it has
    /// settled.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Wait for the transition to settle or be cancelled
    pub async fn wait(&self) -> TransitionOutcome {
        let mut outcome = self.outcome.clone();
        loop {
            let current = outcome.borrow_and_update().clone();
            if let Some(result) = current {
                return result;
            }
            if outcome.changed().await.is_err() {
                let last = outcome.borrow().clone();
                return last.unwrap_or_else(|| {
                    TransitionOutcome::Failed("transition task ended without an outcome".into())
                });
            }
        }
    }
}

impl TransitionCompleter {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn finish(self, outcome: TransitionOutcome) {
        // waiters may all be gone
        let _ = self.sender.send(Some(outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContainerStatus;

    fn pending() -> (PendingTransition, TransitionCompleter) {
        let mut container = McpContainer::new("user-1", "files", "mcp/files", 8080);
        container.status = ContainerStatus::Starting;
        PendingTransition::new(ContainerAction::Start, container)
    }

    #[tokio::test]
    async fn test_every_clone_sees_outcome() {
        let (pending, completer) = pending();
        let other = pending.clone();
        assert!(!pending.is_finished());

        let mut settled = pending.container().clone();
        settled.status = ContainerStatus::Running;
        completer.finish(TransitionOutcome::Completed(settled.clone()));

        assert_eq!(pending.wait().await, TransitionOutcome::Completed(settled.clone()));
        assert_eq!(other.wait().await, TransitionOutcome::Completed(settled));
        assert!(other.is_finished());
    }

    #[tokio::test]
    async fn test_cancel_reaches_completer() {
        let (pending, completer) = pending();
        pending.clone().cancel();
        assert!(completer.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_completer_fails_waiters() {
        let (pending, completer) = pending();
        drop(completer);
        assert!(matches!(pending.wait().await, TransitionOutcome::Failed(_)));
    }

    #[test]
    fn test_ids_are_unique() {
        let (a, _) = pending();
        let (b, _) = pending();
        assert_ne!(a.id(), b.id());
    }
}
