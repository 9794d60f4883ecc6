use std::{fmt, sync::Arc};

use picteus_protocol::ExtensionError;
use tokio::sync::watch;

/// Lifecycle of one extension instance. States are never re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Created,
    Initializing,
    Ready,
    Terminating,
    Terminated,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
        }
    }

    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Initializing)
                | (Self::Created, Self::Terminated)
                | (Self::Initializing, Self::Ready)
                | (Self::Initializing, Self::Terminated)
                | (Self::Ready, Self::Terminating)
                | (Self::Terminating, Self::Terminated)
        )
    }

    fn is_starting(&self) -> bool {
        matches!(self, Self::Created | Self::Initializing)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, observable lifecycle state.
#[derive(Debug, Clone)]
pub struct LifecycleTracker {
    state: Arc<watch::Sender<LifecycleState>>,
}

impl Default for LifecycleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleTracker {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Created);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn current(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn transition(&self, next: LifecycleState) -> Result<(), ExtensionError> {
        let mut rejected_from = None;
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                rejected_from = Some(*current);
                false
            }
        });
        match rejected_from {
            None => {
                tracing::debug!(state = %next, "extension lifecycle transition");
                Ok(())
            }
            Some(from) => Err(ExtensionError::Lifecycle {
                from: from.to_string(),
                to: next.to_string(),
            }),
        }
    }

    /// Waits until start-up is over; returns true when the instance reached `Ready`.
    pub async fn wait_until_ready(&self) -> bool {
        let mut receiver = self.state.subscribe();
        let ready = match receiver.wait_for(|state| !state.is_starting()).await {
            Ok(state) => *state == LifecycleState::Ready,
            Err(_) => false,
        };
        ready
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn unit_happy_path_transitions_are_allowed() {
        let tracker = LifecycleTracker::new();
        for next in [
            LifecycleState::Initializing,
            LifecycleState::Ready,
            LifecycleState::Terminating,
            LifecycleState::Terminated,
        ] {
            tracker.transition(next).expect("allowed transition");
        }
        assert_eq!(tracker.current(), LifecycleState::Terminated);
    }

    #[test]
    fn regression_states_are_never_reentered() {
        let tracker = LifecycleTracker::new();
        tracker
            .transition(LifecycleState::Initializing)
            .expect("initializing");
        tracker.transition(LifecycleState::Ready).expect("ready");
        let error = tracker
            .transition(LifecycleState::Ready)
            .expect_err("ready twice");
        assert_eq!(
            error,
            ExtensionError::Lifecycle {
                from: "ready".to_string(),
                to: "ready".to_string()
            }
        );
        assert!(tracker.transition(LifecycleState::Initializing).is_err());
        assert_eq!(tracker.current(), LifecycleState::Ready);
    }

    #[test]
    fn unit_bootstrap_failure_skips_ready() {
        let tracker = LifecycleTracker::new();
        tracker
            .transition(LifecycleState::Initializing)
            .expect("initializing");
        tracker
            .transition(LifecycleState::Terminated)
            .expect("bootstrap failure");
        assert!(tracker.transition(LifecycleState::Terminating).is_err());
    }

    #[tokio::test]
    async fn functional_wait_until_ready_observes_later_transition() {
        let tracker = LifecycleTracker::new();
        let waiter = tracker.clone();
        let waiting = tokio::spawn(async move { waiter.wait_until_ready().await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        tracker
            .transition(LifecycleState::Initializing)
            .expect("initializing");
        tracker.transition(LifecycleState::Ready).expect("ready");
        assert!(waiting.await.expect("join"));
    }

    #[tokio::test]
    async fn regression_wait_until_ready_returns_false_after_failed_start() {
        let tracker = LifecycleTracker::new();
        tracker
            .transition(LifecycleState::Terminated)
            .expect("terminated");
        assert!(!tracker.wait_until_ready().await);
    }
}
