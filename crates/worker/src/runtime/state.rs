//! Worker lifecycle state machine

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

/// Lifecycle state of a [`WorkerRuntime`](crate::WorkerRuntime)
///
/// ```text
/// Idle ─► Starting ─► Running ─► Stopping ─► Stopped
///             │
///             └─► Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Constructed, not started
    Idle,
    /// Registering with the queue service
    Starting,
    /// Polling and executing jobs
    Running,
    /// Draining in-flight jobs
    Stopping,
    /// Deregistered, terminal
    Stopped,
    /// Registration failed, terminal
    Error,
}

impl LifecycleState {
    /// Whether `next` directly follows `self`
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Error)
                | (Running, Stopping)
                | (Stopping, Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Error)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Idle => write!(f, "idle"),
            LifecycleState::Starting => write!(f, "starting"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Stopping => write!(f, "stopping"),
            LifecycleState::Stopped => write!(f, "stopped"),
            LifecycleState::Error => write!(f, "error"),
        }
    }
}

/// Lifecycle state with compare-and-set transitions
///
/// Backed by a `watch` channel so callers can await a later state.
#[derive(Debug)]
pub(crate) struct StateCell {
    state: watch::Sender<LifecycleState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            state: watch::Sender::new(LifecycleState::Idle),
        }
    }

    pub(crate) fn get(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Move from `from` to `to`; fails with the actual state if the current
    /// state is not `from`
    pub(crate) fn transition(
        &self,
        from: LifecycleState,
        to: LifecycleState,
    ) -> Result<(), LifecycleState> {
        debug_assert!(from.can_transition_to(to));

        let mut outcome = Ok(());
        self.state.send_if_modified(|state| {
            if *state != from {
                outcome = Err(*state);
                return false;
            }
            *state = to;
            true
        });
        if outcome.is_ok() {
            debug!(%from, %to, "Worker state transition");
        }
        outcome
    }

    /// Wait until the state satisfies `done`, returning that state
    pub(crate) async fn wait_until(
        &self,
        done: impl Fn(LifecycleState) -> bool,
    ) -> LifecycleState {
        let mut rx = self.state.subscribe();
        let reached = rx.wait_for(|state| done(*state)).await.map(|state| *state);
        // The sender lives in `self`, so the channel cannot close here
        reached.unwrap_or_else(|_| self.get())
    }
}
