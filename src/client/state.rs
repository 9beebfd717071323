//! Connection state tracking for the monitor client
//!
//! The state machine accepts any transition; legality against the active
//! user intent is judged by the supervisory layer. Observers are notified
//! through a watch channel, exactly once per value-changing mutation.

use tokio::sync::watch;
use tracing::debug;

/// Connection state of the monitor client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Undefined,
    Created,
    Disconnected,
    Connecting,
    ConnectFailed,
    Connected,
    ConnectionLost,
    DisconnectFailed,
}

/// Tracks the client connection state and notifies an observer on change.
///
/// All mutation goes through [`set_state`](Self::set_state); the owning
/// context is single-threaded, so no locking is involved.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    observer: watch::Sender<ConnectionState>,
}

impl ConnectionStateMachine {
    /// Create a state machine in the `Created` state, returning the observer
    /// side of the state channel.
    pub fn new() -> (Self, watch::Receiver<ConnectionState>) {
        let (observer, rx) = watch::channel(ConnectionState::Created);
        (
            Self {
                state: ConnectionState::Created,
                observer,
            },
            rx,
        )
    }

    /// Current state; pure read.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_state(&self, state: ConnectionState) -> bool {
        self.state == state
    }

    /// Additional observer handle for the state channel
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.observer.subscribe()
    }

    /// Apply a transition. The transition is always logged; the observer is
    /// notified only when the value actually changes, after the state field
    /// has been updated.
    pub fn set_state(&mut self, new_state: ConnectionState) {
        let old_state = self.state;
        debug!(from = ?old_state, to = ?new_state, "Connection state transition");
        self.state = new_state;

        if old_state != new_state {
            let _ = self.observer.send(new_state);
        }
    }
}
