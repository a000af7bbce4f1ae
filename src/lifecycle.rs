//! Connection lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Connected <-> Reconnecting
//!                                   |              |
//!                                   +--> Draining -+--> Closed
//!                                   +--------------+--> Closed
//! ```
//!
//! Transports report state changes here; components watch it to learn about
//! non-recoverable closes.

use std::fmt;

use tokio::sync::watch;
use tracing::debug;

use crate::{NyftError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Draining,
    Closed,
}

impl ConnectionState {
    /// Whether `next` is reachable from `self` in one step
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Closed)
                | (Connected, Reconnecting)
                | (Reconnecting, Connected)
                | (Connected, Draining)
                | (Reconnecting, Draining)
                | (Connected, Closed)
                | (Reconnecting, Closed)
                | (Draining, Closed)
        )
    }

    pub fn is_closed(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Draining => "draining",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Observable connection state of one transport
#[derive(Debug)]
pub struct Lifecycle {
    tx: watch::Sender<ConnectionState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    pub fn state(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Move to `next`. Re-entering the current state is a no-op; an illegal
    /// transition is rejected and leaves the state untouched.
    pub fn transition(&self, next: ConnectionState) -> Result<()> {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                outcome = Err(NyftError::InvalidTransition {
                    from: *current,
                    to: next,
                });
                return false;
            }
            debug!(from = %current, to = %next, "connection state changed");
            *current = next;
            true
        });
        outcome
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Resolves once the state reaches `Closed`
    pub async fn closed(&self) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so this cannot fail while borrowed.
        let _ = rx.wait_for(|state| state.is_closed()).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_happy_path_transitions() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), Disconnected);

        for next in [Connecting, Connected, Reconnecting, Connected, Draining, Closed] {
            lifecycle.transition(next).expect("legal transition");
            assert_eq!(lifecycle.state(), next);
        }
    }

    #[test]
    fn test_rejects_illegal_transitions() {
        let lifecycle = Lifecycle::new();

        let err = lifecycle.transition(Connected).unwrap_err();
        assert!(matches!(
            err,
            NyftError::InvalidTransition {
                from: Disconnected,
                to: Connected
            }
        ));
        assert_eq!(lifecycle.state(), Disconnected);

        lifecycle.transition(Connecting).unwrap();
        lifecycle.transition(Closed).unwrap();
        assert!(lifecycle.transition(Connected).is_err());
        assert!(lifecycle.transition(Draining).is_err());
        assert_eq!(lifecycle.state(), Closed);
    }

    #[test]
    fn test_same_state_is_noop() {
        let lifecycle = Lifecycle::new();
        lifecycle.transition(Disconnected).unwrap();
        lifecycle.transition(Connecting).unwrap();
        lifecycle.transition(Connecting).unwrap();
        assert_eq!(lifecycle.state(), Connecting);
    }

    #[tokio::test]
    async fn test_closed_resolves_after_close() {
        let lifecycle = std::sync::Arc::new(Lifecycle::new());
        lifecycle.transition(Connecting).unwrap();
        lifecycle.transition(Connected).unwrap();

        let watcher = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.closed().await })
        };

        lifecycle.transition(Closed).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), watcher)
            .await
            .expect("closed() should resolve")
            .unwrap();
    }
}
