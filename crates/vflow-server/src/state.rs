//! The server's forward-only lifecycle (spec §4.7.1).
//!
//! ```text
//! Initialized → Listening | Stopping
//! Listening   → Listening | Serving   | Stopping
//! Serving     → Publishing             | Stopping
//! Publishing  → Publishing             | Stopping
//! Stopping    → Stopped
//! ```
//!
//! Calling any state-transition method out of order fails with `BadState`.

use vflow_core::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Initialized,
    Listening,
    Serving,
    Publishing,
    Stopping,
    Stopped,
}

impl ServerState {
    /// Whether `self -> next` is one of the edges spec §4.7.1 allows.
    fn can_advance_to(self, next: ServerState) -> bool {
        use ServerState::*;
        matches!(
            (self, next),
            (Initialized, Listening)
                | (Initialized, Stopping)
                | (Listening, Listening)
                | (Listening, Serving)
                | (Listening, Stopping)
                | (Serving, Publishing)
                | (Serving, Stopping)
                | (Publishing, Publishing)
                | (Publishing, Stopping)
                | (Stopping, Stopped)
        )
    }
}

/// Guards the state machine behind a single mutex (spec §5 "each VIF,
/// VC, Server and Namespace instance holds a single mutex protecting
/// its collections").
pub struct ServerStateMachine {
    current: parking_lot::Mutex<ServerState>,
}

impl ServerStateMachine {
    pub fn new() -> Self {
        Self {
            current: parking_lot::Mutex::new(ServerState::Initialized),
        }
    }

    pub fn current(&self) -> ServerState {
        *self.current.lock()
    }

    /// Attempts the transition; fails with `BadState` on an illegal edge
    /// (spec §4.7.1 "calling any state-transition method out of order
    /// fails with `ErrBadState`"). "Already-stopping" calls into
    /// `Stopping` are tolerated as idempotent no-ops (spec §4.7.6
    /// "already-stopping calls return nil"). The full idempotent-`Stop`
    /// guarantee (a call after the server has reached `Stopped`) is
    /// handled one layer up by `Server::stop`, which short-circuits
    /// before ever calling this transition — see spec §8 "`Stop(S)`
    /// idempotent — second call returns nil without blocking".
    pub fn transition(&self, next: ServerState) -> Result<()> {
        let mut current = self.current.lock();
        if *current == next && next == ServerState::Stopping {
            return Ok(());
        }
        if !current.can_advance_to(next) {
            return Err(Error::bad_state(format!(
                "cannot transition server from {current:?} to {next:?}"
            )));
        }
        *current = next;
        Ok(())
    }
}

impl Default for ServerStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_only_path_succeeds() {
        let sm = ServerStateMachine::new();
        sm.transition(ServerState::Listening).unwrap();
        sm.transition(ServerState::Serving).unwrap();
        sm.transition(ServerState::Publishing).unwrap();
        sm.transition(ServerState::Publishing).unwrap();
        sm.transition(ServerState::Stopping).unwrap();
        sm.transition(ServerState::Stopped).unwrap();
        assert_eq!(sm.current(), ServerState::Stopped);
    }

    #[test]
    fn skipping_ahead_is_bad_state() {
        let sm = ServerStateMachine::new();
        assert!(sm.transition(ServerState::Serving).is_err());
    }

    #[test]
    fn backward_transition_is_bad_state() {
        let sm = ServerStateMachine::new();
        sm.transition(ServerState::Listening).unwrap();
        sm.transition(ServerState::Serving).unwrap();
        assert!(sm.transition(ServerState::Listening).is_err());
    }

    #[test]
    fn repeated_stop_is_idempotent() {
        let sm = ServerStateMachine::new();
        sm.transition(ServerState::Stopping).unwrap();
        sm.transition(ServerState::Stopping).unwrap();
    }
}
