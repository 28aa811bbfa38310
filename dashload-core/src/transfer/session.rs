//! Streaming session lifecycle as a pure state machine.

use serde::Serialize;

/// Lifecycle of one client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    AwaitingConnect,
    Streaming,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    pub fn name(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingConnect => "awaiting-connect",
            SessionState::Streaming => "streaming",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        }
    }
}

/// Inputs that drive a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Start time reached.
    Start,
    /// Transport connection established.
    Connected,
    /// The outstanding chunk finished downloading.
    ChunkCompleted,
    /// Transport closed or reset.
    ConnectionClosed,
    /// Stop time reached.
    Stop,
}

/// Work the host performs after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEffect {
    OpenConnection,
    /// Pick a bitrate and release the next request per the adaptation decision.
    RequestNextChunk,
    /// Cancel the drain, release and dump timers owned by the session.
    CancelTimers,
    CloseConnection,
    ReportFailure,
}

/// Applies `event` to `state`.
///
/// Events that have no meaning in the current state leave it unchanged and
/// produce no effects. Terminal states absorb everything.
pub fn transition(state: SessionState, event: SessionEvent) -> (SessionState, Vec<SessionEffect>) {
    use SessionEffect::*;
    use SessionEvent::*;

    match (state, event) {
        (SessionState::Idle, Start) => (SessionState::AwaitingConnect, vec![OpenConnection]),
        (SessionState::Idle, Stop) => (SessionState::Completed, vec![]),
        (SessionState::AwaitingConnect, Connected) => {
            (SessionState::Streaming, vec![RequestNextChunk])
        }
        (SessionState::Streaming, ChunkCompleted) => {
            (SessionState::Streaming, vec![RequestNextChunk])
        }
        (SessionState::AwaitingConnect | SessionState::Streaming, ConnectionClosed) => {
            (SessionState::Failed, vec![CancelTimers, ReportFailure])
        }
        (SessionState::AwaitingConnect | SessionState::Streaming, Stop) => {
            (SessionState::Completed, vec![CancelTimers, CloseConnection])
        }
        (state, _) => (state, vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let (state, effects) = transition(SessionState::Idle, SessionEvent::Start);
        assert_eq!(state, SessionState::AwaitingConnect);
        assert_eq!(effects, vec![SessionEffect::OpenConnection]);

        let (state, effects) = transition(state, SessionEvent::Connected);
        assert_eq!(state, SessionState::Streaming);
        assert_eq!(effects, vec![SessionEffect::RequestNextChunk]);

        let (state, effects) = transition(state, SessionEvent::ChunkCompleted);
        assert_eq!(state, SessionState::Streaming);
        assert_eq!(effects, vec![SessionEffect::RequestNextChunk]);

        let (state, effects) = transition(state, SessionEvent::Stop);
        assert_eq!(state, SessionState::Completed);
        assert_eq!(
            effects,
            vec![SessionEffect::CancelTimers, SessionEffect::CloseConnection]
        );
    }

    #[test]
    fn test_connection_close_fails_session() {
        let (state, effects) = transition(SessionState::Streaming, SessionEvent::ConnectionClosed);
        assert_eq!(state, SessionState::Failed);
        assert!(effects.contains(&SessionEffect::CancelTimers));
        assert!(state.is_terminal());
    }

    #[test]
    fn test_terminal_states_absorb_events() {
        for state in [SessionState::Completed, SessionState::Failed] {
            for event in [
                SessionEvent::Start,
                SessionEvent::Connected,
                SessionEvent::ChunkCompleted,
                SessionEvent::ConnectionClosed,
                SessionEvent::Stop,
            ] {
                assert_eq!(transition(state, event), (state, vec![]));
            }
        }
    }

    #[test]
    fn test_completion_before_streaming_is_ignored() {
        let (state, effects) = transition(SessionState::Idle, SessionEvent::ChunkCompleted);
        assert_eq!(state, SessionState::Idle);
        assert!(effects.is_empty());
    }
}
