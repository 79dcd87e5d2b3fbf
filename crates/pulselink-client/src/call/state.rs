use std::fmt;

/// Call lifecycle. `Ended` and `Failed` are terminal for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    Idle,
    Connecting,
    Ringing,
    Connected,
    Ended,
    Failed,
}

impl CallState {
    pub fn as_str(self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Connecting => "connecting",
            CallState::Ringing => "ringing",
            CallState::Connected => "connected",
            CallState::Ended => "ended",
            CallState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }

    /// A session exists and holds (or is acquiring) resources.
    pub fn is_active(self) -> bool {
        matches!(self, CallState::Connecting | CallState::Ringing | CallState::Connected)
    }

    pub fn can_transition_to(self, next: CallState) -> bool {
        use CallState::*;
        match (self, next) {
            (Idle, Connecting) | (Idle, Ringing) => true,
            // caller: connecting -> ringing once the offer is out;
            // callee: ringing -> connecting once accepted
            (Connecting, Ringing) | (Ringing, Connecting) => true,
            (Connecting, Connected) | (Ringing, Connected) => true,
            (from, Ended) | (from, Failed) => from.is_active(),
            _ => false,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallRole {
    Caller,
    Callee,
}

impl CallRole {
    pub fn as_str(self) -> &'static str {
        match self {
            CallRole::Caller => "caller",
            CallRole::Callee => "callee",
        }
    }
}
