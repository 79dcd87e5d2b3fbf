use std::fmt;

/// Envelope type (the `type` field on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeType {
    Connect,
    Disconnect,
    Message,
    Typing,
    Read,
    Presence,
    Location,
    Proximity,
    CallOffer,
    CallAnswer,
    CallIceCandidate,
    CallDeclined,
    CallEnded,
    GenericNotification,
}

impl EnvelopeType {
    /// Every envelope type, in wire-table order.
    pub const ALL: [EnvelopeType; 14] = [
        EnvelopeType::Connect,
        EnvelopeType::Disconnect,
        EnvelopeType::Message,
        EnvelopeType::Typing,
        EnvelopeType::Read,
        EnvelopeType::Presence,
        EnvelopeType::Location,
        EnvelopeType::Proximity,
        EnvelopeType::CallOffer,
        EnvelopeType::CallAnswer,
        EnvelopeType::CallIceCandidate,
        EnvelopeType::CallDeclined,
        EnvelopeType::CallEnded,
        EnvelopeType::GenericNotification,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeType::Connect => "connect",
            EnvelopeType::Disconnect => "disconnect",
            EnvelopeType::Message => "message",
            EnvelopeType::Typing => "typing",
            EnvelopeType::Read => "read",
            EnvelopeType::Presence => "presence",
            EnvelopeType::Location => "location",
            EnvelopeType::Proximity => "proximity",
            EnvelopeType::CallOffer => "call-offer",
            EnvelopeType::CallAnswer => "call-answer",
            EnvelopeType::CallIceCandidate => "call-ice-candidate",
            EnvelopeType::CallDeclined => "call-declined",
            EnvelopeType::CallEnded => "call-ended",
            EnvelopeType::GenericNotification => "generic-notification",
        }
    }

    /// Parse a wire `type` string. `None` for types this client does not know.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Call-signaling types are routed to the call controller, not to
    /// generic feature subscribers.
    pub fn is_call_signal(self) -> bool {
        matches!(
            self,
            EnvelopeType::CallOffer
                | EnvelopeType::CallAnswer
                | EnvelopeType::CallIceCandidate
                | EnvelopeType::CallDeclined
                | EnvelopeType::CallEnded
        )
    }
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
