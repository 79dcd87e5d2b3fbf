//! Shared error type across pulselink crates.

use thiserror::Error;

/// Stable error classes, used by product layers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Channel open failure or unexpected close. Retried internally.
    Transport,
    /// Token rejected. Fatal for the session; forces re-login.
    Auth,
    /// Capture permission denied or device unavailable. Fatal for the call.
    Media,
    /// Offer/answer rejected, ICE failure, signaling silence. Fatal for the call.
    Negotiation,
    /// Unknown or malformed envelope. Logged and dropped.
    Routing,
    /// Call API misuse (busy, wrong state).
    Call,
    /// Invalid configuration.
    Config,
    /// Internal error.
    Internal,
}

impl ErrorClass {
    /// String representation used in logs and diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Transport => "TRANSPORT",
            ErrorClass::Auth => "AUTH",
            ErrorClass::Media => "MEDIA",
            ErrorClass::Negotiation => "NEGOTIATION",
            ErrorClass::Routing => "ROUTING",
            ErrorClass::Call => "CALL",
            ErrorClass::Config => "CONFIG",
            ErrorClass::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, PulseError>;

/// Unified error type used by core and client.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PulseError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unknown envelope type: {0}")]
    UnknownType(String),
    #[error("auth failed")]
    AuthFailed,
    #[error("transport: {0}")]
    Transport(String),
    #[error("media: {0}")]
    Media(String),
    #[error("negotiation: {0}")]
    Negotiation(String),
    #[error("signaling timeout")]
    SignalingTimeout,
    #[error("a call is already in progress")]
    CallBusy,
    #[error("invalid call state: {0}")]
    InvalidState(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl PulseError {
    /// Map an error to its stable class.
    pub fn class(&self) -> ErrorClass {
        match self {
            PulseError::BadRequest(_) | PulseError::UnknownType(_) => ErrorClass::Routing,
            PulseError::AuthFailed => ErrorClass::Auth,
            PulseError::Transport(_) => ErrorClass::Transport,
            PulseError::Media(_) => ErrorClass::Media,
            PulseError::Negotiation(_) | PulseError::SignalingTimeout => ErrorClass::Negotiation,
            PulseError::CallBusy | PulseError::InvalidState(_) => ErrorClass::Call,
            PulseError::Config(_) | PulseError::UnsupportedVersion => ErrorClass::Config,
            PulseError::Internal(_) => ErrorClass::Internal,
        }
    }
}
