//! Wire protocol for the signaling channel.
//!
//! - `kind`: the closed enumeration of envelope types.
//! - `payload`: typed payload per envelope type (tagged union).
//! - `signal`: call-scoped signaling vocabulary (offer/answer/ICE/hangup).
//! - `envelope`: JSON envelope encode/decode with lazy payload parsing.
//!
//! Decoding is panic-free: malformed input is reported as `PulseError`, and
//! an unrecognised `type` is reported as `PulseError::UnknownType` so callers
//! can drop it without tearing down the channel.

pub mod envelope;
pub mod kind;
pub mod payload;
pub mod signal;

pub use envelope::{now_ms, Envelope};
pub use kind::EnvelopeType;
pub use payload::Payload;
pub use signal::{CallId, CallMedia, CallScope, CallSignal, IceCandidate, SdpType, SessionDescription, SignalKind};
