//! JSON envelope (`{ type, payload, timestamp }`).
//!
//! Decoding reads the header first and keeps `payload` as `RawValue`, so an
//! unknown `type` is rejected before any payload parsing happens.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use serde_json::json;
use serde_json::value::RawValue;

use crate::error::{PulseError, Result};

use super::kind::EnvelopeType;
use super::payload::Payload;

/// Current time in millis since Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Envelope as read off the wire, payload not yet parsed.
#[derive(Debug, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    payload: Option<Box<RawValue>>,
    #[serde(default)]
    timestamp: u64,
}

/// Typed envelope. Exactly one type, fully determined by the payload variant.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub payload: Payload,
    /// Sender-side capture instant, millis since Unix epoch.
    pub timestamp: u64,
}

impl Envelope {
    /// Wrap a payload, stamping the current time.
    pub fn new(payload: Payload) -> Self {
        Self { payload, timestamp: now_ms() }
    }

    pub fn kind(&self) -> EnvelopeType {
        self.payload.kind()
    }

    pub fn encode(&self) -> Result<String> {
        let payload = self.payload.to_value()?;
        Ok(json!({
            "type": self.kind().as_str(),
            "payload": payload,
            "timestamp": self.timestamp,
        })
        .to_string())
    }

    pub fn decode(s: &str) -> Result<Self> {
        let wire: WireEnvelope = serde_json::from_str(s)
            .map_err(|e| PulseError::BadRequest(format!("invalid envelope json: {e}")))?;
        let kind = EnvelopeType::parse(&wire.msg_type)
            .ok_or_else(|| PulseError::UnknownType(wire.msg_type.clone()))?;
        let payload = Payload::from_json(kind, wire.payload.as_deref().map(RawValue::get))?;
        Ok(Self { payload, timestamp: wire.timestamp })
    }
}
