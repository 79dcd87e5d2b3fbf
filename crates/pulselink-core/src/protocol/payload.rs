//! Typed payloads, one variant per envelope type.
//!
//! Feature payloads (chat, typing, presence, proximity, ...) are owned by
//! product code; only the fields the transport core and its subscribers
//! rely on are modelled here. Unknown extra fields are ignored on decode.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PulseError, Result};

use super::kind::EnvelopeType;
use super::signal::{CallAnswer, CallHangup, CallIceCandidate, CallOffer};

/// `connect`: authentication handshake sent right after the channel opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectPayload {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectPayload {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// `message`: chat delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub message_id: Option<String>,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub recipient_id: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: String,
    pub user_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub conversation_id: String,
    pub reader_id: String,
    #[serde(default)]
    pub last_message_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

/// `presence`: also used as the heartbeat body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: String,
    pub status: PresenceStatus,
}

impl PresencePayload {
    pub fn online(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), status: PresenceStatus::Online }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPayload {
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy_meters: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProximityPayload {
    pub user_id: String,
    pub nearby_user_id: String,
    pub distance_meters: f64,
}

/// `generic-notification`: free-form product notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Payload tagged by envelope type. The variant fully determines the wire `type`.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Connect(ConnectPayload),
    Disconnect(DisconnectPayload),
    Message(ChatMessage),
    Typing(TypingPayload),
    Read(ReadReceipt),
    Presence(PresencePayload),
    Location(LocationPayload),
    Proximity(ProximityPayload),
    CallOffer(CallOffer),
    CallAnswer(CallAnswer),
    CallIceCandidate(CallIceCandidate),
    CallDeclined(CallHangup),
    CallEnded(CallHangup),
    GenericNotification(Notification),
}

impl Payload {
    pub fn kind(&self) -> EnvelopeType {
        match self {
            Payload::Connect(_) => EnvelopeType::Connect,
            Payload::Disconnect(_) => EnvelopeType::Disconnect,
            Payload::Message(_) => EnvelopeType::Message,
            Payload::Typing(_) => EnvelopeType::Typing,
            Payload::Read(_) => EnvelopeType::Read,
            Payload::Presence(_) => EnvelopeType::Presence,
            Payload::Location(_) => EnvelopeType::Location,
            Payload::Proximity(_) => EnvelopeType::Proximity,
            Payload::CallOffer(_) => EnvelopeType::CallOffer,
            Payload::CallAnswer(_) => EnvelopeType::CallAnswer,
            Payload::CallIceCandidate(_) => EnvelopeType::CallIceCandidate,
            Payload::CallDeclined(_) => EnvelopeType::CallDeclined,
            Payload::CallEnded(_) => EnvelopeType::CallEnded,
            Payload::GenericNotification(_) => EnvelopeType::GenericNotification,
        }
    }

    /// Serialize the inner payload to a JSON value.
    pub fn to_value(&self) -> Result<Value> {
        let v = match self {
            Payload::Connect(p) => serde_json::to_value(p),
            Payload::Disconnect(p) => serde_json::to_value(p),
            Payload::Message(p) => serde_json::to_value(p),
            Payload::Typing(p) => serde_json::to_value(p),
            Payload::Read(p) => serde_json::to_value(p),
            Payload::Presence(p) => serde_json::to_value(p),
            Payload::Location(p) => serde_json::to_value(p),
            Payload::Proximity(p) => serde_json::to_value(p),
            Payload::CallOffer(p) => serde_json::to_value(p),
            Payload::CallAnswer(p) => serde_json::to_value(p),
            Payload::CallIceCandidate(p) => serde_json::to_value(p),
            Payload::CallDeclined(p) | Payload::CallEnded(p) => serde_json::to_value(p),
            Payload::GenericNotification(p) => serde_json::to_value(p),
        };
        v.map_err(|e| PulseError::Internal(format!("{} payload encode failed: {e}", self.kind())))
    }

    /// Parse a raw JSON payload for the given type. A missing payload is
    /// treated as an empty object.
    pub fn from_json(kind: EnvelopeType, raw: Option<&str>) -> Result<Self> {
        let raw = raw.unwrap_or("{}");
        Ok(match kind {
            EnvelopeType::Connect => Payload::Connect(parse(kind, raw)?),
            EnvelopeType::Disconnect => Payload::Disconnect(parse(kind, raw)?),
            EnvelopeType::Message => Payload::Message(parse(kind, raw)?),
            EnvelopeType::Typing => Payload::Typing(parse(kind, raw)?),
            EnvelopeType::Read => Payload::Read(parse(kind, raw)?),
            EnvelopeType::Presence => Payload::Presence(parse(kind, raw)?),
            EnvelopeType::Location => Payload::Location(parse(kind, raw)?),
            EnvelopeType::Proximity => Payload::Proximity(parse(kind, raw)?),
            EnvelopeType::CallOffer => Payload::CallOffer(parse(kind, raw)?),
            EnvelopeType::CallAnswer => Payload::CallAnswer(parse(kind, raw)?),
            EnvelopeType::CallIceCandidate => Payload::CallIceCandidate(parse(kind, raw)?),
            EnvelopeType::CallDeclined => Payload::CallDeclined(parse(kind, raw)?),
            EnvelopeType::CallEnded => Payload::CallEnded(parse(kind, raw)?),
            EnvelopeType::GenericNotification => Payload::GenericNotification(parse(kind, raw)?),
        })
    }
}

fn parse<T: DeserializeOwned>(kind: EnvelopeType, raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| PulseError::BadRequest(format!("{kind} invalid payload: {e}")))
}
