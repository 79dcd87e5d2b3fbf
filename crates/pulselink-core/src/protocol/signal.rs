//! Call-scoped signaling vocabulary.
//!
//! Every call envelope embeds a `CallScope` (`targetUserId` + `callId`, and
//! the sender when known) so the receiving process can route multiplexed
//! calls. `CallSignal` is the narrowed, typed view the call controller
//! consumes; it converts to and from the wire `Payload`.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::kind::EnvelopeType;
use super::payload::Payload;

/// Call identifier (opaque string on the wire; UUIDv4 when generated here).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Fresh random call id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CallId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Media requested for a call. Audio is always on; video is optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMedia {
    #[default]
    Audio,
    Video,
}

impl CallMedia {
    pub fn has_video(self) -> bool {
        matches!(self, CallMedia::Video)
    }
}

/// Routing fields shared by every call envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallScope {
    pub target_user_id: String,
    pub call_id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description (offer or answer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpType::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpType::Answer, sdp: sdp.into() }
    }
}

/// Connectivity candidate as exchanged during trickle ICE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self { candidate: candidate.into(), sdp_mid: None, sdp_m_line_index: None }
    }
}

/// `call-offer` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOffer {
    #[serde(flatten)]
    pub scope: CallScope,
    pub sdp: SessionDescription,
    #[serde(default)]
    pub media: CallMedia,
}

/// `call-answer` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallAnswer {
    #[serde(flatten)]
    pub scope: CallScope,
    pub sdp: SessionDescription,
}

/// `call-ice-candidate` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallIceCandidate {
    #[serde(flatten)]
    pub scope: CallScope,
    pub candidate: IceCandidate,
}

/// `call-declined` / `call-ended` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallHangup {
    #[serde(flatten)]
    pub scope: CallScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Typed body of a call signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalKind {
    Offer { sdp: SessionDescription, media: CallMedia },
    Answer { sdp: SessionDescription },
    IceCandidate(IceCandidate),
    Declined { reason: Option<String> },
    Ended { reason: Option<String> },
}

impl SignalKind {
    pub fn envelope_type(&self) -> EnvelopeType {
        match self {
            SignalKind::Offer { .. } => EnvelopeType::CallOffer,
            SignalKind::Answer { .. } => EnvelopeType::CallAnswer,
            SignalKind::IceCandidate(_) => EnvelopeType::CallIceCandidate,
            SignalKind::Declined { .. } => EnvelopeType::CallDeclined,
            SignalKind::Ended { .. } => EnvelopeType::CallEnded,
        }
    }
}

/// Narrowed call signal: routing scope plus typed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSignal {
    pub scope: CallScope,
    pub kind: SignalKind,
}

impl CallSignal {
    pub fn call_id(&self) -> &CallId {
        &self.scope.call_id
    }

    pub fn from_user_id(&self) -> Option<&str> {
        self.scope.from_user_id.as_deref()
    }

    /// Narrow a payload to a call signal. `None` for non-call payloads.
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        let (scope, kind) = match payload {
            Payload::CallOffer(p) => (
                p.scope.clone(),
                SignalKind::Offer { sdp: p.sdp.clone(), media: p.media },
            ),
            Payload::CallAnswer(p) => (p.scope.clone(), SignalKind::Answer { sdp: p.sdp.clone() }),
            Payload::CallIceCandidate(p) => {
                (p.scope.clone(), SignalKind::IceCandidate(p.candidate.clone()))
            }
            Payload::CallDeclined(p) => {
                (p.scope.clone(), SignalKind::Declined { reason: p.reason.clone() })
            }
            Payload::CallEnded(p) => (p.scope.clone(), SignalKind::Ended { reason: p.reason.clone() }),
            _ => return None,
        };
        Some(Self { scope, kind })
    }

    pub fn into_payload(self) -> Payload {
        let scope = self.scope;
        match self.kind {
            SignalKind::Offer { sdp, media } => Payload::CallOffer(CallOffer { scope, sdp, media }),
            SignalKind::Answer { sdp } => Payload::CallAnswer(CallAnswer { scope, sdp }),
            SignalKind::IceCandidate(candidate) => {
                Payload::CallIceCandidate(CallIceCandidate { scope, candidate })
            }
            SignalKind::Declined { reason } => Payload::CallDeclined(CallHangup { scope, reason }),
            SignalKind::Ended { reason } => Payload::CallEnded(CallHangup { scope, reason }),
        }
    }
}
