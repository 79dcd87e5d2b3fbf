//! Capabilities supplied by the host platform.
//!
//! The controller never touches a media device or a connectivity stack
//! directly; it drives these traits. Peer-side notifications (local ICE
//! candidates, connectivity changes, remote media) are pushed back through
//! a `PeerEventSink` handed to `PeerConnector::create`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use pulselink_core::error::Result;
use pulselink_core::protocol::{IceCandidate, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

pub trait MediaTrack: Send + Sync {
    fn kind(&self) -> TrackKind;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    /// Release the underlying device. Must tolerate repeated calls.
    fn stop(&self);
}

pub trait MediaStream: Send + Sync {
    fn id(&self) -> String;
    fn audio_tracks(&self) -> Vec<Arc<dyn MediaTrack>>;
    fn video_tracks(&self) -> Vec<Arc<dyn MediaTrack>>;

    fn stop(&self) {
        for track in self.audio_tracks().into_iter().chain(self.video_tracks()) {
            track.stop();
        }
    }
}

/// Local media capability. Errors are reported as `PulseError::Media`.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, audio: bool, video: bool) -> Result<Arc<dyn MediaStream>>;
    async fn switch_camera(&self, stream: &Arc<dyn MediaStream>) -> Result<()>;
}

/// Transport-level connectivity as reported by the peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    Connectivity(ConnectivityState),
    RemoteStream(Arc<dyn MediaStream>),
}

/// Where a peer connection reports its events. Tagged with the session it
/// was created for, so events of a torn-down call are discarded.
#[derive(Clone)]
pub struct PeerEventSink {
    session: u64,
    tx: mpsc::UnboundedSender<(u64, PeerEvent)>,
}

impl PeerEventSink {
    pub(crate) fn new(session: u64, tx: mpsc::UnboundedSender<(u64, PeerEvent)>) -> Self {
        Self { session, tx }
    }

    /// False once the controller is gone.
    pub fn emit(&self, event: PeerEvent) -> bool {
        self.tx.send((self.session, event)).is_ok()
    }
}

/// Peer connectivity capability for one call.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_stream(&self, stream: Arc<dyn MediaStream>) -> Result<()>;
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    /// Rejected by real stacks when no remote description is set.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    fn close(&self);
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>>;
}
