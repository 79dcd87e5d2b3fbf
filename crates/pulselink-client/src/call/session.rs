use std::collections::VecDeque;
use std::sync::Arc;

use tokio::time::Instant;

use pulselink_core::protocol::{IceCandidate, SessionDescription};

use super::observer::CallInfo;
use super::platform::{MediaStream, PeerConnection};
use super::state::CallState;

/// Resources and negotiation progress of one call.
pub(crate) struct PeerSession {
    pub info: CallInfo,
    /// Controller-local id; tags peer events.
    pub seq: u64,
    pub state: CallState,
    pub peer: Option<Arc<dyn PeerConnection>>,
    pub local: Option<Arc<dyn MediaStream>>,
    pub remote: Option<Arc<dyn MediaStream>>,
    /// Offer held while an incoming call rings.
    pub pending_offer: Option<SessionDescription>,
    /// The remote party knows about this call (offer sent or received).
    pub remote_aware: bool,
    pub muted: bool,
    pub video_enabled: bool,
    pub started_at: Instant,
    pub last_activity: Instant,
    pending_candidates: VecDeque<IceCandidate>,
    remote_applied: bool,
    released: bool,
}

impl PeerSession {
    pub fn new(info: CallInfo, seq: u64) -> Self {
        let now = Instant::now();
        Self {
            info,
            seq,
            state: CallState::Idle,
            peer: None,
            local: None,
            remote: None,
            pending_offer: None,
            remote_aware: false,
            muted: false,
            video_enabled: true,
            started_at: now,
            last_activity: now,
            pending_candidates: VecDeque::new(),
            remote_applied: false,
            released: false,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn remote_applied(&self) -> bool {
        self.remote_applied
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Buffer a remote candidate while no remote description is set.
    /// Otherwise hands it back with the peer it should be applied to.
    pub fn route_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Option<(Arc<dyn PeerConnection>, IceCandidate)> {
        match (&self.peer, self.remote_applied) {
            (Some(peer), true) => Some((Arc::clone(peer), candidate)),
            _ => {
                self.pending_candidates.push_back(candidate);
                None
            }
        }
    }

    pub fn next_buffered_candidate(&mut self) -> Option<IceCandidate> {
        self.pending_candidates.pop_front()
    }

    /// Only once the buffer is drained; later candidates go straight to the peer.
    pub fn mark_remote_applied(&mut self) {
        self.remote_applied = true;
    }

    /// Apply mute / video flags to the local tracks, if any.
    pub fn apply_track_flags(&self) {
        let Some(local) = &self.local else { return; };
        for track in local.audio_tracks() {
            track.set_enabled(!self.muted);
        }
        for track in local.video_tracks() {
            track.set_enabled(self.video_enabled);
        }
    }

    /// Stop media and close the peer connection. Idempotent; returns false
    /// if already released.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.pending_candidates.clear();
        self.pending_offer = None;
        if let Some(local) = self.local.take() {
            local.stop();
        }
        if let Some(remote) = self.remote.take() {
            remote.stop();
        }
        if let Some(peer) = self.peer.take() {
            peer.close();
        }
        tracing::debug!(call_id = %self.info.call_id, "call resources released");
        true
    }
}
