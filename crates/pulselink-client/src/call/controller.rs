use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use pulselink_core::error::{PulseError, Result};
use pulselink_core::protocol::{
    CallId, CallMedia, CallScope, CallSignal, SessionDescription, SignalKind,
};

use crate::config::CallSection;
use crate::obs::ClientMetrics;
use crate::signaling::SignalingRouter;

use super::observer::{CallInfo, CallObserver};
use super::platform::{
    ConnectivityState, MediaDevices, PeerConnection, PeerConnector, PeerEvent, PeerEventSink,
};
use super::session::PeerSession;
use super::state::{CallRole, CallState};

/// Point-in-time view of the current (or last) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    pub call_id: CallId,
    pub remote_user_id: String,
    pub role: CallRole,
    pub media: CallMedia,
    pub state: CallState,
    pub pending_candidates: usize,
    pub remote_description_applied: bool,
}

struct Shared {
    router: Arc<SignalingRouter>,
    media: Arc<dyn MediaDevices>,
    peers: Arc<dyn PeerConnector>,
    observer: Arc<dyn CallObserver>,
    metrics: Arc<ClientMetrics>,
    signaling_timeout: Duration,
    session: Mutex<Option<PeerSession>>,
    next_seq: AtomicU64,
    peer_tx: mpsc::UnboundedSender<(u64, PeerEvent)>,
    state_tx: watch::Sender<CallState>,
}

/// Drives at most one call at a time. Binds itself to the router on
/// creation and unbinds on drop.
pub struct CallController {
    shared: Arc<Shared>,
    inbox: mpsc::UnboundedSender<CallSignal>,
    pump: JoinHandle<()>,
}

impl CallController {
    pub fn new(
        router: Arc<SignalingRouter>,
        cfg: &CallSection,
        media: Arc<dyn MediaDevices>,
        peers: Arc<dyn PeerConnector>,
        observer: Arc<dyn CallObserver>,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(CallState::Idle);

        let shared = Arc::new(Shared {
            router: Arc::clone(&router),
            media,
            peers,
            observer,
            metrics,
            signaling_timeout: cfg.signaling_timeout(),
            session: Mutex::new(None),
            next_seq: AtomicU64::new(1),
            peer_tx,
            state_tx,
        });

        router.bind_calls(signal_tx.clone());
        let pump = tokio::spawn(run_pump(Arc::downgrade(&shared), signal_rx, peer_rx));
        Self { shared, inbox: signal_tx, pump }
    }

    /// Start an outbound call. Rejected with `CallBusy` while another call
    /// is connecting, ringing or connected.
    pub async fn place_call(&self, target_user_id: &str, media: CallMedia) -> Result<CallId> {
        self.shared.place_call(target_user_id, media).await
    }

    /// Answer the ringing incoming call.
    pub async fn accept_incoming(&self) -> Result<()> {
        self.shared.accept_incoming().await
    }

    /// Refuse the ringing incoming call.
    pub async fn decline(&self) -> Result<()> {
        self.shared.decline().await
    }

    /// Hang up. No-op without an active call.
    pub async fn end(&self) -> Result<()> {
        self.shared.end().await
    }

    pub async fn toggle_mute(&self, muted: bool) -> Result<()> {
        let mut guard = self.shared.session.lock().await;
        let sess = active_mut(&mut guard)?;
        sess.muted = muted;
        sess.apply_track_flags();
        tracing::debug!(call_id = %sess.info.call_id, muted, "microphone toggled");
        Ok(())
    }

    pub async fn toggle_video(&self, enabled: bool) -> Result<()> {
        let mut guard = self.shared.session.lock().await;
        let sess = active_mut(&mut guard)?;
        sess.video_enabled = enabled;
        sess.apply_track_flags();
        tracing::debug!(call_id = %sess.info.call_id, enabled, "camera toggled");
        Ok(())
    }

    pub async fn switch_camera(&self) -> Result<()> {
        let local = {
            let mut guard = self.shared.session.lock().await;
            active_mut(&mut guard)?.local.clone()
        };
        let Some(local) = local else {
            return Err(PulseError::InvalidState("no local media to switch".into()));
        };
        self.shared.media.switch_camera(&local).await.map_err(as_media)
    }

    /// State of the current call; the last call's terminal state once it is over.
    pub fn state(&self) -> CallState {
        *self.shared.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<CallState> {
        self.shared.state_tx.subscribe()
    }

    pub async fn snapshot(&self) -> Option<CallSnapshot> {
        let guard = self.shared.session.lock().await;
        guard.as_ref().map(|s| CallSnapshot {
            call_id: s.info.call_id.clone(),
            remote_user_id: s.info.remote_user_id.clone(),
            role: s.info.role,
            media: s.info.media,
            state: s.state,
            pending_candidates: s.pending_candidates(),
            remote_description_applied: s.remote_applied(),
        })
    }
}

impl Drop for CallController {
    fn drop(&mut self) {
        self.pump.abort();
        self.shared.router.unbind_calls(&self.inbox);
        if let Ok(mut guard) = self.shared.session.try_lock() {
            if let Some(sess) = guard.as_mut() {
                sess.release();
            }
        }
    }
}

fn active_mut(slot: &mut Option<PeerSession>) -> Result<&mut PeerSession> {
    slot.as_mut()
        .filter(|s| s.state.is_active())
        .ok_or_else(|| PulseError::InvalidState("no active call".into()))
}

/// The session a setup step with sequence `seq` belongs to, unless it was
/// torn down while the step awaited the platform.
fn live_session(slot: &mut Option<PeerSession>, seq: u64) -> Result<&mut PeerSession> {
    match slot.as_ref() {
        Some(s) if s.seq == seq && s.state.is_active() => {}
        Some(s) if s.seq == seq && s.state == CallState::Failed => {
            return Err(PulseError::InvalidState("call failed during setup".into()));
        }
        _ => return Err(PulseError::InvalidState("call ended during setup".into())),
    }
    Ok(slot.as_mut().expect("checked above"))
}

fn as_media(e: PulseError) -> PulseError {
    match e {
        PulseError::Media(_) => e,
        other => PulseError::Media(other.to_string()),
    }
}

fn as_negotiation(e: PulseError) -> PulseError {
    match e {
        PulseError::Negotiation(_) => e,
        other => PulseError::Negotiation(other.to_string()),
    }
}

async fn run_pump(
    shared: Weak<Shared>,
    mut signals: mpsc::UnboundedReceiver<CallSignal>,
    mut peer_events: mpsc::UnboundedReceiver<(u64, PeerEvent)>,
) {
    let period = match shared.upgrade() {
        Some(s) => (s.signaling_timeout / 5).max(Duration::from_millis(10)),
        None => return,
    };
    let mut watchdog = tokio::time::interval(period);
    watchdog.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            signal = signals.recv() => {
                let Some(signal) = signal else { break; };
                let Some(s) = shared.upgrade() else { break; };
                s.on_signal(signal).await;
            }
            event = peer_events.recv() => {
                let Some((seq, event)) = event else { break; };
                let Some(s) = shared.upgrade() else { break; };
                s.on_peer_event(seq, event).await;
            }
            _ = watchdog.tick() => {
                let Some(s) = shared.upgrade() else { break; };
                s.check_watchdog().await;
            }
        }
    }
    tracing::debug!("call controller pump stopped");
}

impl Shared {
    fn transition(&self, sess: &mut PeerSession, to: CallState) {
        if sess.state == to {
            return;
        }
        if !sess.state.can_transition_to(to) {
            tracing::warn!(call_id = %sess.info.call_id, from = %sess.state, to = %to, "invalid call transition ignored");
            return;
        }
        tracing::info!(call_id = %sess.info.call_id, from = %sess.state, to = %to, "call state");
        sess.state = to;
        self.state_tx.send_replace(to);
        self.observer.on_state_change(&sess.info, to);
    }

    fn new_session(&self, info: CallInfo) -> PeerSession {
        PeerSession::new(info, self.next_seq.fetch_add(1, Ordering::Relaxed))
    }

    fn signal(&self, sess: &PeerSession, kind: SignalKind) -> Result<()> {
        self.router
            .send_signal(&sess.info.remote_user_id, &sess.info.call_id, kind)
            .map(|_| ())
    }

    /// Terminal failure: report once, tell the remote if it knows about the
    /// call, release everything.
    fn fail(&self, sess: &mut PeerSession, err: PulseError) {
        if !sess.state.is_active() {
            return;
        }
        tracing::error!(call_id = %sess.info.call_id, error = %err, class = err.class().as_str(), "call failed");
        if sess.remote_aware {
            let ended = SignalKind::Ended { reason: Some("failed".into()) };
            if let Err(e) = self.signal(sess, ended) {
                tracing::debug!(error = %e, "call-ended after failure not sent");
            }
        }
        self.transition(sess, CallState::Failed);
        self.observer.on_error(&sess.info, &err);
        sess.release();
        self.metrics.calls.inc(&[("outcome", "failed")]);
    }

    fn finish(&self, sess: &mut PeerSession, outcome: &'static str) {
        self.transition(sess, CallState::Ended);
        sess.release();
        self.metrics.calls.inc(&[("outcome", outcome)]);
    }

    /// Fail the call a setup step belonged to if it is still live. Returns
    /// the error the caller of the step should see.
    async fn fail_if_live(&self, seq: u64, err: PulseError) -> PulseError {
        let mut guard = self.session.lock().await;
        match live_session(&mut guard, seq) {
            Ok(sess) => {
                self.fail(sess, err.clone());
                err
            }
            Err(gone) => gone,
        }
    }

    // Setup steps never hold the session lock across a platform await, so
    // end(), remote hang-ups and the watchdog can cut in at any point.

    async fn place_call(&self, target: &str, media: CallMedia) -> Result<CallId> {
        let call_id = CallId::generate();
        let seq = {
            let mut guard = self.session.lock().await;
            if let Some(current) = guard.as_ref().filter(|s| s.state.is_active()) {
                tracing::info!(call_id = %current.info.call_id, "place_call rejected; a call is active");
                return Err(PulseError::CallBusy);
            }
            let info = CallInfo {
                call_id: call_id.clone(),
                remote_user_id: target.to_string(),
                role: CallRole::Caller,
                media,
            };
            let sess = guard.insert(self.new_session(info));
            self.transition(sess, CallState::Connecting);
            sess.seq
        };

        match self.start_outgoing(seq, media).await {
            Ok(()) => Ok(call_id),
            Err(e) => Err(self.fail_if_live(seq, e).await),
        }
    }

    async fn start_outgoing(&self, seq: u64, media: CallMedia) -> Result<()> {
        self.acquire_local(seq, media).await?;
        let peer = self.open_peer(seq).await?;

        let offer = peer.create_offer().await.map_err(as_negotiation)?;
        peer.set_local_description(offer.clone())
            .await
            .map_err(as_negotiation)?;

        let mut guard = self.session.lock().await;
        let sess = live_session(&mut guard, seq)?;
        self.transition(sess, CallState::Ringing);
        self.signal(sess, SignalKind::Offer { sdp: offer, media })?;
        sess.remote_aware = true;
        sess.touch();
        Ok(())
    }

    async fn accept_incoming(&self) -> Result<()> {
        let (seq, offer, media) = {
            let mut guard = self.session.lock().await;
            let sess = guard
                .as_mut()
                .filter(|s| s.info.role == CallRole::Callee && s.state == CallState::Ringing)
                .ok_or_else(|| PulseError::InvalidState("no incoming call waiting".into()))?;
            let offer = sess
                .pending_offer
                .take()
                .ok_or_else(|| PulseError::InvalidState("incoming offer missing".into()))?;
            self.transition(sess, CallState::Connecting);
            (sess.seq, offer, sess.info.media)
        };

        match self.start_incoming(seq, offer, media).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail_if_live(seq, e).await),
        }
    }

    async fn start_incoming(&self, seq: u64, offer: SessionDescription, media: CallMedia) -> Result<()> {
        self.acquire_local(seq, media).await?;
        let peer = self.open_peer(seq).await?;

        self.apply_remote_description(seq, &peer, offer).await?;
        let answer = peer.create_answer().await.map_err(as_negotiation)?;
        peer.set_local_description(answer.clone())
            .await
            .map_err(as_negotiation)?;

        let mut guard = self.session.lock().await;
        let sess = live_session(&mut guard, seq)?;
        self.signal(sess, SignalKind::Answer { sdp: answer })?;
        sess.touch();
        Ok(())
    }

    async fn acquire_local(&self, seq: u64, media: CallMedia) -> Result<()> {
        let stream = self
            .media
            .acquire(true, media.has_video())
            .await
            .map_err(as_media)?;

        let mut guard = self.session.lock().await;
        let sess = match live_session(&mut guard, seq) {
            Ok(sess) => sess,
            Err(e) => {
                tracing::debug!(session = seq, "local media arrived after teardown; stopped");
                stream.stop();
                return Err(e);
            }
        };
        sess.local = Some(Arc::clone(&stream));
        sess.apply_track_flags();
        self.observer.on_local_stream(&sess.info, &stream);
        Ok(())
    }

    async fn open_peer(&self, seq: u64) -> Result<Arc<dyn PeerConnection>> {
        let sink = PeerEventSink::new(seq, self.peer_tx.clone());
        let peer = self.peers.create(sink).await.map_err(as_negotiation)?;

        let local = {
            let mut guard = self.session.lock().await;
            match live_session(&mut guard, seq) {
                Ok(sess) => {
                    sess.peer = Some(Arc::clone(&peer));
                    sess.local.clone()
                }
                Err(e) => {
                    tracing::debug!(session = seq, "peer connection created after teardown; closed");
                    peer.close();
                    return Err(e);
                }
            }
        };
        if let Some(local) = local {
            peer.add_stream(local).await.map_err(as_negotiation)?;
        }
        Ok(peer)
    }

    /// Set the remote description, then drain candidates buffered before it
    /// in arrival order. Candidates arriving during the drain queue behind it.
    async fn apply_remote_description(
        &self,
        seq: u64,
        peer: &Arc<dyn PeerConnection>,
        desc: SessionDescription,
    ) -> Result<()> {
        peer.set_remote_description(desc).await.map_err(as_negotiation)?;

        let mut drained = 0usize;
        loop {
            let next = {
                let mut guard = self.session.lock().await;
                let sess = live_session(&mut guard, seq)?;
                match sess.next_buffered_candidate() {
                    Some(candidate) => candidate,
                    None => {
                        sess.mark_remote_applied();
                        break;
                    }
                }
            };
            drained += 1;
            if let Err(e) = peer.add_ice_candidate(next).await {
                tracing::warn!(session = seq, error = %e, "buffered candidate rejected");
            }
        }
        if drained > 0 {
            tracing::debug!(session = seq, drained, "flushed buffered candidates");
        }
        Ok(())
    }

    async fn decline(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        let sess = guard
            .as_mut()
            .filter(|s| s.info.role == CallRole::Callee && s.state == CallState::Ringing)
            .ok_or_else(|| PulseError::InvalidState("no incoming call to decline".into()))?;

        let declined = SignalKind::Declined { reason: Some("declined".into()) };
        if let Err(e) = self.signal(sess, declined) {
            tracing::warn!(call_id = %sess.info.call_id, error = %e, "call-declined not sent");
        }
        self.finish(sess, "declined");
        Ok(())
    }

    async fn end(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        let Some(sess) = guard.as_mut().filter(|s| s.state.is_active()) else {
            tracing::debug!("end without an active call");
            return Ok(());
        };

        if sess.remote_aware {
            let ended = SignalKind::Ended { reason: Some("hangup".into()) };
            if let Err(e) = self.signal(sess, ended) {
                tracing::warn!(call_id = %sess.info.call_id, error = %e, "call-ended not sent");
            }
        }
        self.finish(sess, "ended");
        Ok(())
    }

    async fn on_signal(&self, signal: CallSignal) {
        let CallSignal { scope, kind } = signal;
        let mut guard = self.session.lock().await;

        if let SignalKind::Offer { sdp, media } = kind {
            self.on_offer(&mut guard, scope, sdp, media);
            return;
        }

        let Some(sess) = guard
            .as_mut()
            .filter(|s| s.state.is_active() && s.info.call_id == scope.call_id)
        else {
            tracing::debug!(call_id = %scope.call_id, kind = %kind.envelope_type(), "signal for no active call dropped");
            return;
        };
        sess.touch();

        match kind {
            SignalKind::Offer { .. } => {}
            SignalKind::Answer { sdp } => {
                if sess.info.role != CallRole::Caller
                    || sess.state != CallState::Ringing
                    || sess.remote_applied()
                {
                    tracing::warn!(call_id = %sess.info.call_id, state = %sess.state, "unexpected answer ignored");
                    return;
                }
                let Some(peer) = sess.peer.clone() else {
                    tracing::warn!(call_id = %sess.info.call_id, "answer before peer connection ignored");
                    return;
                };
                let seq = sess.seq;
                drop(guard);
                if let Err(e) = self.apply_remote_description(seq, &peer, sdp).await {
                    self.fail_if_live(seq, e).await;
                }
            }
            SignalKind::IceCandidate(candidate) => {
                let Some((peer, candidate)) = sess.route_candidate(candidate) else {
                    tracing::debug!(
                        call_id = %sess.info.call_id,
                        buffered = sess.pending_candidates(),
                        "candidate buffered until remote description"
                    );
                    return;
                };
                let call_id = sess.info.call_id.clone();
                drop(guard);
                if let Err(e) = peer.add_ice_candidate(candidate).await {
                    tracing::warn!(%call_id, error = %e, "remote candidate rejected");
                }
            }
            SignalKind::Declined { reason } => {
                if matches!(sess.state, CallState::Ringing | CallState::Connecting) {
                    tracing::info!(call_id = %sess.info.call_id, ?reason, "call declined by remote");
                    sess.remote_aware = false;
                    self.finish(sess, "declined");
                }
            }
            SignalKind::Ended { reason } => {
                tracing::info!(call_id = %sess.info.call_id, ?reason, "call ended by remote");
                sess.remote_aware = false;
                self.finish(sess, "ended");
            }
        }
    }

    fn on_offer(
        &self,
        slot: &mut Option<PeerSession>,
        scope: CallScope,
        sdp: SessionDescription,
        media: CallMedia,
    ) {
        let Some(from) = scope.from_user_id.clone() else {
            tracing::warn!(call_id = %scope.call_id, "offer without sender dropped");
            return;
        };

        if let Some(current) = slot.as_ref().filter(|s| s.state.is_active()) {
            if current.info.call_id == scope.call_id {
                tracing::debug!(call_id = %scope.call_id, "duplicate offer ignored");
                return;
            }
            tracing::info!(call_id = %scope.call_id, from = %from, "busy; declining incoming offer");
            let busy = SignalKind::Declined { reason: Some("busy".into()) };
            if let Err(e) = self.router.send_signal(&from, &scope.call_id, busy) {
                tracing::warn!(error = %e, "busy decline not sent");
            }
            self.metrics.calls.inc(&[("outcome", "busy")]);
            return;
        }

        let info = CallInfo {
            call_id: scope.call_id,
            remote_user_id: from,
            role: CallRole::Callee,
            media,
        };
        let sess = slot.insert(self.new_session(info));
        sess.pending_offer = Some(sdp);
        sess.remote_aware = true;
        self.transition(sess, CallState::Ringing);
        self.observer.on_incoming_call(&sess.info);
    }

    async fn on_peer_event(&self, seq: u64, event: PeerEvent) {
        let mut guard = self.session.lock().await;
        let Some(sess) = guard.as_mut().filter(|s| s.seq == seq && s.state.is_active()) else {
            return;
        };

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                if let Err(e) = self.signal(sess, SignalKind::IceCandidate(candidate)) {
                    tracing::warn!(call_id = %sess.info.call_id, error = %e, "local candidate not sent");
                }
            }
            PeerEvent::RemoteStream(stream) => {
                sess.remote = Some(Arc::clone(&stream));
                self.observer.on_remote_stream(&sess.info, &stream);
            }
            PeerEvent::Connectivity(state) => match state {
                ConnectivityState::Connected | ConnectivityState::Completed => {
                    if sess.state != CallState::Connected {
                        self.transition(sess, CallState::Connected);
                        self.metrics
                            .call_setup
                            .observe(&[("role", sess.info.role.as_str())], sess.started_at.elapsed());
                    }
                }
                ConnectivityState::Failed => {
                    self.fail(sess, PulseError::Negotiation("ice connectivity failed".into()));
                }
                other => {
                    tracing::debug!(call_id = %sess.info.call_id, state = ?other, "connectivity");
                }
            },
        }
    }

    /// Fails a call stuck before `Connected` with no signaling activity.
    async fn check_watchdog(&self) {
        let mut guard = self.session.lock().await;
        let Some(sess) = guard.as_mut() else { return; };
        if matches!(sess.state, CallState::Connecting | CallState::Ringing)
            && sess.last_activity.elapsed() >= self.signaling_timeout
        {
            self.fail(sess, PulseError::SignalingTimeout);
        }
    }
}
