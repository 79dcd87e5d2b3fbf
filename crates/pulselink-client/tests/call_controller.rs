#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]


use std::sync::Arc;

use tokio::time::timeout;

use pulselink_client::call::{CallRole, CallState, ConnectivityState, MediaTrack, PeerEvent};
use pulselink_client::transport::MemoryConnector;
use pulselink_client::RealtimeClient;
use pulselink_core::protocol::{
    CallId, CallMedia, EnvelopeType, IceCandidate, SdpType, SessionDescription, SignalKind,
};
use pulselink_core::PulseError;

use fakes::{
    accept, eventually, from_remote, narrow, next_envelope, test_config, wait_state, CallHarness,
    FakeMedia, FakePeerConnector, RecordingObserver, WAIT,
};

fn candidate(name: &str) -> SignalKind {
    SignalKind::IceCandidate(IceCandidate::new(name))
}

fn answer() -> SignalKind {
    SignalKind::Answer { sdp: SessionDescription::answer("v=0 remote-answer") }
}

fn offer(media: CallMedia) -> SignalKind {
    SignalKind::Offer { sdp: SessionDescription::offer("v=0 remote-offer"), media }
}

async fn wait_pending(h: &CallHarness, want: usize) {
    let deadline = tokio::time::Instant::now() + fakes::WAIT;
    loop {
        let pending = h.calls().snapshot().await.map(|s| s.pending_candidates);
        if pending == Some(want) {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "pending candidates: {pending:?}");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}

/// Place a call from u1 to u2 and return its id once the offer is on the wire.
async fn ringing_call(h: &mut CallHarness, media: CallMedia) -> CallId {
    let call_id = h.calls().place_call("u2", media).await.unwrap();
    let env = next_envelope(&mut h.peer).await;
    assert_eq!(env.kind(), EnvelopeType::CallOffer);
    call_id
}

#[tokio::test]
async fn caller_reaches_connected_with_candidates_applied_after_answer() {
    let mut h = CallHarness::start(test_config(), FakeMedia::default()).await;

    let call_id = h.calls().place_call("u2", CallMedia::Audio).await.unwrap();
    assert_eq!(h.calls().state(), CallState::Ringing);

    let env = next_envelope(&mut h.peer).await;
    let signal = narrow(&env);
    assert_eq!(signal.scope.target_user_id, "u2");
    assert_eq!(signal.call_id(), &call_id);
    assert_eq!(signal.from_user_id(), Some("u1"));
    match signal.kind {
        SignalKind::Offer { sdp, media } => {
            assert_eq!(sdp.kind, SdpType::Offer);
            assert_eq!(media, CallMedia::Audio);
        }
        other => panic!("expected offer, got {other:?}"),
    }

    h.deliver(&from_remote(&call_id, answer()));
    h.deliver(&from_remote(&call_id, candidate("c1")));
    h.deliver(&from_remote(&call_id, candidate("c2")));

    let peer = h.peers.last();
    eventually("both candidates", || peer.ops().iter().any(|op| op == "candidate:c2")).await;
    assert_eq!(
        peer.ops(),
        vec!["add_stream", "create_offer", "set_local:offer", "set_remote:answer", "candidate:c1", "candidate:c2"]
    );
    assert_eq!(h.calls().state(), CallState::Ringing);

    assert!(peer.emit(PeerEvent::Connectivity(ConnectivityState::Checking)));
    assert!(peer.emit(PeerEvent::Connectivity(ConnectivityState::Connected)));
    wait_state(h.calls(), CallState::Connected).await;

    assert_eq!(
        h.observer.states(),
        vec![CallState::Connecting, CallState::Ringing, CallState::Connected]
    );
    assert_eq!(h.observer.local_streams(), 1);
    assert!(h.observer.errors().is_empty());
    assert_eq!(
        h.client.metrics().call_setup.count(&[("role", "caller")]),
        1
    );
}

#[tokio::test]
async fn local_candidates_are_trickled_to_the_remote() {
    let mut h = CallHarness::start(test_config(), FakeMedia::default()).await;
    let call_id = ringing_call(&mut h, CallMedia::Audio).await;

    h.peers.last().emit(PeerEvent::LocalCandidate(IceCandidate::new("local-1")));
    let env = next_envelope(&mut h.peer).await;
    let signal = narrow(&env);
    assert_eq!(signal.call_id(), &call_id);
    assert_eq!(signal.scope.target_user_id, "u2");
    assert_eq!(signal.kind, SignalKind::IceCandidate(IceCandidate::new("local-1")));
}

#[tokio::test]
async fn callee_buffers_early_candidates_until_offer_is_applied() {
    let mut h = CallHarness::start(test_config(), FakeMedia::default()).await;
    let call_id = CallId::from("call-42");

    h.deliver(&from_remote(&call_id, offer(CallMedia::Video)));
    wait_state(h.calls(), CallState::Ringing).await;
    let incoming = h.observer.incoming();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].remote_user_id, "u2");
    assert_eq!(incoming[0].role, CallRole::Callee);
    assert_eq!(incoming[0].media, CallMedia::Video);

    for name in ["a", "b", "c"] {
        h.deliver(&from_remote(&call_id, candidate(name)));
    }
    wait_pending(&h, 3).await;
    let snap = h.calls().snapshot().await.unwrap();
    assert!(!snap.remote_description_applied);
    // nothing can have been applied: no peer connection exists yet
    assert_eq!(h.peers.count(), 0);

    h.calls().accept_incoming().await.unwrap();
    assert_eq!(
        h.peers.last().ops(),
        vec![
            "add_stream",
            "set_remote:offer",
            "candidate:a",
            "candidate:b",
            "candidate:c",
            "create_answer",
            "set_local:answer",
        ]
    );
    let snap = h.calls().snapshot().await.unwrap();
    assert_eq!(snap.pending_candidates, 0);
    assert!(snap.remote_description_applied);
    assert_eq!(snap.state, CallState::Connecting);

    let env = next_envelope(&mut h.peer).await;
    assert_eq!(env.kind(), EnvelopeType::CallAnswer);
    let signal = narrow(&env);
    assert_eq!(signal.scope.target_user_id, "u2");
    assert_eq!(signal.call_id(), &call_id);

    // candidates after the remote description go straight through
    h.deliver(&from_remote(&call_id, candidate("d")));
    let peer = h.peers.last();
    eventually("late candidate", || peer.ops().last().map(String::as_str) == Some("candidate:d")).await;

    peer.emit(PeerEvent::Connectivity(ConnectivityState::Completed));
    wait_state(h.calls(), CallState::Connected).await;
    assert_eq!(
        h.observer.states(),
        vec![CallState::Ringing, CallState::Connecting, CallState::Connected]
    );
}

#[tokio::test]
async fn decline_ringing_call_sends_declined_and_ends() {
    let mut h = CallHarness::start(test_config(), FakeMedia::default()).await;
    let call_id = CallId::from("call-43");

    h.deliver(&from_remote(&call_id, offer(CallMedia::Audio)));
    wait_state(h.calls(), CallState::Ringing).await;

    h.calls().decline().await.unwrap();
    assert_eq!(h.calls().state(), CallState::Ended);

    let env = next_envelope(&mut h.peer).await;
    let signal = narrow(&env);
    assert_eq!(env.kind(), EnvelopeType::CallDeclined);
    assert_eq!(signal.scope.target_user_id, "u2");
    assert_eq!(signal.call_id(), &call_id);

    // no media was acquired for an unanswered call
    assert_eq!(h.media.acquired(), 0);
    assert_eq!(h.client.metrics().calls.get(&[("outcome", "declined")]), 1);
    assert!(h.calls().decline().await.is_err());
}

#[tokio::test]
async fn teardown_twice_releases_once() {
    let mut h = CallHarness::start(test_config(), FakeMedia::default()).await;
    let call_id = ringing_call(&mut h, CallMedia::Video).await;

    h.calls().end().await.unwrap();
    h.calls().end().await.unwrap();
    assert_eq!(h.calls().state(), CallState::Ended);

    let stream = h.media.last_stream();
    assert_eq!(stream.audio[0].stops(), 1);
    assert_eq!(stream.video[0].stops(), 1);
    assert_eq!(h.peers.last().closed(), 1);

    let signals = h.drain_until_marker().await;
    assert_eq!(signals.len(), 1, "exactly one call-ended: {signals:?}");
    assert_eq!(signals[0].call_id(), &call_id);
    assert_eq!(signals[0].kind, SignalKind::Ended { reason: Some("hangup".into()) });
}

#[tokio::test]
async fn second_call_is_rejected_while_one_is_active() {
    let mut h = CallHarness::start(test_config(), FakeMedia::default()).await;
    let call_id = ringing_call(&mut h, CallMedia::Audio).await;

    let err = h.calls().place_call("u3", CallMedia::Audio).await.unwrap_err();
    assert_eq!(err, PulseError::CallBusy);
    assert_eq!(h.media.acquired(), 1);

    // an incoming offer for another call is turned away as busy
    let other = CallId::from("call-from-u2");
    h.deliver(&from_remote(&other, offer(CallMedia::Audio)));
    let env = next_envelope(&mut h.peer).await;
    let signal = narrow(&env);
    assert_eq!(signal.call_id(), &other);
    assert_eq!(signal.kind, SignalKind::Declined { reason: Some("busy".into()) });

    let snap = h.calls().snapshot().await.unwrap();
    assert_eq!(snap.call_id, call_id);
    assert_eq!(snap.state, CallState::Ringing);

    // once over, a new call may be placed
    h.calls().end().await.unwrap();
    h.calls().place_call("u3", CallMedia::Audio).await.unwrap();
    assert_eq!(h.calls().state(), CallState::Ringing);
}

#[tokio::test]
async fn media_denial_fails_the_call_without_signaling() {
    let mut h = CallHarness::start(test_config(), FakeMedia::denying()).await;

    let err = h.calls().place_call("u2", CallMedia::Video).await.unwrap_err();
    assert!(matches!(err, PulseError::Media(_)));
    assert_eq!(h.calls().state(), CallState::Failed);
    assert_eq!(h.observer.states(), vec![CallState::Connecting, CallState::Failed]);
    assert_eq!(h.observer.errors(), vec![err]);
    assert_eq!(h.peers.count(), 0);

    assert!(h.drain_until_marker().await.is_empty());
}

#[tokio::test]
async fn ice_failure_fails_the_call_and_tears_down() {
    let mut h = CallHarness::start(test_config(), FakeMedia::default()).await;
    let call_id = ringing_call(&mut h, CallMedia::Audio).await;
    h.deliver(&from_remote(&call_id, answer()));

    let peer = h.peers.last();
    eventually("answer applied", || peer.ops().iter().any(|op| op == "set_remote:answer")).await;
    peer.emit(PeerEvent::Connectivity(ConnectivityState::Failed));
    wait_state(h.calls(), CallState::Failed).await;

    let errors = h.observer.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], PulseError::Negotiation(_)));
    assert_eq!(peer.closed(), 1);
    assert_eq!(h.media.last_stream().audio[0].stops(), 1);

    let signals = h.drain_until_marker().await;
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].kind, SignalKind::Ended { reason: Some("failed".into()) });
}

#[tokio::test]
async fn remote_hangup_ends_connected_call() {
    let mut h = CallHarness::start(test_config(), FakeMedia::default()).await;
    let call_id = ringing_call(&mut h, CallMedia::Audio).await;
    h.deliver(&from_remote(&call_id, answer()));
    let peer = h.peers.last();
    eventually("answer applied", || peer.ops().iter().any(|op| op == "set_remote:answer")).await;
    peer.emit(PeerEvent::Connectivity(ConnectivityState::Connected));
    wait_state(h.calls(), CallState::Connected).await;

    h.deliver(&from_remote(&call_id, SignalKind::Ended { reason: None }));
    wait_state(h.calls(), CallState::Ended).await;
    assert_eq!(peer.closed(), 1);
    assert_eq!(h.media.last_stream().audio[0].stops(), 1);

    // nothing is echoed back to a party that already hung up
    assert!(h.drain_until_marker().await.is_empty());
    assert!(h.client.connection().is_connected());
}

#[tokio::test]
async fn signals_for_another_call_are_ignored() {
    let mut h = CallHarness::start(test_config(), FakeMedia::default()).await;
    let call_id = ringing_call(&mut h, CallMedia::Audio).await;

    h.deliver(&from_remote(&CallId::from("stale-call"), answer()));
    h.deliver(&from_remote(&call_id, candidate("early")));
    wait_pending(&h, 1).await;

    let snap = h.calls().snapshot().await.unwrap();
    assert!(!snap.remote_description_applied);
    assert_eq!(snap.state, CallState::Ringing);
    assert!(!h.peers.last().ops().iter().any(|op| op.starts_with("set_remote")));
}

#[tokio::test]
async fn mute_video_and_camera_controls_leave_state_alone() {
    let mut h = CallHarness::start(test_config(), FakeMedia::default()).await;
    ringing_call(&mut h, CallMedia::Video).await;
    let stream = h.media.last_stream();

    h.calls().toggle_mute(true).await.unwrap();
    h.calls().toggle_video(false).await.unwrap();
    h.calls().switch_camera().await.unwrap();

    assert!(!stream.audio[0].is_enabled());
    assert!(!stream.video[0].is_enabled());
    assert_eq!(h.media.switches(), 1);
    assert_eq!(h.calls().state(), CallState::Ringing);

    h.calls().toggle_mute(false).await.unwrap();
    assert!(stream.audio[0].is_enabled());

    h.calls().end().await.unwrap();
    assert!(matches!(
        h.calls().toggle_mute(true).await,
        Err(PulseError::InvalidState(_))
    ));
}

#[tokio::test]
async fn unanswered_call_times_out() {
    let mut cfg = test_config();
    cfg.call.signaling_timeout_ms = 150;
    let mut h = CallHarness::start(cfg, FakeMedia::default()).await;
    ringing_call(&mut h, CallMedia::Audio).await;

    wait_state(h.calls(), CallState::Failed).await;
    assert_eq!(h.observer.errors(), vec![PulseError::SignalingTimeout]);
    assert_eq!(h.peers.last().closed(), 1);
}

#[tokio::test]
async fn end_does_not_wait_for_a_pending_media_prompt() {
    let (media, gate) = FakeMedia::gated();
    let mut h = CallHarness::start(test_config(), media).await;
    {
        let calls = h.calls();
        let placing = calls.place_call("u2", CallMedia::Audio);
        tokio::pin!(placing);

        tokio::select! {
            _ = &mut placing => panic!("media prompt never resolves"),
            _ = async {
                eventually("media prompt", || gate.waiting() == 1).await;
                assert_eq!(calls.state(), CallState::Connecting);
                timeout(WAIT, calls.end()).await.expect("end blocked on media").unwrap();
            } => {}
        }
    }

    assert_eq!(h.calls().state(), CallState::Ended);
    assert_eq!(h.observer.states(), vec![CallState::Connecting, CallState::Ended]);
    assert!(h.observer.errors().is_empty());
    assert_eq!(h.peers.count(), 0);
    assert!(h.drain_until_marker().await.is_empty());
}

#[tokio::test]
async fn watchdog_fails_a_call_stuck_in_media_acquisition() {
    let mut cfg = test_config();
    cfg.call.signaling_timeout_ms = 150;
    let (media, gate) = FakeMedia::gated();
    let h = CallHarness::start(cfg, media).await;

    let calls = h.calls();
    let placing = calls.place_call("u2", CallMedia::Audio);
    tokio::pin!(placing);
    tokio::select! {
        _ = &mut placing => panic!("media prompt never resolves"),
        _ = wait_state(calls, CallState::Failed) => {}
    }

    assert_eq!(h.observer.errors(), vec![PulseError::SignalingTimeout]);
    assert_eq!(gate.waiting(), 1);
}

#[tokio::test]
async fn media_granted_after_hangup_is_stopped_once() {
    let (media, gate) = FakeMedia::gated();
    let mut h = CallHarness::start(test_config(), media).await;
    {
        let calls = h.calls();
        let (placed, ()) = tokio::join!(calls.place_call("u2", CallMedia::Video), async {
            eventually("media prompt", || gate.waiting() == 1).await;
            calls.end().await.unwrap();
            gate.open();
        });
        assert!(matches!(placed, Err(PulseError::InvalidState(_))));
    }

    let stream = h.media.last_stream();
    assert_eq!(stream.audio[0].stops(), 1);
    assert_eq!(stream.video[0].stops(), 1);
    assert_eq!(h.observer.local_streams(), 0);
    assert_eq!(h.peers.count(), 0);
    assert_eq!(h.observer.states(), vec![CallState::Connecting, CallState::Ended]);
    assert!(h.observer.errors().is_empty());
    assert!(h.drain_until_marker().await.is_empty());
}

#[tokio::test]
async fn local_end_during_offer_creation_releases_once() {
    let (peers, gate) = FakePeerConnector::gated();
    let mut h = CallHarness::start_with(test_config(), FakeMedia::default(), peers).await;
    {
        let calls = h.calls();
        let (placed, ()) = tokio::join!(calls.place_call("u2", CallMedia::Audio), async {
            eventually("offer pending", || gate.waiting() == 1).await;
            calls.end().await.unwrap();
            gate.open();
        });
        assert!(matches!(placed, Err(PulseError::InvalidState(_))));
    }

    let peer = h.peers.last();
    assert_eq!(peer.closed(), 1);
    assert_eq!(h.media.last_stream().audio[0].stops(), 1);
    assert_eq!(h.calls().state(), CallState::Ended);
    assert_eq!(h.observer.states(), vec![CallState::Connecting, CallState::Ended]);
    // the remote never heard of the call
    assert!(h.drain_until_marker().await.is_empty());
}

#[tokio::test]
async fn remote_hangup_while_answering_releases_once() {
    let (peers, gate) = FakePeerConnector::gated();
    let mut h = CallHarness::start_with(test_config(), FakeMedia::default(), peers).await;
    let call_id = CallId::from("call-answering");
    h.deliver(&from_remote(&call_id, offer(CallMedia::Audio)));
    wait_state(h.calls(), CallState::Ringing).await;
    {
        let calls = h.calls();
        let (accepted, ()) = tokio::join!(calls.accept_incoming(), async {
            eventually("answer pending", || gate.waiting() == 1).await;
            h.deliver(&from_remote(&call_id, SignalKind::Ended { reason: Some("hangup".into()) }));
            wait_state(calls, CallState::Ended).await;
            gate.open();
        });
        assert!(matches!(accepted, Err(PulseError::InvalidState(_))));
    }

    let peer = h.peers.last();
    assert_eq!(peer.closed(), 1);
    assert_eq!(h.media.last_stream().audio[0].stops(), 1);
    assert_eq!(
        h.observer.states(),
        vec![CallState::Ringing, CallState::Connecting, CallState::Ended]
    );
    assert!(h.observer.errors().is_empty());
    // no answer and no echo of the hang-up
    assert!(h.drain_until_marker().await.is_empty());
}

#[tokio::test]
async fn replacing_the_call_controller_keeps_the_new_one_bound() {
    let (connector, mut server) = MemoryConnector::pair();
    let first = Arc::new(RecordingObserver::default());
    let second = Arc::new(RecordingObserver::default());
    let client = RealtimeClient::new(test_config(), "u1", Arc::new(connector))
        .with_calls(
            Arc::new(FakeMedia::default()),
            Arc::new(FakePeerConnector::default()),
            first.clone(),
        )
        .with_calls(
            Arc::new(FakeMedia::default()),
            Arc::new(FakePeerConnector::default()),
            second.clone(),
        );
    client.connect("tok-1").await.unwrap();
    let mut peer = accept(&mut server).await;
    next_envelope(&mut peer).await;

    let call_id = CallId::from("call-rebound");
    peer.deliver(&from_remote(&call_id, offer(CallMedia::Audio))).unwrap();
    wait_state(client.calls().unwrap(), CallState::Ringing).await;

    let incoming = second.incoming();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].call_id, call_id);
    assert!(first.incoming().is_empty());
}
