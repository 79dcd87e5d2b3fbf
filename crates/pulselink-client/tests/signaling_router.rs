#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]


use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::timeout;

use pulselink_client::connection::{ConnectionManager, Delivery};
use pulselink_client::obs::ClientMetrics;
use pulselink_client::signaling::SignalingRouter;
use pulselink_client::transport::{MemoryConnector, MemoryPeer};
use pulselink_core::protocol::payload::Payload;
use pulselink_core::protocol::{
    CallId, CallMedia, Envelope, EnvelopeType, IceCandidate, SessionDescription, SignalKind,
};

use fakes::{accept, chat, eventually, from_remote, narrow, next_envelope, test_config, WAIT};

async fn routed() -> (ConnectionManager, Arc<SignalingRouter>, MemoryPeer) {
    let (connector, mut server) = MemoryConnector::pair();
    let conn = ConnectionManager::new(
        &test_config(),
        "u1",
        Arc::new(connector),
        Arc::new(ClientMetrics::default()),
    );
    let router = SignalingRouter::attach(&conn);
    conn.connect("tok-1").await.unwrap();
    let mut peer = accept(&mut server).await;
    next_envelope(&mut peer).await;
    (conn, router, peer)
}

fn offer() -> SignalKind {
    SignalKind::Offer { sdp: SessionDescription::offer("v=0 remote"), media: CallMedia::Video }
}

#[tokio::test]
async fn non_call_envelopes_reach_generic_listeners() {
    let (conn, _router, peer) = routed().await;
    let chats = Arc::new(AtomicUsize::new(0));
    let c = chats.clone();
    let _sub = conn.on(EnvelopeType::Message, move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    peer.deliver(&Envelope::new(chat(1))).unwrap();
    eventually("chat listener", || chats.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn call_signals_reach_bound_controller_in_arrival_order() {
    let (conn, router, peer) = routed().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    router.bind_calls(tx);

    let generic = Arc::new(AtomicUsize::new(0));
    let g = generic.clone();
    let _any = conn.on_any(move |_| {
        g.fetch_add(1, Ordering::SeqCst);
    });

    let call_id = CallId::from("call-7");
    peer.deliver(&from_remote(&call_id, offer())).unwrap();
    for n in 0..3 {
        let candidate = SignalKind::IceCandidate(IceCandidate::new(format!("cand-{n}")));
        peer.deliver(&from_remote(&call_id, candidate)).unwrap();
    }
    peer.deliver(&from_remote(&call_id, SignalKind::Ended { reason: None })).unwrap();
    peer.deliver(&Envelope::new(chat(1))).unwrap();

    let mut kinds = Vec::new();
    for _ in 0..5 {
        let signal = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(signal.call_id(), &call_id);
        assert_eq!(signal.from_user_id(), Some("u2"));
        kinds.push(signal.kind);
    }
    assert!(matches!(kinds[0], SignalKind::Offer { media: CallMedia::Video, .. }));
    for (n, kind) in kinds[1..4].iter().enumerate() {
        match kind {
            SignalKind::IceCandidate(c) => assert_eq!(c.candidate, format!("cand-{n}")),
            other => panic!("expected candidate, got {other:?}"),
        }
    }
    assert!(matches!(kinds[4], SignalKind::Ended { .. }));

    // only the chat reached the generic listeners
    eventually("chat", || generic.load(Ordering::SeqCst) == 1).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn offer_without_controller_goes_to_incoming_handler() {
    let (conn, router, peer) = routed().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    router.on_incoming_call(move |signal| {
        let _ = tx.send(signal);
    });
    let chats = Arc::new(AtomicUsize::new(0));
    let c = chats.clone();
    let _sub = conn.on(EnvelopeType::Message, move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    let call_id = CallId::from("call-8");
    peer.deliver(&from_remote(&call_id, offer())).unwrap();
    let signal = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(signal.call_id(), &call_id);

    // non-offer signals with nobody bound are dropped
    let answer = SignalKind::Answer { sdp: SessionDescription::answer("v=0") };
    peer.deliver(&from_remote(&call_id, answer)).unwrap();
    peer.deliver(&Envelope::new(chat(1))).unwrap();
    eventually("chat", || chats.load(Ordering::SeqCst) == 1).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unbound_controller_no_longer_receives_signals() {
    let (_conn, router, peer) = routed().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    router.bind_calls(tx.clone());
    assert!(router.unbind_calls(&tx));

    let (incoming_tx, mut incoming_rx) = mpsc::unbounded_channel();
    router.on_incoming_call(move |signal| {
        let _ = incoming_tx.send(signal);
    });

    peer.deliver(&from_remote(&CallId::from("call-9"), offer())).unwrap();
    timeout(WAIT, incoming_rx.recv()).await.unwrap().unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn send_signal_embeds_routing_fields() {
    let (_conn, router, mut peer) = routed().await;
    let call_id = CallId::generate();

    let delivery = router
        .send_signal("u2", &call_id, SignalKind::Declined { reason: Some("busy".into()) })
        .unwrap();
    assert_eq!(delivery, Delivery::Sent);

    let env = next_envelope(&mut peer).await;
    assert_eq!(env.kind(), EnvelopeType::CallDeclined);
    let signal = narrow(&env);
    assert_eq!(signal.scope.target_user_id, "u2");
    assert_eq!(signal.call_id(), &call_id);
    assert_eq!(signal.from_user_id(), Some("u1"));
    assert_eq!(signal.kind, SignalKind::Declined { reason: Some("busy".into()) });

    let raw = env.encode().unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["payload"]["targetUserId"], "u2");
    assert_eq!(value["payload"]["callId"], call_id.as_str());
    assert!(matches!(env.payload, Payload::CallDeclined(_)));
}

#[tokio::test]
async fn stale_unbind_leaves_the_replacement_bound() {
    let (_conn, router, peer) = routed().await;
    let (old_tx, mut old_rx) = mpsc::unbounded_channel();
    let (new_tx, mut new_rx) = mpsc::unbounded_channel();
    router.bind_calls(old_tx.clone());
    router.bind_calls(new_tx.clone());

    // the replaced controller going away must not unbind its successor
    assert!(!router.unbind_calls(&old_tx));

    let call_id = CallId::from("call-10");
    peer.deliver(&from_remote(&call_id, offer())).unwrap();
    let signal = timeout(WAIT, new_rx.recv()).await.unwrap().unwrap();
    assert_eq!(signal.call_id(), &call_id);
    assert!(old_rx.try_recv().is_err());

    assert!(router.unbind_calls(&new_tx));
    assert!(!router.unbind_calls(&new_tx));
}
