use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use pulselink_core::error::{PulseError, Result};
use pulselink_core::protocol::payload::{ConnectPayload, Payload, PresencePayload};
use pulselink_core::protocol::{Envelope, EnvelopeType};

use crate::config::{ClientConfig, EndpointSection};
use crate::obs::ClientMetrics;
use crate::transport::{is_auth_rejection, Connector, Frame, Link, LinkEvent, CLOSE_NORMAL};

use super::backoff::ReconnectPolicy;
use super::registry::{ListenerRegistry, Subscription, Topic};

/// Connectivity as seen by the product layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Never connected in this session.
    Idle,
    Connecting,
    Connected,
    /// Waiting `delay` before retry number `attempt` (1-based).
    Reconnecting { attempt: u32, delay: Duration },
    /// Retry ceiling exceeded; needs an explicit `connect` or foreground resume.
    Offline,
    /// Closed by `disconnect`; never reconnects.
    Closed,
    /// Token refused by the server; the product layer must re-login.
    AuthRejected,
}

/// Outcome of `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Queued,
}

/// Host application lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    Foreground,
    Background,
}

/// Receives every decoded inbound envelope in place of the default dispatch.
pub trait InboundRoute: Send + Sync {
    fn route(&self, env: Envelope);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub status: ConnectionStatus,
    pub attempt: u32,
    pub queued: usize,
    pub heartbeat_running: bool,
}

struct LinkState {
    status: ConnectionStatus,
    token: Option<String>,
    attempt: u32,
    /// Bumped on every open and on disconnect; events of older links are ignored.
    generation: u64,
    link: Option<mpsc::UnboundedSender<Frame>>,
    queue: VecDeque<Envelope>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

struct Inner {
    user_id: String,
    endpoint: EndpointSection,
    heartbeat_every: Duration,
    policy: ReconnectPolicy,
    max_queued: Option<usize>,
    connector: Arc<dyn Connector>,
    state: Mutex<LinkState>,
    listeners: Arc<ListenerRegistry>,
    route: RwLock<Option<Weak<dyn InboundRoute>>>,
    status_tx: watch::Sender<ConnectionStatus>,
    metrics: Arc<ClientMetrics>,
}

/// Handle to the session's signaling channel. Cheap to clone; all clones
/// share one channel.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        cfg: &ClientConfig,
        user_id: impl Into<String>,
        connector: Arc<dyn Connector>,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                user_id: user_id.into(),
                endpoint: cfg.endpoint.clone(),
                heartbeat_every: cfg.heartbeat.interval(),
                policy: ReconnectPolicy::from(&cfg.reconnect),
                max_queued: cfg.outbound.max_queued,
                connector,
                state: Mutex::new(LinkState {
                    status: ConnectionStatus::Idle,
                    token: None,
                    attempt: 0,
                    generation: 0,
                    link: None,
                    queue: VecDeque::new(),
                    heartbeat: None,
                    reconnect: None,
                }),
                listeners: Arc::new(ListenerRegistry::new()),
                route: RwLock::new(None),
                status_tx,
                metrics,
            }),
        }
    }

    /// Local user identifier sent in the authentication handshake.
    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// Open the channel with `token`. No-op while connected or while an
    /// open is in flight. Transport failures are retried in the background
    /// and do not surface here; a rejected token returns `AuthFailed`.
    pub async fn connect(&self, token: impl Into<String>) -> Result<()> {
        {
            let mut st = self.inner.lock();
            match st.status {
                ConnectionStatus::Connected | ConnectionStatus::Connecting => {
                    tracing::debug!(status = ?st.status, "connect ignored");
                    return Ok(());
                }
                ConnectionStatus::Reconnecting { .. } => {
                    if let Some(h) = st.reconnect.take() {
                        h.abort();
                    }
                }
                ConnectionStatus::Idle
                | ConnectionStatus::Offline
                | ConnectionStatus::Closed
                | ConnectionStatus::AuthRejected => st.attempt = 0,
            }
            st.token = Some(token.into());
            self.inner.set_status(&mut st, ConnectionStatus::Connecting);
        }
        self.inner.open_link().await
    }

    /// Permanently stop the channel (logout). Cancels heartbeat and any
    /// pending reconnect, closes with a normal-closure code, and discards
    /// queued envelopes.
    pub fn disconnect(&self) {
        let mut st = self.inner.lock();
        st.attempt = self.inner.policy.max_attempts;
        st.generation += 1;
        st.token = None;
        if let Some(h) = st.heartbeat.take() {
            h.abort();
        }
        if let Some(h) = st.reconnect.take() {
            h.abort();
        }
        if let Some(tx) = st.link.take() {
            let _ = tx.send(Frame::Close { code: CLOSE_NORMAL, reason: "logout".into() });
        }
        if !st.queue.is_empty() {
            tracing::info!(dropped = st.queue.len(), "discarding queued envelopes at logout");
            st.queue.clear();
        }
        self.inner.set_status(&mut st, ConnectionStatus::Closed);
    }

    /// Transmit now if the channel is open, otherwise queue for the next
    /// successful (re)connect.
    pub fn send(&self, payload: Payload) -> Result<Delivery> {
        self.inner.send(payload)
    }

    pub fn is_connected(&self) -> bool {
        let st = self.inner.lock();
        st.status == ConnectionStatus::Connected && st.link.is_some()
    }

    /// Register a listener for one envelope type.
    pub fn on<F>(&self, kind: EnvelopeType, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.subscribe(Topic::Kind(kind), handler)
    }

    /// Register a listener for every dispatched envelope.
    pub fn on_any<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.subscribe(Topic::Any, handler)
    }

    fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = self.inner.listeners.subscribe(topic, Arc::new(handler));
        Subscription::new(topic, id, &self.inner.listeners)
    }

    /// Notify listeners registered for the envelope's type, then wildcard ones.
    pub fn dispatch(&self, env: &Envelope) {
        self.inner.dispatch(env);
    }

    /// Install the inbound route (the signaling router). Held weakly.
    pub fn set_route(&self, route: Weak<dyn InboundRoute>) {
        if let Ok(mut r) = self.inner.route.write() {
            *r = Some(route);
        }
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let st = self.inner.lock();
        ConnectionSnapshot {
            status: st.status.clone(),
            attempt: st.attempt,
            queued: st.queue.len(),
            heartbeat_running: st.heartbeat.as_ref().is_some_and(|h| !h.is_finished()),
        }
    }

    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        &self.inner.metrics
    }

    /// Foreground resume reconnects right away (fresh attempt budget) if the
    /// channel is down and the session is still logged in.
    pub async fn handle_lifecycle(&self, event: AppLifecycle) -> Result<()> {
        match event {
            AppLifecycle::Background => {
                tracing::debug!("app backgrounded");
                Ok(())
            }
            AppLifecycle::Foreground => {
                {
                    let mut st = self.inner.lock();
                    if st.token.is_none() {
                        return Ok(());
                    }
                    if matches!(st.status, ConnectionStatus::Connected | ConnectionStatus::Connecting) {
                        return Ok(());
                    }
                    tracing::info!(status = ?st.status, "foreground with channel down; reconnecting");
                    if let Some(h) = st.reconnect.take() {
                        h.abort();
                    }
                    st.attempt = 0;
                    self.inner.set_status(&mut st, ConnectionStatus::Connecting);
                }
                self.inner.open_link().await
            }
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_status(&self, st: &mut LinkState, status: ConnectionStatus) {
        if st.status != status {
            tracing::info!(from = ?st.status, to = ?status, "connection status");
        }
        st.status = status.clone();
        self.status_tx.send_replace(status);
    }

    async fn open_link(self: &Arc<Self>) -> Result<()> {
        let (uri, generation) = {
            let mut st = self.lock();
            let Some(token) = st.token.clone() else {
                self.set_status(&mut st, ConnectionStatus::Offline);
                return Err(PulseError::Internal("open without a session token".into()));
            };
            let uri = match self.endpoint.connect_uri(&token) {
                Ok(uri) => uri,
                Err(e) => {
                    self.set_status(&mut st, ConnectionStatus::Offline);
                    return Err(e);
                }
            };
            st.generation += 1;
            (uri, st.generation)
        };

        tracing::debug!(generation, "opening signaling channel");
        match self.connector.open(&uri).await {
            Ok(link) => {
                self.on_open(generation, link);
                Ok(())
            }
            Err(PulseError::AuthFailed) => {
                let mut st = self.lock();
                if st.generation == generation {
                    tracing::error!(generation, "signaling token rejected during upgrade");
                    self.reject_session(&mut st);
                }
                Err(PulseError::AuthFailed)
            }
            Err(e) => {
                tracing::warn!(error = %e, generation, "signaling channel open failed");
                let mut st = self.lock();
                if st.generation == generation && st.status == ConnectionStatus::Connecting {
                    self.schedule_reconnect(&mut st);
                }
                Ok(())
            }
        }
    }

    fn on_open(self: &Arc<Self>, generation: u64, link: Link) {
        let Link { outbound, inbound } = link;
        let mut st = self.lock();
        if st.generation != generation || st.status != ConnectionStatus::Connecting {
            tracing::debug!(generation, "opened link superseded; closing it");
            let _ = outbound.send(Frame::Close { code: CLOSE_NORMAL, reason: "superseded".into() });
            return;
        }

        // handshake first, then everything queued while offline, in order
        let auth = Envelope::new(Payload::Connect(ConnectPayload { user_id: self.user_id.clone() }));
        if let Err(e) = self.transmit(&outbound, &auth) {
            tracing::error!(error = %e, "auth envelope encode failed");
        }
        let mut flushed = 0usize;
        while let Some(env) = st.queue.pop_front() {
            match self.transmit(&outbound, &env) {
                Ok(true) => flushed += 1,
                Ok(false) => {
                    st.queue.push_front(env);
                    break;
                }
                Err(e) => tracing::warn!(error = %e, kind = %env.kind(), "dropping unencodable queued envelope"),
            }
        }

        st.attempt = 0;
        st.link = Some(outbound);
        st.heartbeat = Some(self.spawn_heartbeat());
        self.spawn_reader(generation, inbound);
        self.set_status(&mut st, ConnectionStatus::Connected);
        tracing::info!(generation, flushed, "signaling channel connected");
    }

    fn spawn_reader(self: &Arc<Self>, generation: u64, mut inbound: mpsc::UnboundedReceiver<LinkEvent>) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let (code, reason) = loop {
                match inbound.recv().await {
                    Some(LinkEvent::Text(text)) => {
                        let Some(inner) = weak.upgrade() else { return; };
                        inner.handle_text(&text);
                    }
                    Some(LinkEvent::Closed { code, reason }) => break (code, reason),
                    None => break (None, "link dropped".to_string()),
                }
            };
            if let Some(inner) = weak.upgrade() {
                inner.on_link_lost(generation, code, &reason);
            }
        });
    }

    fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let every = self.heartbeat_every;
        tokio::spawn(async move {
            let mut tick = interval_at(Instant::now() + every, every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let Some(inner) = weak.upgrade() else { break; };
                let beat = Payload::Presence(PresencePayload::online(inner.user_id.clone()));
                if let Err(e) = inner.send(beat) {
                    tracing::warn!(error = %e, "heartbeat send failed");
                }
            }
        })
    }

    fn handle_text(&self, text: &str) {
        let env = match Envelope::decode(text) {
            Ok(env) => env,
            Err(PulseError::UnknownType(t)) => {
                tracing::debug!(msg_type = %t, "dropping envelope of unknown type");
                self.metrics.inbound_dropped.inc(&[("reason", "unknown_type")]);
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed envelope");
                self.metrics.inbound_dropped.inc(&[("reason", "malformed")]);
                return;
            }
        };
        self.metrics.inbound.inc(&[("type", env.kind().as_str())]);

        let route = self
            .route
            .read()
            .ok()
            .and_then(|r| r.as_ref().and_then(Weak::upgrade));
        match route {
            Some(route) => route.route(env),
            None => self.dispatch(&env),
        }
    }

    fn dispatch(&self, env: &Envelope) {
        let panics = self.listeners.dispatch(env);
        if panics > 0 {
            self.metrics
                .listener_panics
                .add(&[("type", env.kind().as_str())], panics as u64);
        }
    }

    fn on_link_lost(self: &Arc<Self>, generation: u64, code: Option<u16>, reason: &str) {
        let mut st = self.lock();
        if st.generation != generation || st.status != ConnectionStatus::Connected {
            return;
        }
        st.link = None;
        if let Some(h) = st.heartbeat.take() {
            h.abort();
        }

        if is_auth_rejection(code) {
            tracing::error!(?code, reason, "server rejected session token; not reconnecting");
            self.reject_session(&mut st);
            return;
        }

        tracing::warn!(?code, reason, "signaling channel closed unexpectedly");
        self.schedule_reconnect(&mut st);
    }

    fn reject_session(&self, st: &mut LinkState) {
        st.token = None;
        st.attempt = self.policy.max_attempts;
        if let Some(h) = st.reconnect.take() {
            h.abort();
        }
        self.set_status(st, ConnectionStatus::AuthRejected);
    }

    fn schedule_reconnect(self: &Arc<Self>, st: &mut LinkState) {
        let Some(delay) = self.policy.delay_for(st.attempt) else {
            tracing::warn!(attempts = st.attempt, "reconnect attempts exhausted");
            self.metrics.reconnects.inc(&[("outcome", "exhausted")]);
            self.set_status(st, ConnectionStatus::Offline);
            return;
        };
        st.attempt += 1;
        let attempt = st.attempt;
        self.metrics.reconnects.inc(&[("outcome", "scheduled")]);
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        self.set_status(st, ConnectionStatus::Reconnecting { attempt, delay });

        let weak = Arc::downgrade(self);
        // the previous handle, if any, belongs to a timer that already fired
        st.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return; };
            {
                let mut st = inner.lock();
                if !matches!(st.status, ConnectionStatus::Reconnecting { .. }) {
                    return;
                }
                inner.set_status(&mut st, ConnectionStatus::Connecting);
            }
            if let Err(e) = inner.open_link().await {
                tracing::warn!(error = %e, attempt, "reconnect failed");
            }
        }));
    }

    fn send(&self, payload: Payload) -> Result<Delivery> {
        let env = Envelope::new(payload);
        let kind = env.kind();
        let mut st = self.lock();

        if st.status == ConnectionStatus::Closed {
            return Err(PulseError::Transport("channel closed by logout".into()));
        }

        if st.status == ConnectionStatus::Connected {
            if let Some(tx) = st.link.as_ref() {
                if self.transmit(tx, &env)? {
                    return Ok(Delivery::Sent);
                }
            }
        }

        if let Some(max) = self.max_queued {
            while st.queue.len() >= max {
                let Some(old) = st.queue.pop_front() else { break; };
                tracing::warn!(kind = %old.kind(), max, "outbound queue full; dropping oldest");
                self.metrics.outbound.inc(&[("type", old.kind().as_str()), ("outcome", "dropped")]);
            }
        }
        st.queue.push_back(env);
        self.metrics.outbound.inc(&[("type", kind.as_str()), ("outcome", "queued")]);
        tracing::debug!(%kind, queued = st.queue.len(), "envelope queued while offline");
        Ok(Delivery::Queued)
    }

    /// `Ok(false)` when the link is gone (the close event follows).
    fn transmit(&self, tx: &mpsc::UnboundedSender<Frame>, env: &Envelope) -> Result<bool> {
        let text = env.encode()?;
        if tx.send(Frame::Text(text)).is_err() {
            return Ok(false);
        }
        self.metrics.outbound.inc(&[("type", env.kind().as_str()), ("outcome", "sent")]);
        Ok(true)
    }
}
