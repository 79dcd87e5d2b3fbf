//! Session-scoped client: the single owned instance feature modules are
//! handed, instead of process-global connection state.

use std::sync::Arc;

use pulselink_core::error::Result;

use crate::call::{CallController, CallObserver, MediaDevices, PeerConnector};
use crate::config::ClientConfig;
use crate::connection::ConnectionManager;
use crate::obs::ClientMetrics;
use crate::signaling::SignalingRouter;
use crate::transport::Connector;

pub struct RealtimeClient {
    cfg: ClientConfig,
    metrics: Arc<ClientMetrics>,
    conn: ConnectionManager,
    router: Arc<SignalingRouter>,
    calls: Option<CallController>,
}

impl RealtimeClient {
    /// Created at login for `user_id`. Nothing is opened until `connect`.
    pub fn new(cfg: ClientConfig, user_id: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        let metrics = Arc::new(ClientMetrics::default());
        let conn = ConnectionManager::new(&cfg, user_id, connector, Arc::clone(&metrics));
        let router = SignalingRouter::attach(&conn);
        Self { cfg, metrics, conn, router, calls: None }
    }

    /// Enable calling with the platform's media and peer capabilities.
    /// Must run inside a Tokio runtime.
    pub fn with_calls(
        mut self,
        media: Arc<dyn MediaDevices>,
        peers: Arc<dyn PeerConnector>,
        observer: Arc<dyn CallObserver>,
    ) -> Self {
        self.calls = Some(CallController::new(
            Arc::clone(&self.router),
            &self.cfg.call,
            media,
            peers,
            observer,
            Arc::clone(&self.metrics),
        ));
        self
    }

    pub async fn connect(&self, token: impl Into<String>) -> Result<()> {
        self.conn.connect(token).await
    }

    /// Hang up any active call, then close the channel for good.
    pub async fn logout(&self) {
        if let Some(calls) = &self.calls {
            if let Err(e) = calls.end().await {
                tracing::warn!(error = %e, "ending call at logout failed");
            }
        }
        self.conn.disconnect();
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.conn
    }

    pub fn router(&self) -> &Arc<SignalingRouter> {
        &self.router
    }

    pub fn calls(&self) -> Option<&CallController> {
        self.calls.as_ref()
    }

    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &ClientConfig {
        &self.cfg
    }
}
