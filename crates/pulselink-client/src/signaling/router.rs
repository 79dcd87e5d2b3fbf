use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use pulselink_core::error::Result;
use pulselink_core::protocol::{CallId, CallScope, CallSignal, Envelope, SignalKind};

use crate::connection::{ConnectionManager, Delivery, InboundRoute};

/// Invoked with an inbound offer while no call controller is bound.
pub type IncomingCallHandler = Arc<dyn Fn(CallSignal) + Send + Sync>;

pub struct SignalingRouter {
    conn: ConnectionManager,
    calls: RwLock<Option<mpsc::UnboundedSender<CallSignal>>>,
    incoming: RwLock<Option<IncomingCallHandler>>,
}

impl SignalingRouter {
    /// Create the router and install it as the manager's inbound route.
    pub fn attach(conn: &ConnectionManager) -> Arc<Self> {
        let router = Arc::new(Self {
            conn: conn.clone(),
            calls: RwLock::new(None),
            incoming: RwLock::new(None),
        });
        let route: Arc<dyn InboundRoute> = router.clone();
        conn.set_route(Arc::downgrade(&route));
        router
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.conn
    }

    /// Bind the call controller's signal inbox. Signals arrive in wire order.
    pub fn bind_calls(&self, tx: mpsc::UnboundedSender<CallSignal>) {
        if let Ok(mut calls) = self.calls.write() {
            if calls.is_some() {
                tracing::warn!("replacing bound call controller");
            }
            *calls = Some(tx);
        }
    }

    /// Unbind `tx` if it is still the bound inbox. A controller that was
    /// already replaced leaves its successor bound.
    pub fn unbind_calls(&self, tx: &mpsc::UnboundedSender<CallSignal>) -> bool {
        let Ok(mut calls) = self.calls.write() else { return false; };
        if calls.as_ref().is_some_and(|bound| bound.same_channel(tx)) {
            *calls = None;
            return true;
        }
        false
    }

    pub fn on_incoming_call<F>(&self, handler: F)
    where
        F: Fn(CallSignal) + Send + Sync + 'static,
    {
        if let Ok(mut incoming) = self.incoming.write() {
            *incoming = Some(Arc::new(handler));
        }
    }

    /// Wrap a call signal addressed to `target` and hand it to the
    /// connection manager (sent now or queued).
    pub fn send_signal(&self, target: &str, call_id: &CallId, kind: SignalKind) -> Result<Delivery> {
        let signal = CallSignal {
            scope: CallScope {
                target_user_id: target.to_string(),
                call_id: call_id.clone(),
                from_user_id: Some(self.conn.user_id().to_string()),
            },
            kind,
        };
        let kind = signal.kind.envelope_type();
        let delivery = self.conn.send(signal.into_payload())?;
        tracing::debug!(%kind, %call_id, target, ?delivery, "call signal sent");
        Ok(delivery)
    }

    fn deliver_call(&self, signal: CallSignal) {
        let bound = self.calls.read().ok().and_then(|c| c.clone());
        let signal = match bound {
            Some(tx) => match tx.send(signal) {
                Ok(()) => return,
                Err(mpsc::error::SendError(signal)) => signal,
            },
            None => signal,
        };

        if matches!(signal.kind, SignalKind::Offer { .. }) {
            let handler = self.incoming.read().ok().and_then(|h| h.clone());
            if let Some(handler) = handler {
                handler(signal);
                return;
            }
        }
        tracing::debug!(
            kind = %signal.kind.envelope_type(),
            call_id = %signal.call_id(),
            "call signal with no active call handler; dropped"
        );
    }
}

impl InboundRoute for SignalingRouter {
    fn route(&self, env: Envelope) {
        if !env.kind().is_call_signal() {
            self.conn.dispatch(&env);
            return;
        }
        match CallSignal::from_payload(&env.payload) {
            Some(signal) => self.deliver_call(signal),
            None => tracing::warn!(kind = %env.kind(), "call envelope without call payload"),
        }
    }
}
