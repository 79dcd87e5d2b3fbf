//! In-process loopback transport.
//!
//! `MemoryConnector` hands each opened link to a `MemoryServer`, which plays
//! the signaling endpoint: it sees the URI (and so the token), reads the
//! client's frames, and can push envelopes or close the link with any code.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use pulselink_core::error::{PulseError, Result};
use pulselink_core::protocol::Envelope;

use super::{Connector, Frame, Link, LinkEvent};

#[derive(Default)]
struct Shared {
    refusals: Mutex<VecDeque<PulseError>>,
    open_attempts: AtomicUsize,
}

/// Client half: implements `Connector`.
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    shared: Arc<Shared>,
}

/// Server half: accepts links opened by the paired connector.
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    shared: Arc<Shared>,
}

impl MemoryConnector {
    pub fn pair() -> (MemoryConnector, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        (
            MemoryConnector { accept_tx, shared: Arc::clone(&shared) },
            MemoryServer { accept_rx, shared },
        )
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, uri: &str) -> Result<Link> {
        self.shared.open_attempts.fetch_add(1, Ordering::SeqCst);

        let refusal = self.shared.refusals.lock().ok().and_then(|mut q| q.pop_front());
        if let Some(err) = refusal {
            return Err(err);
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer { uri: uri.to_string(), from_client: out_rx, to_client: in_tx };
        self.accept_tx
            .send(peer)
            .map_err(|_| PulseError::Transport("memory server is gone".into()))?;

        Ok(Link { outbound: out_tx, inbound: in_rx })
    }
}

impl MemoryServer {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Fail the next `n` opens with a transport error.
    pub fn refuse_next(&self, n: usize) {
        if let Ok(mut q) = self.shared.refusals.lock() {
            for _ in 0..n {
                q.push_back(PulseError::Transport("connection refused".into()));
            }
        }
    }

    /// Fail the next open as if the token were rejected during the upgrade.
    pub fn reject_auth_next(&self) {
        if let Ok(mut q) = self.shared.refusals.lock() {
            q.push_back(PulseError::AuthFailed);
        }
    }

    /// Opens attempted so far, refused ones included.
    pub fn open_attempts(&self) -> usize {
        self.shared.open_attempts.load(Ordering::SeqCst)
    }
}

/// Server-side view of one link.
pub struct MemoryPeer {
    pub uri: String,
    from_client: mpsc::UnboundedReceiver<Frame>,
    to_client: mpsc::UnboundedSender<LinkEvent>,
}

impl MemoryPeer {
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Next text frame decoded as an envelope. `None` once the client closes.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        loop {
            match self.from_client.recv().await? {
                Frame::Text(s) => match Envelope::decode(&s) {
                    Ok(env) => return Some(env),
                    Err(e) => tracing::warn!(error = %e, "memory peer got undecodable frame"),
                },
                Frame::Close { .. } => return None,
            }
        }
    }

    pub fn deliver(&self, env: &Envelope) -> Result<()> {
        self.deliver_raw(env.encode()?)
    }

    pub fn deliver_raw(&self, text: impl Into<String>) -> Result<()> {
        self.to_client
            .send(LinkEvent::Text(text.into()))
            .map_err(|_| PulseError::Transport("client side of link is gone".into()))
    }

    /// Close from the server side.
    pub fn close(self, code: Option<u16>, reason: &str) {
        let _ = self.to_client.send(LinkEvent::Closed { code, reason: reason.to_string() });
    }
}
