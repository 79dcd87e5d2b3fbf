//! Physical channel adapters.
//!
//! The connection manager only sees a `Link`: an ordered outbound frame
//! channel and an inbound event channel. Adapters own the actual socket.
//! - `ws`: WebSocket client (tokio-tungstenite)
//! - `memory`: in-process loopback for tests and embedders

pub mod codec;
pub mod memory;
pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;

use pulselink_core::error::Result;

pub use memory::{MemoryConnector, MemoryPeer, MemoryServer};
pub use ws::WsConnector;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close codes a server uses to reject the session token.
pub const AUTH_REJECTED_CLOSE_CODES: [u16; 3] = [1008, 4001, 4401];

pub fn is_auth_rejection(code: Option<u16>) -> bool {
    code.is_some_and(|c| AUTH_REJECTED_CLOSE_CODES.contains(&c))
}

/// Outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Inbound event. `Closed` is the last event a link delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Text(String),
    Closed { code: Option<u16>, reason: String },
}

/// One open physical channel.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Opens physical channels. `AuthFailed` means the token was refused during
/// the upgrade; any other error is a transport failure and will be retried.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, uri: &str) -> Result<Link>;
}
