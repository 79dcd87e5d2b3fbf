//! WebSocket connector.
//!
//! Responsibilities:
//! - Upgrade to WS against the signaling endpoint (token already in the URI)
//! - Map a 401/403 upgrade response to `AuthFailed`
//! - Pump task: outbound writer + inbound reader in one `select!` loop,
//!   answering pings, reporting the close code exactly once

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};

use pulselink_core::error::{PulseError, Result};

use super::codec::{decode, encode, Inbound};
use super::{Connector, Frame, Link, LinkEvent};

#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, uri: &str) -> Result<Link> {
        let (socket, _resp) = match tokio_tungstenite::connect_async(uri).await {
            Ok(ok) => ok,
            Err(tungstenite::Error::Http(resp)) if matches!(resp.status().as_u16(), 401 | 403) => {
                return Err(PulseError::AuthFailed);
            }
            Err(e) => return Err(PulseError::Transport(format!("websocket connect failed: {e}"))),
        };

        let (out_tx, out_rx) = mpsc::unbounded_channel::<Frame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<LinkEvent>();
        tokio::spawn(pump(socket, out_rx, in_tx));

        Ok(Link { outbound: out_tx, inbound: in_rx })
    }
}

async fn pump<S>(
    socket: tokio_tungstenite::WebSocketStream<S>,
    mut out_rx: mpsc::UnboundedReceiver<Frame>,
    in_tx: mpsc::UnboundedSender<LinkEvent>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_tx, mut ws_rx) = socket.split();

    let closed = loop {
        tokio::select! {
            // outbound writer
            maybe_out = out_rx.recv() => {
                match maybe_out {
                    Some(frame @ Frame::Close { .. }) => {
                        let _ = ws_tx.send(encode(frame)).await;
                        let _ = ws_tx.close().await;
                        // locally initiated: nobody is waiting for a close event
                        return;
                    }
                    Some(frame) => {
                        if let Err(e) = ws_tx.send(encode(frame)).await {
                            break LinkEvent::Closed { code: None, reason: format!("write failed: {e}") };
                        }
                    }
                    // manager dropped the link
                    None => {
                        let _ = ws_tx.close().await;
                        return;
                    }
                }
            }

            // inbound reader
            incoming = ws_rx.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => break LinkEvent::Closed { code: None, reason: format!("read failed: {e}") },
                    None => break LinkEvent::Closed { code: None, reason: "stream ended".into() },
                };
                match decode(msg) {
                    Inbound::Event(ev @ LinkEvent::Closed { .. }) => break ev,
                    Inbound::Event(ev) => {
                        if in_tx.send(ev).is_err() {
                            return;
                        }
                    }
                    Inbound::Ping(payload) => {
                        let _ = ws_tx.send(Message::Pong(payload)).await;
                    }
                    Inbound::Ignore => {}
                }
            }
        }
    };

    tracing::debug!(?closed, "websocket pump finished");
    let _ = in_tx.send(closed);
}
