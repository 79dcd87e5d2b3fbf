//! WebSocket message <-> link frame mapping.

use std::borrow::Cow;

use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use super::{Frame, LinkEvent};

#[derive(Debug)]
pub enum Inbound {
    Event(LinkEvent),
    Ping(Vec<u8>),
    Ignore,
}

pub fn decode(msg: Message) -> Inbound {
    match msg {
        Message::Text(s) => Inbound::Event(LinkEvent::Text(s)),
        // some servers send JSON in binary frames
        Message::Binary(b) => match String::from_utf8(b) {
            Ok(s) => Inbound::Event(LinkEvent::Text(s)),
            Err(_) => Inbound::Ignore,
        },
        Message::Ping(v) => Inbound::Ping(v),
        Message::Pong(_) | Message::Frame(_) => Inbound::Ignore,
        Message::Close(frame) => Inbound::Event(LinkEvent::Closed {
            code: frame.as_ref().map(|f| u16::from(f.code)),
            reason: frame.map(|f| f.reason.into_owned()).unwrap_or_default(),
        }),
    }
}

pub fn encode(frame: Frame) -> Message {
    match frame {
        Frame::Text(s) => Message::Text(s),
        Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason),
        })),
    }
}
