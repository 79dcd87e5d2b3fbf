//! Call Session Controller: per-call state machine over the signaling
//! router and the platform's media / peer-connectivity capabilities.
//!
//! - `state`: lifecycle states and the allowed transitions.
//! - `platform`: capability traits the host supplies (media, peer connection).
//! - `observer`: UI-facing callbacks.
//! - `session`: one call's resources and its pending-candidate buffer.
//! - `controller`: operations, inbound signal handling, watchdog.

mod controller;
mod observer;
mod platform;
mod session;
mod state;

pub use controller::{CallController, CallSnapshot};
pub use observer::{CallInfo, CallObserver, NoopObserver};
pub use platform::{
    ConnectivityState, MediaDevices, MediaStream, MediaTrack, PeerConnection, PeerConnector,
    PeerEvent, PeerEventSink, TrackKind,
};
pub use state::{CallRole, CallState};
