//! Signaling Router: single inbound hook on the connection manager that
//! sends call signals to the call controller and everything else to the
//! generic listeners.

mod router;

pub use router::{IncomingCallHandler, SignalingRouter};
