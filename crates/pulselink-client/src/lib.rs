//! pulselink client runtime.
//!
//! Wires the physical channel, the connection manager, the signaling router
//! and the call controller into one per-session client. Consumed by the
//! probe binary (`main.rs`), by the facade crate, and by integration tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod call;
pub mod client;
pub mod config;
pub mod connection;
pub mod obs;
pub mod signaling;
pub mod transport;

pub use client::RealtimeClient;
