//! pulselink core: transport-agnostic wire contracts and the shared error type.
//!
//! This crate defines the envelope format exchanged over the signaling
//! channel, the typed payloads carried by each envelope type, and the
//! call-signal vocabulary used by the call controller. It carries no
//! transport or runtime dependencies so it can be reused by clients, test
//! servers, and tooling alike.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Malformed or
//! unknown input surfaces as `PulseError` so a forward-compatible client can
//! log and drop it instead of crashing.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ErrorClass, PulseError, Result};
