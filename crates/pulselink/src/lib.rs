//! Top-level facade crate for pulselink.
//!
//! Re-exports the wire contracts and the client runtime so users can depend on a single crate.

pub mod core {
    pub use pulselink_core::*;
}

pub mod client {
    pub use pulselink_client::*;
}
