//! Connection Manager: one resilient, authenticated duplex channel per
//! logged-in session, with an outbound queue, heartbeat, exponential-backoff
//! reconnection, and typed fan-out to feature listeners.

mod backoff;
mod manager;
mod registry;

pub use backoff::ReconnectPolicy;
pub use manager::{
    AppLifecycle, ConnectionManager, ConnectionSnapshot, ConnectionStatus, Delivery, InboundRoute,
};
pub use registry::{Listener, ListenerRegistry, Subscription, Topic};
