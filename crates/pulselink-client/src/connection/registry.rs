use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use pulselink_core::protocol::{Envelope, EnvelopeType};

/// Feature callback. Captures whatever feature state it needs; the registry
/// only notifies.
pub type Listener = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// What a listener is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Kind(EnvelopeType),
    /// Wildcard: every dispatched envelope.
    Any,
}

/// Registry of listeners by topic, each list kept in registration order.
pub struct ListenerRegistry {
    map: DashMap<Topic, Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, topic: Topic, listener: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.map.entry(topic).or_default().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, topic: Topic, id: u64) -> bool {
        let Some(mut list) = self.map.get_mut(&topic) else { return false; };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        before != list.len()
    }

    pub fn count(&self, topic: Topic) -> usize {
        self.map.get(&topic).map(|l| l.len()).unwrap_or(0)
    }

    /// Typed listeners first, then wildcard ones. Cloned out so listeners
    /// may (un)subscribe while being notified.
    fn snapshot(&self, kind: EnvelopeType) -> Vec<Listener> {
        let mut out = Vec::new();
        for topic in [Topic::Kind(kind), Topic::Any] {
            if let Some(list) = self.map.get(&topic) {
                out.extend(list.iter().map(|(_, l)| Arc::clone(l)));
            }
        }
        out
    }

    /// Notify every listener for the envelope's type. A panicking listener
    /// is logged and skipped; the rest still run. Returns the panic count.
    pub fn dispatch(&self, env: &Envelope) -> usize {
        let kind = env.kind();
        let mut panics = 0;
        for listener in self.snapshot(kind) {
            if catch_unwind(AssertUnwindSafe(|| listener(env))).is_err() {
                panics += 1;
                tracing::error!(%kind, "listener panicked during dispatch");
            }
        }
        panics
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `on`/`on_any`. Dropping it keeps the listener
/// registered; call `unsubscribe` to remove it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    topic: Topic,
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    pub(crate) fn new(topic: Topic, id: u64, registry: &Arc<ListenerRegistry>) -> Self {
        Self { topic, id, registry: Arc::downgrade(registry) }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Remove the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        self.registry
            .upgrade()
            .map(|r| r.unsubscribe(self.topic, self.id))
            .unwrap_or(false)
    }
}
