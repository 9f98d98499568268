use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::sync::lock;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of the endpoint that posted an event.
///
/// Every primitive instance gets a fresh id; validators compare against it to
/// tell their own traffic from a peer's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    /// Allocate a process-unique source id.
    pub fn next() -> Self {
        Self(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// A raw event as delivered by a messaging primitive.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    /// The posted value.
    pub data: Value,
    /// Endpoint that posted the value.
    pub source: SourceId,
    /// Origin string of the posting endpoint.
    pub origin: String,
}

impl MessageEvent {
    pub fn new(data: Value, source: SourceId, origin: impl Into<String>) -> Self {
        Self {
            data,
            source,
            origin: origin.into(),
        }
    }
}

/// Handle returned by listener registration, used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Callback invoked for every event delivered to an endpoint.
pub type Listener = Arc<dyn Fn(&MessageEvent) + Send + Sync>;

/// Add/remove listener set with DOM-like dispatch semantics.
///
/// Dispatch works on a snapshot, so listeners may add or remove listeners
/// (including themselves) while an event is being delivered. A listener
/// removed during dispatch is not invoked for that event.
pub struct ListenerRegistry {
    entries: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener.
    pub fn add(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.entries).push((id, listener));
        id
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        lock(&self.entries)
            .iter()
            .any(|(entry_id, _)| *entry_id == id)
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every registered listener.
    ///
    /// Returns the number of listeners invoked.
    pub fn dispatch(&self, event: &MessageEvent) -> usize {
        let snapshot: Vec<(ListenerId, Listener)> = lock(&self.entries).clone();
        let mut invoked = 0usize;
        for (id, listener) in snapshot {
            if !self.contains(id) {
                continue;
            }
            listener(event);
            invoked += 1;
        }
        invoked
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;

    fn event() -> MessageEvent {
        MessageEvent::new(json!({"hello": "world"}), SourceId::next(), "test")
    }

    #[test]
    fn source_ids_are_unique() {
        let a = SourceId::next();
        let b = SourceId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn dispatch_invokes_every_listener() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            registry.add(Arc::new(move |_: &MessageEvent| {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert_eq!(registry.dispatch(&event()), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = ListenerRegistry::new();
        let id = registry.add(Arc::new(|_: &MessageEvent| {}));
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn listener_removed_during_dispatch_is_skipped() {
        let registry = Arc::new(ListenerRegistry::new());
        let second_hits = Arc::new(AtomicUsize::new(0));
        let second_id = Arc::new(Mutex::new(None::<ListenerId>));

        {
            let registry_ref = Arc::clone(&registry);
            let second_id = Arc::clone(&second_id);
            registry.add(Arc::new(move |_: &MessageEvent| {
                if let Some(id) = *lock(&second_id) {
                    registry_ref.remove(id);
                }
            }));
        }
        {
            let hits = Arc::clone(&second_hits);
            let id = registry.add(Arc::new(move |_: &MessageEvent| {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
            *lock(&second_id) = Some(id);
        }

        assert_eq!(registry.dispatch(&event()), 1);
        assert_eq!(second_hits.load(Ordering::SeqCst), 0);
    }
}
