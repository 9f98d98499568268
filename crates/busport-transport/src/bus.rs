//! In-process broadcast hub.
//!
//! A [`LocalBus`] behaves like a shared window or broadcast channel: every
//! value posted by one attached endpoint is delivered to every other
//! attached endpoint whose origin matches, and (by default) back to the
//! poster too.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, trace};

use crate::dispatcher::DispatchHandle;
use crate::error::{Result, TransportError};
use crate::event::{Listener, ListenerId, ListenerRegistry, MessageEvent, SourceId};
use crate::primitive::{origin_matches, Primitive};
use crate::sync::lock;

/// Bus delivery behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Deliver posts back to the posting endpoint (window semantics).
    /// When false, a poster never sees its own posts (broadcast-channel semantics).
    pub echo_to_sender: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            echo_to_sender: true,
        }
    }
}

struct Attached {
    source: SourceId,
    origin: String,
    registry: Arc<ListenerRegistry>,
}

struct BusShared {
    config: BusConfig,
    dispatch: DispatchHandle,
    attached: Mutex<Vec<Attached>>,
}

/// Shared in-process broadcast hub. Cheap to clone.
#[derive(Clone)]
pub struct LocalBus {
    shared: Arc<BusShared>,
}

impl LocalBus {
    pub fn new(dispatch: DispatchHandle) -> Self {
        Self::with_config(dispatch, BusConfig::default())
    }

    pub fn with_config(dispatch: DispatchHandle, config: BusConfig) -> Self {
        Self {
            shared: Arc::new(BusShared {
                config,
                dispatch,
                attached: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Attach a new endpoint with the given origin.
    pub fn endpoint(&self, origin: impl Into<String>) -> BusEndpoint {
        let origin = origin.into();
        let source = SourceId::next();
        let registry = Arc::new(ListenerRegistry::new());
        lock(&self.shared.attached).push(Attached {
            source,
            origin: origin.clone(),
            registry: Arc::clone(&registry),
        });
        debug!(%source, origin = %origin, "endpoint attached to bus");
        BusEndpoint {
            inner: Arc::new(EndpointInner {
                bus: Arc::clone(&self.shared),
                source,
                origin,
                registry,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of endpoints currently attached.
    pub fn endpoint_count(&self) -> usize {
        lock(&self.shared.attached).len()
    }

    pub fn config(&self) -> BusConfig {
        self.shared.config
    }
}

struct EndpointInner {
    bus: Arc<BusShared>,
    source: SourceId,
    origin: String,
    registry: Arc<ListenerRegistry>,
    closed: AtomicBool,
}

/// One endpoint attached to a [`LocalBus`].
///
/// Clones share the same identity and listener set, like two scripts holding
/// a reference to the same window.
#[derive(Clone)]
pub struct BusEndpoint {
    inner: Arc<EndpointInner>,
}

impl BusEndpoint {
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of listeners registered on this endpoint.
    pub fn listener_count(&self) -> usize {
        self.inner.registry.len()
    }
}

impl Primitive for BusEndpoint {
    fn source(&self) -> SourceId {
        self.inner.source
    }

    fn origin(&self) -> &str {
        &self.inner.origin
    }

    fn post_message(&self, data: Value, target_origin: Option<&str>) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let bus = &self.inner.bus;
        let attached = lock(&bus.attached);
        let mut delivered = 0usize;
        for endpoint in attached.iter() {
            if endpoint.source == self.inner.source && !bus.config.echo_to_sender {
                continue;
            }
            if !origin_matches(target_origin, &endpoint.origin) {
                continue;
            }
            bus.dispatch.deliver(
                Arc::clone(&endpoint.registry),
                MessageEvent::new(data.clone(), self.inner.source, self.inner.origin.clone()),
            );
            delivered += 1;
        }
        trace!(source = %self.inner.source, delivered, "posted to bus");
        Ok(())
    }

    fn add_event_listener(&self, listener: Listener) -> ListenerId {
        self.inner.registry.add(listener)
    }

    fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.inner.registry.remove(id)
    }

    fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        lock(&self.inner.bus.attached).retain(|endpoint| endpoint.source != self.inner.source);
        self.inner.registry.clear();
        debug!(source = %self.inner.source, "endpoint detached from bus");
    }

    fn primitive_name(&self) -> &'static str {
        "local-bus"
    }
}
