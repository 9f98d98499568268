//! Transport adapters: the narrow capability channels are built on.
//!
//! An adapter wraps one [`Primitive`] and decides two things: how a raw value
//! is posted, and which incoming events are trusted. The variant is always
//! chosen explicitly through [`TransportConfig`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Result, TransportError};
use crate::event::{Listener, ListenerId, MessageEvent};
use crate::primitive::Primitive;

/// Capability interface consumed by the channel layer.
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Best-effort broadcast of a raw value.
    fn send(&self, raw: Value) -> Result<()>;

    /// Register a listener for raw events. Listeners see every event and
    /// must filter with [`Transport::accept`] themselves.
    fn on(&self, listener: Listener) -> ListenerId;

    /// Remove a listener. Returns false if it was already gone.
    fn off(&self, id: ListenerId) -> bool;

    /// Whether an event comes from a trusted peer.
    fn accept(&self, event: &MessageEvent) -> bool;

    fn close(&self);
}

/// The closed set of adapter variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportKind {
    #[default]
    Generic,
    Window,
    Worker,
    Broadcast,
}

impl TransportKind {
    pub const ALL: [TransportKind; 4] = [
        TransportKind::Generic,
        TransportKind::Window,
        TransportKind::Worker,
        TransportKind::Broadcast,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Generic => "generic",
            TransportKind::Window => "window",
            TransportKind::Worker => "worker",
            TransportKind::Broadcast => "broadcast",
        }
    }

    /// Wrap `primitive` in the adapter for this kind.
    pub fn build(self, primitive: Arc<dyn Primitive>) -> Arc<dyn Transport> {
        match self {
            TransportKind::Generic => Arc::new(GenericTransport::new(primitive)),
            TransportKind::Window => Arc::new(WindowTransport::new(primitive)),
            TransportKind::Worker => Arc::new(WorkerTransport::new(primitive)),
            TransportKind::Broadcast => Arc::new(BroadcastTransport::new(primitive)),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        TransportKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| TransportError::UnknownKind(s.to_string()))
    }
}

/// Adapter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportConfig {
    pub kind: TransportKind,
}

impl TransportConfig {
    pub fn build(&self, primitive: Arc<dyn Primitive>) -> Arc<dyn Transport> {
        self.kind.build(primitive)
    }
}

/// Posts with no target origin and trusts every event.
pub struct GenericTransport {
    primitive: Arc<dyn Primitive>,
}

impl GenericTransport {
    pub fn new(primitive: Arc<dyn Primitive>) -> Self {
        Self { primitive }
    }
}

impl Transport for GenericTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Generic
    }

    fn send(&self, raw: Value) -> Result<()> {
        self.primitive.post_message(raw, None)
    }

    fn on(&self, listener: Listener) -> ListenerId {
        self.primitive.add_event_listener(listener)
    }

    fn off(&self, id: ListenerId) -> bool {
        self.primitive.remove_event_listener(id)
    }

    fn accept(&self, _event: &MessageEvent) -> bool {
        true
    }

    fn close(&self) {
        self.primitive.close();
    }
}

/// Window-style adapter: posts to its own origin and only trusts events
/// from the primitive's trusted source.
pub struct WindowTransport {
    primitive: Arc<dyn Primitive>,
}

impl WindowTransport {
    pub fn new(primitive: Arc<dyn Primitive>) -> Self {
        Self { primitive }
    }
}

impl Transport for WindowTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Window
    }

    fn send(&self, raw: Value) -> Result<()> {
        let origin = self.primitive.origin().to_string();
        self.primitive.post_message(raw, Some(&origin))
    }

    fn on(&self, listener: Listener) -> ListenerId {
        self.primitive.add_event_listener(listener)
    }

    fn off(&self, id: ListenerId) -> bool {
        self.primitive.remove_event_listener(id)
    }

    fn accept(&self, event: &MessageEvent) -> bool {
        event.source == self.primitive.trusted_source()
    }

    fn close(&self) {
        self.primitive.close();
    }
}

/// Dedicated worker adapter. Workers have a single peer, so every event is
/// trusted.
pub struct WorkerTransport {
    primitive: Arc<dyn Primitive>,
}

impl WorkerTransport {
    pub fn new(primitive: Arc<dyn Primitive>) -> Self {
        Self { primitive }
    }
}

impl Transport for WorkerTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Worker
    }

    fn send(&self, raw: Value) -> Result<()> {
        self.primitive.post_message(raw, None)
    }

    fn on(&self, listener: Listener) -> ListenerId {
        self.primitive.add_event_listener(listener)
    }

    fn off(&self, id: ListenerId) -> bool {
        self.primitive.remove_event_listener(id)
    }

    fn accept(&self, _event: &MessageEvent) -> bool {
        true
    }

    fn close(&self) {
        self.primitive.close();
    }
}

/// Named broadcast-channel adapter.
pub struct BroadcastTransport {
    primitive: Arc<dyn Primitive>,
}

impl BroadcastTransport {
    pub fn new(primitive: Arc<dyn Primitive>) -> Self {
        Self { primitive }
    }
}

impl Transport for BroadcastTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Broadcast
    }

    fn send(&self, raw: Value) -> Result<()> {
        self.primitive.post_message(raw, None)
    }

    fn on(&self, listener: Listener) -> ListenerId {
        self.primitive.add_event_listener(listener)
    }

    fn off(&self, id: ListenerId) -> bool {
        self.primitive.remove_event_listener(id)
    }

    fn accept(&self, _event: &MessageEvent) -> bool {
        true
    }

    fn close(&self) {
        self.primitive.close();
    }
}
