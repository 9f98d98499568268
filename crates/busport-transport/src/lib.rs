//! Messaging primitives and transport adapters.
//!
//! This is the lowest layer of busport. It provides:
//! - a single-threaded [`Dispatcher`] that every primitive delivers through
//! - the in-process broadcast [`LocalBus`]
//! - [`StreamLink`], a point-to-point primitive over Unix domain sockets
//! - the [`Transport`] capability and its four adapter variants
//!
//! Everything above this crate talks to a [`Transport`] only.

pub mod adapter;
pub mod bus;
pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod primitive;
pub mod stream;
pub mod sync;

#[cfg(unix)]
pub mod link;
#[cfg(unix)]
pub mod uds;

pub use adapter::{
    BroadcastTransport, GenericTransport, Transport, TransportConfig, TransportKind,
    WindowTransport, WorkerTransport,
};
pub use bus::{BusConfig, BusEndpoint, LocalBus};
pub use dispatcher::{DispatchHandle, Dispatcher, Task, TimerId};
pub use error::{Result, TransportError};
pub use event::{Listener, ListenerId, ListenerRegistry, MessageEvent, SourceId};
pub use primitive::{origin_matches, Primitive, ANY_ORIGIN};
pub use stream::IpcStream;

#[cfg(unix)]
pub use link::{EnvelopeReader, EnvelopeWriter, LinkConfig, LinkListener, StreamLink};
#[cfg(unix)]
pub use uds::UnixSocketListener;
