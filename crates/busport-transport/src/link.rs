//! Point-to-point primitive over a Unix domain socket.
//!
//! Each posted value travels as one length-prefixed JSON envelope. A reader
//! thread decodes incoming envelopes and queues them on the dispatcher, so
//! listeners still run on the dispatcher's thread like any other primitive.

use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::codec::{decode_envelope, encode_envelope, DEFAULT_MAX_ENVELOPE};
use crate::dispatcher::DispatchHandle;
use crate::error::{Result, TransportError};
use crate::event::{Listener, ListenerId, ListenerRegistry, MessageEvent, SourceId};
use crate::primitive::{origin_matches, Primitive};
use crate::stream::IpcStream;
use crate::sync::lock;
use crate::uds::{self, UnixSocketListener};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Configuration for a stream link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Largest envelope body accepted or sent, in bytes.
    pub max_envelope_size: usize,
    /// Origin of this side of the link.
    pub origin: String,
    /// Origin reported for events arriving from the peer.
    pub peer_origin: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_envelope_size: DEFAULT_MAX_ENVELOPE,
            origin: "link".to_string(),
            peer_origin: "link".to_string(),
        }
    }
}

/// Reads complete envelopes from any `Read` stream.
pub struct EnvelopeReader<T> {
    inner: T,
    buf: BytesMut,
    max_envelope_size: usize,
}

impl<T: Read> EnvelopeReader<T> {
    pub fn new(inner: T, max_envelope_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_envelope_size,
        }
    }

    /// Block until the next complete envelope arrives.
    ///
    /// Returns [`TransportError::ConnectionClosed`] at end of stream.
    pub fn read_envelope(&mut self) -> Result<Value> {
        loop {
            if let Some(value) = decode_envelope(&mut self.buf, self.max_envelope_size)? {
                return Ok(value);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            };
            if read == 0 {
                return Err(TransportError::ConnectionClosed);
            }
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }
}

/// Writes complete envelopes to any `Write` stream.
pub struct EnvelopeWriter<T> {
    inner: T,
    buf: BytesMut,
    max_envelope_size: usize,
}

impl<T: Write> EnvelopeWriter<T> {
    pub fn new(inner: T, max_envelope_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_envelope_size,
        }
    }

    pub fn write_envelope(&mut self, value: &Value) -> Result<()> {
        self.buf.clear();
        encode_envelope(value, self.max_envelope_size, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(TransportError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }
}

struct LinkInner {
    source: SourceId,
    peer_source: SourceId,
    origin: String,
    peer_origin: String,
    registry: Arc<ListenerRegistry>,
    writer: Mutex<EnvelopeWriter<IpcStream>>,
    control: IpcStream,
    closed: Arc<AtomicBool>,
    credentials: Option<(u32, u32, u32)>,
}

/// A [`Primitive`] carried over a connected stream. Cheap to clone.
#[derive(Clone)]
pub struct StreamLink {
    inner: Arc<LinkInner>,
}

impl StreamLink {
    /// Wrap a connected stream and start its reader thread.
    pub fn new(stream: IpcStream, dispatch: DispatchHandle, config: LinkConfig) -> Result<Self> {
        let (link, reader) = Self::paused(stream, dispatch, config)?;
        reader.start()?;
        Ok(link)
    }

    // Builds the link without reading from the peer yet, so listeners can be
    // registered before the first envelope is delivered.
    fn paused(
        stream: IpcStream,
        dispatch: DispatchHandle,
        config: LinkConfig,
    ) -> Result<(Self, PausedReader)> {
        let reader_stream = stream.try_clone()?;
        let control = stream.try_clone()?;
        let credentials = stream.peer_credentials();
        let registry = Arc::new(ListenerRegistry::new());
        let closed = Arc::new(AtomicBool::new(false));
        let peer_source = SourceId::next();

        let reader = PausedReader {
            reader: EnvelopeReader::new(reader_stream, config.max_envelope_size),
            dispatch,
            registry: Arc::clone(&registry),
            closed: Arc::clone(&closed),
            peer_source,
            peer_origin: config.peer_origin.clone(),
        };

        debug!(?credentials, "stream link established");
        let link = Self {
            inner: Arc::new(LinkInner {
                source: SourceId::next(),
                peer_source,
                origin: config.origin,
                peer_origin: config.peer_origin,
                registry,
                writer: Mutex::new(EnvelopeWriter::new(stream, config.max_envelope_size)),
                control,
                closed,
                credentials,
            }),
        };
        Ok((link, reader))
    }

    /// Connect to a [`LinkListener`] at `path`.
    pub fn connect(
        path: impl AsRef<Path>,
        dispatch: DispatchHandle,
        config: LinkConfig,
    ) -> Result<Self> {
        Self::new(uds::connect(path)?, dispatch, config)
    }

    /// `(uid, gid, pid)` of the peer process, where the platform reports it.
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        self.inner.credentials
    }

    /// True once closed locally or the peer hung up.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

struct PausedReader {
    reader: EnvelopeReader<IpcStream>,
    dispatch: DispatchHandle,
    registry: Arc<ListenerRegistry>,
    closed: Arc<AtomicBool>,
    peer_source: SourceId,
    peer_origin: String,
}

impl PausedReader {
    fn start(self) -> Result<()> {
        std::thread::Builder::new()
            .name("busport-link-reader".to_string())
            .spawn(move || self.run())?;
        Ok(())
    }

    fn run(self) {
        let PausedReader {
            mut reader,
            dispatch,
            registry,
            closed,
            peer_source,
            peer_origin,
        } = self;
        read_loop(&mut reader, &dispatch, &registry, &closed, peer_source, &peer_origin);
        closed.store(true, Ordering::Release);
    }
}

fn read_loop(
    reader: &mut EnvelopeReader<IpcStream>,
    dispatch: &DispatchHandle,
    registry: &Arc<ListenerRegistry>,
    closed: &AtomicBool,
    peer_source: SourceId,
    peer_origin: &str,
) {
    loop {
        match reader.read_envelope() {
            Ok(data) => dispatch.deliver(
                Arc::clone(registry),
                MessageEvent::new(data, peer_source, peer_origin),
            ),
            Err(TransportError::Json(err)) => {
                warn!(error = %err, "dropping undecodable envelope");
            }
            Err(TransportError::ConnectionClosed) => {
                info!("stream link closed by peer");
                break;
            }
            Err(err) => {
                if !closed.load(Ordering::Acquire) {
                    warn!(error = %err, "stream link read failed");
                }
                break;
            }
        }
    }
}

impl Primitive for StreamLink {
    fn source(&self) -> SourceId {
        self.inner.source
    }

    fn origin(&self) -> &str {
        &self.inner.origin
    }

    fn trusted_source(&self) -> SourceId {
        self.inner.peer_source
    }

    fn post_message(&self, data: Value, target_origin: Option<&str>) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if !origin_matches(target_origin, &self.inner.peer_origin) {
            debug!(?target_origin, "post not addressed to link peer; dropped");
            return Ok(());
        }
        lock(&self.inner.writer).write_envelope(&data)
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
        self.inner.registry.clear();
        if let Err(err) = self.inner.control.shutdown() {
            debug!(error = %err, "stream link shutdown failed");
        }
    }

    fn primitive_name(&self) -> &'static str {
        "stream-link"
    }
}

/// Accepts stream links on a Unix socket path.
pub struct LinkListener {
    socket: UnixSocketListener,
    dispatch: DispatchHandle,
    config: LinkConfig,
}

impl LinkListener {
    pub fn bind(path: impl AsRef<Path>, dispatch: DispatchHandle, config: LinkConfig) -> Result<Self> {
        Ok(Self {
            socket: UnixSocketListener::bind(path)?,
            dispatch,
            config,
        })
    }

    /// Block until the next peer connects.
    pub fn accept(&self) -> Result<StreamLink> {
        self.accept_with(|link| Ok::<_, TransportError>(link.clone()))
    }

    /// Block until the next peer connects and run `setup` on the new link
    /// before any of the peer's envelopes are delivered.
    ///
    /// If `setup` fails the link is closed and the error returned.
    pub fn accept_with<T, E, F>(&self, setup: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&StreamLink) -> std::result::Result<T, E>,
        E: From<TransportError>,
    {
        let stream = self.socket.accept()?;
        let (link, reader) =
            StreamLink::paused(stream, self.dispatch.clone(), self.config.clone())?;
        let value = match setup(&link) {
            Ok(value) => value,
            Err(err) => {
                link.close();
                return Err(err);
            }
        };
        if let Err(err) = reader.start() {
            link.close();
            return Err(err.into());
        }
        Ok(value)
    }

    pub fn path(&self) -> &Path {
        self.socket.path()
    }
}
