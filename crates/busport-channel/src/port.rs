//! Virtual ports and the handles callers hold for them.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use busport_frame::{Frame, PortId, SessionId, ACCEPT_TAG, DISCONNECT_TAG, MESSAGE_TAG};
use busport_transport::sync::lock;
use busport_transport::{
    DispatchHandle, ListenerId, MessageEvent, TimerId, Transport, TransportError,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::handler::{notify_handler, SharedHandler};
use crate::multiplexer::ChannelShared;

/// Lifecycle of a port: `Pending -> Open -> Closed`, each step taken once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortState {
    /// A confirmed connect is waiting for the listener's accept.
    Pending,
    Open,
    Closed,
}

/// Why a port is being torn down.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Teardown {
    /// `disconnect()` on the handle.
    Local,
    /// A disconnect frame from the peer.
    Remote,
    /// The owning channel was disconnected.
    ChannelClosed,
    /// No accept arrived within the connect timeout.
    Timeout(Duration),
}

impl Teardown {
    fn announces(self) -> bool {
        !matches!(self, Teardown::Remote)
    }

    fn connect_error(self, name: &str) -> ChannelError {
        let name = name.to_string();
        match self {
            Teardown::Local => ChannelError::ConnectCancelled { name },
            Teardown::Remote => ChannelError::PeerDisconnected { name },
            Teardown::ChannelClosed => ChannelError::Closed,
            Teardown::Timeout(timeout) => ChannelError::ConnectTimeout { name, timeout },
        }
    }
}

struct PortInner {
    state: PortState,
    listeners: Vec<ListenerId>,
    accept_listener: Option<ListenerId>,
    timer: Option<TimerId>,
    handler: Option<SharedHandler>,
}

pub(crate) struct PortCore {
    name: String,
    port: PortId,
    session: SessionId,
    server: bool,
    transport: Arc<dyn Transport>,
    dispatch: DispatchHandle,
    channel: Weak<ChannelShared>,
    inner: Mutex<PortInner>,
}

impl PortCore {
    /// Build a port and register its frame listeners on the transport.
    ///
    /// Client ports created by a confirmed connect start `Pending` and also
    /// listen for the matching accept frame.
    pub(crate) fn create(
        name: String,
        port: PortId,
        session: SessionId,
        server: bool,
        state: PortState,
        handler: SharedHandler,
        channel: &Arc<ChannelShared>,
    ) -> Arc<Self> {
        let core = Arc::new(Self {
            name,
            port,
            session,
            server,
            transport: Arc::clone(channel.transport()),
            dispatch: channel.dispatch().clone(),
            channel: Arc::downgrade(channel),
            inner: Mutex::new(PortInner {
                state,
                listeners: Vec::new(),
                accept_listener: None,
                timer: None,
                handler: Some(handler),
            }),
        });

        let message = core.subscribe(MESSAGE_TAG, |core, frame| {
            if let Frame::Message { message, .. } = frame {
                core.deliver(message);
            }
        });
        let disconnect = core.subscribe(DISCONNECT_TAG, |core, frame| {
            if let Frame::Disconnect { .. } = frame {
                debug!(port = %core.port, "peer disconnected port");
                core.teardown(Teardown::Remote);
            }
        });
        let accept = (state == PortState::Pending).then(|| {
            core.subscribe(ACCEPT_TAG, |core, frame| {
                if let Frame::Accept { .. } = frame {
                    core.confirm();
                }
            })
        });

        {
            let mut inner = lock(&core.inner);
            inner.listeners = vec![message, disconnect];
            inner.accept_listener = accept;
        }
        core
    }

    // Frames reach `on_frame` only if the transport trusts the event, they
    // carry `tag` for this port, and they were not sent by this port itself.
    fn subscribe(
        self: &Arc<Self>,
        tag: &'static str,
        on_frame: fn(&Arc<PortCore>, Frame),
    ) -> ListenerId {
        let weak = Arc::downgrade(self);
        self.transport.on(Arc::new(move |event: &MessageEvent| {
            let Some(core) = weak.upgrade() else {
                return;
            };
            if !core.transport.accept(event)
                || !Frame::peek(&event.data, tag, "port", core.port.as_str())
            {
                return;
            }
            let Some(frame) = Frame::decode(&event.data) else {
                return;
            };
            if frame.port() != &core.port || frame.session() == Some(&core.session) {
                return;
            }
            on_frame(&core, frame);
        }))
    }

    pub(crate) fn set_timer(&self, timer: TimerId) {
        let mut inner = lock(&self.inner);
        if inner.state == PortState::Pending {
            inner.timer = Some(timer);
        } else {
            self.dispatch.cancel(timer);
        }
    }

    pub(crate) fn port(&self) -> &PortId {
        &self.port
    }

    pub(crate) fn session(&self) -> &SessionId {
        &self.session
    }

    pub(crate) fn is_server(&self) -> bool {
        self.server
    }

    pub(crate) fn state(&self) -> PortState {
        lock(&self.inner).state
    }

    /// Hand the port to its handler. Used once the port is open.
    pub(crate) fn announce(self: &Arc<Self>) {
        let Some(handler) = lock(&self.inner).handler.clone() else {
            return;
        };
        let handle = PortHandle {
            core: Arc::clone(self),
        };
        notify_handler(&self.dispatch, handler, move |h| h.on_connect(handle));
    }

    fn confirm(self: &Arc<Self>) {
        let (accept_listener, timer) = {
            let mut inner = lock(&self.inner);
            if inner.state != PortState::Pending {
                return;
            }
            inner.state = PortState::Open;
            (inner.accept_listener.take(), inner.timer.take())
        };
        if let Some(id) = accept_listener {
            self.transport.off(id);
        }
        if let Some(timer) = timer {
            self.dispatch.cancel(timer);
        }
        debug!(name = %self.name, port = %self.port, "connect accepted");
        self.announce();
    }

    fn deliver(&self, message: Value) {
        let handler = {
            let inner = lock(&self.inner);
            if inner.state != PortState::Open {
                return;
            }
            inner.handler.clone()
        };
        if let Some(handler) = handler {
            notify_handler(&self.dispatch, handler, move |h| h.on_message(message));
        }
    }

    pub(crate) fn post(&self, message: Value) {
        if self.state() != PortState::Open {
            warn!(port = %self.port, "attempted to send message on closed port");
            return;
        }
        self.send_frame(&Frame::Message {
            port: self.port.clone(),
            id: self.session.clone(),
            message,
        });
    }

    pub(crate) fn send_frame(&self, frame: &Frame) {
        let result = frame
            .encode()
            .map_err(ChannelError::from)
            .and_then(|raw| self.transport.send(raw).map_err(ChannelError::from));
        match result {
            Ok(()) => {}
            Err(ChannelError::Transport(TransportError::Closed)) => {
                debug!(port = %self.port, frame = frame.kind(), "transport closed; frame dropped");
            }
            Err(err) => {
                warn!(port = %self.port, frame = frame.kind(), error = %err, "failed to send frame");
            }
        }
    }

    /// Close the port exactly once.
    ///
    /// Removes this port's listeners, announces the teardown to the peer
    /// unless the peer started it, then notifies the handler: `on_disconnect`
    /// for an open port, `on_connect_failed` for a pending one.
    pub(crate) fn teardown(self: &Arc<Self>, reason: Teardown) {
        let (previous, listeners, timer, handler) = {
            let mut inner = lock(&self.inner);
            if inner.state == PortState::Closed {
                return;
            }
            let previous = inner.state;
            inner.state = PortState::Closed;
            let mut listeners = std::mem::take(&mut inner.listeners);
            listeners.extend(inner.accept_listener.take());
            (previous, listeners, inner.timer.take(), inner.handler.take())
        };

        for id in listeners {
            self.transport.off(id);
        }
        if let Some(timer) = timer {
            self.dispatch.cancel(timer);
        }
        if let Some(channel) = self.channel.upgrade() {
            channel.forget_port(&self.port, &self.session);
        }
        if reason.announces() {
            self.send_frame(&Frame::Disconnect {
                port: self.port.clone(),
                id: self.session.clone(),
            });
        }
        debug!(port = %self.port, ?reason, "port closed");

        let Some(handler) = handler else {
            return;
        };
        match previous {
            PortState::Open => notify_handler(&self.dispatch, handler, |h| h.on_disconnect()),
            _ => {
                let error = reason.connect_error(&self.name);
                notify_handler(&self.dispatch, handler, move |h| h.on_connect_failed(error));
            }
        }
    }
}

/// Capability for one open port, handed to a handler's `on_connect`.
///
/// Only the multiplexer constructs handles. Clones refer to the same port.
#[derive(Clone)]
pub struct PortHandle {
    core: Arc<PortCore>,
}

impl PortHandle {
    /// Send a payload to the peer. Sends on a closed port are logged and
    /// dropped.
    pub fn post_message(&self, message: Value) {
        self.core.post(message);
    }

    /// Close the port. Idempotent.
    pub fn disconnect(&self) {
        self.core.teardown(Teardown::Local);
    }

    pub fn is_server(&self) -> bool {
        self.core.is_server()
    }

    pub fn is_client(&self) -> bool {
        !self.core.is_server()
    }

    pub fn port_id(&self) -> &PortId {
        self.core.port()
    }

    pub fn session_id(&self) -> &SessionId {
        self.core.session()
    }

    pub fn state(&self) -> PortState {
        self.core.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == PortState::Open
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub(crate) fn from_core(core: Arc<PortCore>) -> Self {
        Self { core }
    }
}

impl fmt::Debug for PortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortHandle")
            .field("name", &self.core.name)
            .field("port", &self.core.port)
            .field("server", &self.core.server)
            .field("state", &self.state())
            .finish()
    }
}
