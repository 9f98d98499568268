//! The port multiplexer: virtual ports over one broadcast transport.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use busport_frame::{Frame, PortId, SessionId, CONNECT_TAG};
use busport_transport::sync::lock;
use busport_transport::{DispatchHandle, ListenerId, MessageEvent, Transport};
use tracing::{debug, info, warn};

use crate::error::{ChannelError, Result};
use crate::handler::{ChannelHandler, SharedHandler};
use crate::port::{PortCore, PortHandle, PortState, Teardown};

/// How `connect` decides that a port is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Open immediately after broadcasting the connect frame.
    Optimistic,
    /// Wait for the listener's accept frame, failing after `timeout`.
    Confirmed { timeout: Duration },
}

impl Default for ConnectMode {
    fn default() -> Self {
        ConnectMode::Confirmed {
            timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for a [`GenericChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelConfig {
    pub connect_mode: ConnectMode,
}

type PortKey = (PortId, SessionId);

struct ChannelState {
    closed: bool,
    listens: Vec<ListenerId>,
    ports: HashMap<PortKey, Arc<PortCore>>,
}

pub(crate) struct ChannelShared {
    transport: Arc<dyn Transport>,
    dispatch: DispatchHandle,
    config: ChannelConfig,
    state: Mutex<ChannelState>,
}

impl ChannelShared {
    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn dispatch(&self) -> &DispatchHandle {
        &self.dispatch
    }

    pub(crate) fn forget_port(&self, port: &PortId, session: &SessionId) {
        lock(&self.state)
            .ports
            .remove(&(port.clone(), session.clone()));
    }

    fn insert_port(&self, core: &Arc<PortCore>) -> Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(ChannelError::Closed);
        }
        state.ports.insert(
            (core.port().clone(), core.session().clone()),
            Arc::clone(core),
        );
        Ok(())
    }

    /// Handle a connect frame that matched a `listen` registration.
    fn accept_connect(
        self: &Arc<Self>,
        name: &str,
        port: PortId,
        factory: &(dyn Fn() -> SharedHandler + Send + Sync),
    ) {
        {
            let state = lock(&self.state);
            if state.closed {
                return;
            }
            let duplicate = state
                .ports
                .values()
                .any(|core| core.is_server() && core.port() == &port);
            if duplicate {
                debug!(name, %port, "ignoring duplicate connect");
                return;
            }
        }

        let session = SessionId::generate();
        let core = PortCore::create(
            name.to_string(),
            port.clone(),
            session.clone(),
            true,
            PortState::Open,
            factory(),
            self,
        );
        if self.insert_port(&core).is_err() {
            core.teardown(Teardown::ChannelClosed);
            return;
        }

        core.send_frame(&Frame::Accept { port, id: session });
        debug!(name, port = %core.port(), "accepted connect");
        core.announce();
    }
}

/// Multiplexes virtual ports over one [`Transport`].
///
/// Cheap to clone; clones share ports and registrations.
#[derive(Clone)]
pub struct GenericChannel {
    shared: Arc<ChannelShared>,
}

impl GenericChannel {
    pub fn new(transport: Arc<dyn Transport>, dispatch: DispatchHandle) -> Self {
        Self::with_config(transport, dispatch, ChannelConfig::default())
    }

    pub fn with_config(
        transport: Arc<dyn Transport>,
        dispatch: DispatchHandle,
        config: ChannelConfig,
    ) -> Self {
        Self {
            shared: Arc::new(ChannelShared {
                transport,
                dispatch,
                config,
                state: Mutex::new(ChannelState {
                    closed: false,
                    listens: Vec::new(),
                    ports: HashMap::new(),
                }),
            }),
        }
    }

    /// Accept connects for `name`, building one handler per port.
    ///
    /// Each call adds an independent registration that stays until the
    /// channel is disconnected.
    pub fn listen<F, H>(&self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: ChannelHandler,
    {
        let name = name.into();
        let mut state = lock(&self.shared.state);
        if state.closed {
            return Err(ChannelError::Closed);
        }

        let weak: Weak<ChannelShared> = Arc::downgrade(&self.shared);
        let filter_name = name.clone();
        let factory = move || -> SharedHandler { Arc::new(Mutex::new(factory())) };
        let id = self.shared.transport.on(Arc::new(move |event: &MessageEvent| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if !shared.transport.accept(event)
                || !Frame::peek(&event.data, CONNECT_TAG, "name", &filter_name)
            {
                return;
            }
            let Some(Frame::Connect { name, port }) = Frame::decode(&event.data) else {
                return;
            };
            shared.accept_connect(&name, port, &factory);
        }));
        state.listens.push(id);
        info!(name = %name, kind = %self.shared.transport.kind(), "listening");
        Ok(())
    }

    /// Open a port to whoever listens on `name`.
    ///
    /// In optimistic mode the handler's `on_connect` runs before this
    /// returns. In confirmed mode the returned handle stays `Pending` until
    /// the listener accepts; the handler then gets `on_connect`, or
    /// `on_connect_failed` once the timeout passes.
    pub fn connect<F, H>(&self, name: impl Into<String>, factory: F) -> Result<PortHandle>
    where
        F: FnOnce() -> H,
        H: ChannelHandler,
    {
        let name = name.into();
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let port = PortId::generate();
        let raw = Frame::Connect {
            name: name.clone(),
            port: port.clone(),
        }
        .encode()?;
        self.shared.transport.send(raw)?;

        let handler: SharedHandler = Arc::new(Mutex::new(factory()));
        let state = match self.shared.config.connect_mode {
            ConnectMode::Optimistic => PortState::Open,
            ConnectMode::Confirmed { .. } => PortState::Pending,
        };
        let core = PortCore::create(
            name.clone(),
            port,
            SessionId::generate(),
            false,
            state,
            handler,
            &self.shared,
        );
        if let Err(err) = self.shared.insert_port(&core) {
            core.teardown(Teardown::ChannelClosed);
            return Err(err);
        }
        debug!(name = %name, port = %core.port(), ?state, "connecting");

        match self.shared.config.connect_mode {
            ConnectMode::Optimistic => core.announce(),
            ConnectMode::Confirmed { timeout } => {
                let weak = Arc::downgrade(&core);
                let timer = self.shared.dispatch.schedule(timeout, move || {
                    if let Some(core) = weak.upgrade() {
                        warn!(port = %core.port(), ?timeout, "connect not accepted in time");
                        core.teardown(Teardown::Timeout(timeout));
                    }
                });
                core.set_timer(timer);
            }
        }
        Ok(PortHandle::from_core(core))
    }

    /// Tear everything down: close every port (pending connects fail with
    /// [`ChannelError::Closed`]), drop all `listen` registrations, then
    /// close the transport.
    pub fn disconnect(&self) {
        let (listens, ports) = {
            let mut state = lock(&self.shared.state);
            if state.closed {
                return;
            }
            state.closed = true;
            let ports: Vec<Arc<PortCore>> = state.ports.values().cloned().collect();
            (std::mem::take(&mut state.listens), ports)
        };

        for id in listens {
            self.shared.transport.off(id);
        }
        for core in ports {
            core.teardown(Teardown::ChannelClosed);
        }
        self.shared.transport.close();
        info!(kind = %self.shared.transport.kind(), "channel disconnected");
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.state).closed
    }

    pub fn config(&self) -> ChannelConfig {
        self.shared.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.shared.transport
    }

    /// Number of open ports.
    pub fn open_ports(&self) -> usize {
        self.count_ports(PortState::Open)
    }

    /// Number of connects still waiting for an accept.
    pub fn pending_connects(&self) -> usize {
        self.count_ports(PortState::Pending)
    }

    fn count_ports(&self, wanted: PortState) -> usize {
        let ports: Vec<Arc<PortCore>> = lock(&self.shared.state).ports.values().cloned().collect();
        ports.iter().filter(|core| core.state() == wanted).count()
    }
}

impl fmt::Debug for GenericChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("GenericChannel")
            .field("kind", &self.shared.transport.kind())
            .field("closed", &state.closed)
            .field("listens", &state.listens.len())
            .field("ports", &state.ports.len())
            .finish()
    }
}
