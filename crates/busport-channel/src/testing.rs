//! Shared fixtures for channel tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use busport_frame::Frame;
use busport_transport::sync::lock;
use busport_transport::{
    BusEndpoint, DispatchHandle, Dispatcher, LocalBus, MessageEvent, Primitive, TransportKind,
};
use serde_json::Value;

use crate::error::ChannelError;
use crate::handler::ChannelHandler;
use crate::multiplexer::{ChannelConfig, ConnectMode, GenericChannel};
use crate::port::PortHandle;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Seen {
    Connected { server: bool },
    Message(Value),
    Disconnected,
    ConnectFailed(String),
}

/// Records every callback of the handlers it builds.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    log: Arc<Mutex<Vec<Seen>>>,
    ports: Arc<Mutex<Vec<PortHandle>>>,
}

impl Recorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn handler(&self) -> RecordingHandler {
        RecordingHandler {
            recorder: self.clone(),
        }
    }

    pub(crate) fn handler_factory(&self) -> impl Fn() -> RecordingHandler + Send + Sync + 'static {
        let recorder = self.clone();
        move || recorder.handler()
    }

    pub(crate) fn seen(&self) -> Vec<Seen> {
        lock(&self.log).clone()
    }

    pub(crate) fn messages(&self) -> Vec<Value> {
        self.seen()
            .into_iter()
            .filter_map(|seen| match seen {
                Seen::Message(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn count(&self, wanted: &Seen) -> usize {
        self.seen().iter().filter(|seen| *seen == wanted).count()
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.count(&Seen::Disconnected)
    }

    pub(crate) fn connects(&self) -> usize {
        self.seen()
            .iter()
            .filter(|seen| matches!(seen, Seen::Connected { .. }))
            .count()
    }

    /// Most recently connected port.
    pub(crate) fn port(&self) -> PortHandle {
        lock(&self.ports)
            .last()
            .cloned()
            .expect("handler has not connected")
    }
}

pub(crate) struct RecordingHandler {
    recorder: Recorder,
}

impl ChannelHandler for RecordingHandler {
    fn on_connect(&mut self, port: PortHandle) {
        lock(&self.recorder.log).push(Seen::Connected {
            server: port.is_server(),
        });
        lock(&self.recorder.ports).push(port);
    }

    fn on_message(&mut self, message: Value) {
        lock(&self.recorder.log).push(Seen::Message(message));
    }

    fn on_disconnect(&mut self) {
        lock(&self.recorder.log).push(Seen::Disconnected);
    }

    fn on_connect_failed(&mut self, error: ChannelError) {
        lock(&self.recorder.log).push(Seen::ConnectFailed(error.to_string()));
    }
}

pub(crate) const FAST_TIMEOUT: Duration = Duration::from_millis(30);

pub(crate) fn optimistic() -> ChannelConfig {
    ChannelConfig {
        connect_mode: ConnectMode::Optimistic,
    }
}

pub(crate) fn confirmed() -> ChannelConfig {
    ChannelConfig {
        connect_mode: ConnectMode::Confirmed {
            timeout: FAST_TIMEOUT,
        },
    }
}

/// A dispatcher plus one echoing in-process bus.
pub(crate) struct Harness {
    pub(crate) dispatcher: Dispatcher,
    pub(crate) bus: LocalBus,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let dispatcher = Dispatcher::new();
        let bus = LocalBus::new(dispatcher.handle());
        Self { dispatcher, bus }
    }

    pub(crate) fn dispatch(&self) -> DispatchHandle {
        self.dispatcher.handle()
    }

    /// A channel on a fresh bus endpoint.
    pub(crate) fn channel(&self, config: ChannelConfig) -> GenericChannel {
        self.channel_on(self.bus.endpoint("app"), TransportKind::Generic, config)
    }

    pub(crate) fn channel_on(
        &self,
        endpoint: BusEndpoint,
        kind: TransportKind,
        config: ChannelConfig,
    ) -> GenericChannel {
        GenericChannel::with_config(kind.build(Arc::new(endpoint)), self.dispatch(), config)
    }

    /// Record every protocol frame crossing the bus.
    pub(crate) fn tap(&self) -> Arc<Mutex<Vec<Frame>>> {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&frames);
        self.bus
            .endpoint("tap")
            .add_event_listener(Arc::new(move |event: &MessageEvent| {
                if let Some(frame) = Frame::decode(&event.data) {
                    lock(&sink).push(frame);
                }
            }));
        frames
    }

    pub(crate) fn settle(&self) {
        self.dispatcher.run_until_idle();
    }
}

pub(crate) fn count_kind(frames: &Mutex<Vec<Frame>>, kind: &str) -> usize {
    lock(frames)
        .iter()
        .filter(|frame| frame.kind() == kind)
        .count()
}
