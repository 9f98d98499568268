//! Bridges ports accepted on one channel to ports opened on another.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use busport_frame::ControlMessage;
use busport_transport::sync::lock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ChannelError, HandlerError, Result};
use crate::handler::ChannelHandler;
use crate::multiplexer::GenericChannel;
use crate::port::PortHandle;

/// Configuration for a [`ChannelProxy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Messages held per bridge while its second leg is opening. The oldest
    /// message is dropped when full.
    pub max_backlog: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self { max_backlog: 1024 }
    }
}

/// Relays ports between a listening channel and a connecting channel.
///
/// Every port accepted on `first` under a proxied name opens a matching
/// port on `second`. Messages and disconnects then flow both ways.
#[derive(Debug, Clone)]
pub struct ChannelProxy {
    first: GenericChannel,
    second: GenericChannel,
    config: ProxyConfig,
}

impl ChannelProxy {
    pub fn new(first: GenericChannel, second: GenericChannel) -> Self {
        Self::with_config(first, second, ProxyConfig::default())
    }

    pub fn with_config(first: GenericChannel, second: GenericChannel, config: ProxyConfig) -> Self {
        Self {
            first,
            second,
            config,
        }
    }

    /// Proxy connects for `name`.
    pub fn listen(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        let second = self.second.clone();
        let config = self.config;
        let leg_name = name.clone();
        self.first.listen(name, move || FirstLeg {
            name: leg_name.clone(),
            second: second.clone(),
            bridge: Arc::new(Mutex::new(Bridge::new(config.max_backlog))),
        })
    }

    /// Disconnect both channels and close their transports.
    pub fn disconnect(&self) {
        self.first.disconnect();
        self.second.disconnect();
    }

    pub fn first(&self) -> &GenericChannel {
        &self.first
    }

    pub fn second(&self) -> &GenericChannel {
        &self.second
    }
}

struct Bridge {
    first: Option<PortHandle>,
    second: Option<PortHandle>,
    backlog: VecDeque<Value>,
    max_backlog: usize,
    first_closed: bool,
}

impl Bridge {
    fn new(max_backlog: usize) -> Self {
        Self {
            first: None,
            second: None,
            backlog: VecDeque::new(),
            max_backlog,
            first_closed: false,
        }
    }

    fn hold(&mut self, message: Value) {
        if self.max_backlog == 0 {
            warn!("proxy backlog disabled; dropping message");
            return;
        }
        if self.backlog.len() >= self.max_backlog {
            self.backlog.pop_front();
            warn!(max = self.max_backlog, "proxy backlog full; dropped oldest message");
        }
        self.backlog.push_back(message);
    }
}

/// Handler for the port accepted on the first channel.
struct FirstLeg {
    name: String,
    second: GenericChannel,
    bridge: Arc<Mutex<Bridge>>,
}

impl ChannelHandler for FirstLeg {
    fn on_connect(&mut self, port: PortHandle) {
        debug!(name = %self.name, port = %port.port_id(), "proxy opening second leg");
        lock(&self.bridge).first = Some(port);

        let bridge = Arc::clone(&self.bridge);
        let name = self.name.clone();
        let opened = self.second.connect(self.name.clone(), move || SecondLeg { name, bridge });
        if let Err(err) = opened {
            close_first_leg(&self.bridge, &self.name, err);
        }
    }

    fn on_message(&mut self, message: Value) {
        let mut bridge = lock(&self.bridge);
        match bridge.second.clone() {
            Some(second) => second.post_message(message),
            None => bridge.hold(message),
        }
    }

    fn on_disconnect(&mut self) {
        let second = {
            let mut bridge = lock(&self.bridge);
            bridge.first_closed = true;
            bridge.first = None;
            bridge.backlog.clear();
            bridge.second.take()
        };
        if let Some(second) = second {
            second.disconnect();
        }
    }
}

/// Handler for the port opened on the second channel.
struct SecondLeg {
    name: String,
    bridge: Arc<Mutex<Bridge>>,
}

impl ChannelHandler for SecondLeg {
    fn on_connect(&mut self, port: PortHandle) {
        let mut bridge = lock(&self.bridge);
        if bridge.first_closed {
            drop(bridge);
            debug!(name = %self.name, "first leg already gone; closing second leg");
            port.disconnect();
            return;
        }
        let backlog = std::mem::take(&mut bridge.backlog);
        if !backlog.is_empty() {
            debug!(name = %self.name, count = backlog.len(), "flushing proxy backlog");
        }
        for message in backlog {
            port.post_message(message);
        }
        bridge.second = Some(port);
    }

    fn on_message(&mut self, message: Value) {
        let first = lock(&self.bridge).first.clone();
        match first {
            Some(first) => first.post_message(message),
            None => debug!(name = %self.name, "first leg closed; dropping message"),
        }
    }

    fn on_disconnect(&mut self) {
        let first = {
            let mut bridge = lock(&self.bridge);
            bridge.second = None;
            bridge.first.take()
        };
        if let Some(first) = first {
            first.disconnect();
        }
    }

    fn on_connect_failed(&mut self, error: ChannelError) {
        close_first_leg(&self.bridge, &self.name, error);
    }
}

// The second leg never opened: report a close error on the first leg and
// disconnect it.
fn close_first_leg(bridge: &Mutex<Bridge>, name: &str, error: ChannelError) {
    warn!(name, error = %error, "proxy second leg failed");
    let first = {
        let mut bridge = lock(bridge);
        bridge.backlog.clear();
        bridge.first.take()
    };
    let Some(first) = first else {
        return;
    };
    let close = HandlerError::close(format!("proxy for '{name}' could not connect: {error}"));
    match ControlMessage::close(close.to_payload()).to_value() {
        Ok(value) => first.post_message(value),
        Err(err) => warn!(error = %err, "failed to encode close message"),
    }
    first.disconnect();
}
