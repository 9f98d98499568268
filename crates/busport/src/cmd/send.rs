use std::fs;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use busport_channel::{ChannelConfig, ChannelError, ChannelHandler, ConnectMode, PortHandle};
use busport_frame::{encode_buffer, ControlKind, ControlMessage};
use busport_transport::sync::lock;
use busport_transport::{Dispatcher, LinkConfig, StreamLink};
use serde_json::Value;

use crate::cmd::{confirmed, link_channel, parse_duration, Globals, SendArgs};
use crate::exit::{
    channel_error, io_error, transport_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT,
    USAGE,
};
use crate::output::{print_message, Received};

#[derive(Debug, Default)]
struct Exchange {
    port: Option<String>,
    sent: bool,
    reply: Option<Value>,
    closed: bool,
    failed: Option<ChannelError>,
}

impl Exchange {
    fn finished(&self, wait: bool) -> bool {
        self.failed.is_some() || self.closed || self.reply.is_some() || (self.sent && !wait)
    }
}

/// Sends one payload as soon as its port opens, then optionally keeps the
/// first reply.
struct SendHandler {
    payload: Option<Value>,
    wait: bool,
    port: Option<PortHandle>,
    exchange: Arc<Mutex<Exchange>>,
}

impl ChannelHandler for SendHandler {
    fn on_connect(&mut self, port: PortHandle) {
        if let Some(payload) = self.payload.take() {
            port.post_message(payload);
        }
        {
            let mut exchange = lock(&self.exchange);
            exchange.port = Some(port.port_id().to_string());
            exchange.sent = true;
        }
        if self.wait {
            self.port = Some(port);
        } else {
            port.disconnect();
        }
    }

    fn on_message(&mut self, message: Value) {
        if let Some(control) = ControlMessage::from_value(&message) {
            if control.kind == ControlKind::Load {
                tracing::debug!(payload = %control.payload, "peer session loaded");
                return;
            }
        }
        let mut exchange = lock(&self.exchange);
        if exchange.reply.is_none() {
            exchange.reply = Some(message);
            drop(exchange);
            if let Some(port) = self.port.take() {
                port.disconnect();
            }
        }
    }

    fn on_disconnect(&mut self) {
        self.port = None;
        lock(&self.exchange).closed = true;
    }

    fn on_connect_failed(&mut self, error: ChannelError) {
        lock(&self.exchange).failed = Some(error);
    }
}

pub fn run(args: SendArgs, globals: Globals) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let config = if args.optimistic {
        ChannelConfig {
            connect_mode: ConnectMode::Optimistic,
        }
    } else {
        confirmed(&args.connect_timeout)?
    };
    let payload = resolve_payload(&args)?;

    let dispatcher = Dispatcher::new();
    let link = StreamLink::connect(&args.path, dispatcher.handle(), LinkConfig::default())
        .map_err(|err| transport_error("connect failed", err))?;
    let channel = link_channel(&link, globals.transport, dispatcher.handle(), config);

    let exchange = Arc::new(Mutex::new(Exchange::default()));
    let handler = SendHandler {
        payload: Some(payload),
        wait: args.wait,
        port: None,
        exchange: Arc::clone(&exchange),
    };
    channel
        .connect(args.name.clone(), move || handler)
        .map_err(|err| channel_error("connect failed", err))?;

    let deadline = Instant::now() + connect_budget(config) + wait_timeout;
    let wait = args.wait;
    dispatcher.run_until(deadline, || lock(&exchange).finished(wait));
    channel.disconnect();
    dispatcher.run_until_idle();

    let outcome = std::mem::take(&mut *lock(&exchange));
    report(outcome, &args, globals, wait_timeout)
}

fn connect_budget(config: ChannelConfig) -> Duration {
    match config.connect_mode {
        ConnectMode::Optimistic => Duration::ZERO,
        ConnectMode::Confirmed { timeout } => timeout,
    }
}

fn report(
    exchange: Exchange,
    args: &SendArgs,
    globals: Globals,
    wait_timeout: Duration,
) -> CliResult<i32> {
    if let Some(err) = exchange.failed {
        return Err(channel_error("connect failed", err));
    }
    if !exchange.sent {
        return Err(CliError::new(
            TIMEOUT,
            format!("connect failed: '{}' was not accepted in time", args.name),
        ));
    }
    if !args.wait {
        return Ok(SUCCESS);
    }

    let Some(reply) = exchange.reply else {
        if exchange.closed {
            return Err(CliError::new(
                FAILURE,
                format!("peer closed '{}' before replying", args.name),
            ));
        }
        return Err(CliError::new(
            TIMEOUT,
            format!("no response within {wait_timeout:?}"),
        ));
    };

    print_message(
        &Received {
            name: &args.name,
            port: exchange.port.as_deref().unwrap_or_default(),
            server: false,
            message: &reply,
        },
        globals.format,
    );
    match ControlMessage::from_value(&reply) {
        Some(control) => Err(CliError::new(
            FAILURE,
            format!("peer reported {}: {}", control.kind, control.payload),
        )),
        None => Ok(SUCCESS),
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Value> {
    if let Some(json) = &args.json {
        return serde_json::from_str(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")));
    }
    if let Some(data) = &args.data {
        return Ok(Value::String(data.clone()));
    }
    if let Some(path) = &args.file {
        let bytes = fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        return Ok(encode_buffer(&bytes).unwrap_or(Value::Null));
    }
    Ok(Value::Null)
}
