//! Two channels on one in-process bus: one serves "echo", the other
//! connects, sends a few messages and prints the replies.
//!
//! Run with:
//!   cargo run --example local-echo

use std::sync::Arc;
use std::time::Duration;

use busport::channel::{
    ChannelHandler, GenericChannel, HandlerError, PortHandle, Session, SessionContext,
    SessionHandler,
};
use busport::transport::{Dispatcher, LocalBus, TransportKind};
use serde_json::{json, Value};

struct Echo;

impl Session for Echo {
    fn handle_connect(&mut self, ctx: &mut SessionContext) -> Result<(), HandlerError> {
        ctx.emit_load(json!({ "service": "echo" }));
        Ok(())
    }

    fn handle_message(
        &mut self,
        ctx: &mut SessionContext,
        message: Value,
    ) -> Result<(), HandlerError> {
        if message == json!("fail") {
            return Err(HandlerError::abort("asked to fail"));
        }
        ctx.post_message(message);
        Ok(())
    }
}

struct Client {
    replies: usize,
}

impl ChannelHandler for Client {
    fn on_connect(&mut self, port: PortHandle) {
        eprintln!("client connected on port {}", port.port_id());
        port.post_message(json!({ "hello": "world" }));
        port.post_message(json!("fail"));
        port.post_message(json!([1, 2, 3]));
    }

    fn on_message(&mut self, message: Value) {
        self.replies += 1;
        println!("reply {}: {message}", self.replies);
    }

    fn on_disconnect(&mut self) {
        eprintln!("client disconnected");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dispatcher = Dispatcher::new();
    let bus = LocalBus::new(dispatcher.handle());
    let channel = |origin: &str| {
        GenericChannel::new(
            TransportKind::Generic.build(Arc::new(bus.endpoint(origin))),
            dispatcher.handle(),
        )
    };

    let server = channel("server");
    server.listen("echo", || SessionHandler::new(Echo))?;

    let client = channel("client");
    let port = client.connect("echo", || Client { replies: 0 })?;

    // load, echo, abort control, echo
    dispatcher.run_for(Duration::from_millis(200));
    port.disconnect();
    dispatcher.run_until_idle();

    client.disconnect();
    server.disconnect();
    Ok(())
}
