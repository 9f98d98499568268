//! An echo service reached through a proxy over two Unix socket pairs:
//!
//!   client <-> proxy <-> echo
//!
//! Run with:
//!   cargo run --example link-proxy

use std::sync::Arc;
use std::time::Duration;

use busport::channel::{
    ChannelHandler, ChannelProxy, GenericChannel, HandlerError, PortHandle, Session,
    SessionContext, SessionHandler,
};
use busport::transport::{
    DispatchHandle, Dispatcher, IpcStream, LinkConfig, StreamLink, TransportKind,
};
use serde_json::{json, Value};

struct Echo;

impl Session for Echo {
    fn handle_message(
        &mut self,
        ctx: &mut SessionContext,
        message: Value,
    ) -> Result<(), HandlerError> {
        ctx.post_message(json!({ "echo": message }));
        Ok(())
    }
}

struct Client;

impl ChannelHandler for Client {
    fn on_connect(&mut self, port: PortHandle) {
        for n in 0..3 {
            port.post_message(json!(n));
        }
    }

    fn on_message(&mut self, message: Value) {
        println!("client got {message}");
    }

    fn on_disconnect(&mut self) {}
}

type Pair = (StreamLink, StreamLink);

fn linked(dispatch: &DispatchHandle) -> Result<Pair, Box<dyn std::error::Error>> {
    let (left, right) = IpcStream::pair()?;
    Ok((
        StreamLink::new(left, dispatch.clone(), LinkConfig::default())?,
        StreamLink::new(right, dispatch.clone(), LinkConfig::default())?,
    ))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dispatcher = Dispatcher::new();
    let dispatch = dispatcher.handle();
    let channel = |link: &StreamLink| {
        GenericChannel::new(
            TransportKind::Generic.build(Arc::new(link.clone())),
            dispatch.clone(),
        )
    };

    let (client_link, proxy_front) = linked(&dispatch)?;
    let (proxy_back, echo_link) = linked(&dispatch)?;

    let echo = channel(&echo_link);
    echo.listen("echo", || SessionHandler::new(Echo))?;

    let proxy = ChannelProxy::new(channel(&proxy_front), channel(&proxy_back));
    proxy.listen("echo")?;

    let client = channel(&client_link);
    let port = client.connect("echo", || Client)?;

    dispatcher.run_for(Duration::from_millis(500));
    port.disconnect();
    dispatcher.run_for(Duration::from_millis(50));

    client.disconnect();
    proxy.disconnect();
    echo.disconnect();
    Ok(())
}
