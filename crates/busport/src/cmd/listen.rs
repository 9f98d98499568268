use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use busport_channel::{ChannelConfig, ChannelHandler, PortHandle};
use busport_transport::{Dispatcher, LinkConfig, LinkListener};
use serde_json::Value;

use crate::cmd::serve::{install_ctrlc_handler, serve, spawn_acceptor, Attached, Attachments};
use crate::cmd::{link_channel, Globals, ListenArgs};
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat, Received};

/// Prints every message received on its port.
struct PrintHandler {
    name: String,
    format: OutputFormat,
    port: Option<PortHandle>,
    printed: Arc<AtomicUsize>,
    limit: Option<usize>,
}

impl ChannelHandler for PrintHandler {
    fn on_connect(&mut self, port: PortHandle) {
        tracing::info!(name = %self.name, port = %port.port_id(), "port opened");
        self.port = Some(port);
    }

    fn on_message(&mut self, message: Value) {
        if let Some(limit) = self.limit {
            if self.printed.load(Ordering::SeqCst) >= limit {
                return;
            }
        }
        let port = self
            .port
            .as_ref()
            .map(|port| port.port_id().to_string())
            .unwrap_or_default();
        print_message(
            &Received {
                name: &self.name,
                port: &port,
                server: true,
                message: &message,
            },
            self.format,
        );
        self.printed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnect(&mut self) {
        tracing::info!(name = %self.name, "port closed");
        self.port = None;
    }
}

pub fn run(args: ListenArgs, globals: Globals) -> CliResult<i32> {
    let dispatcher = Dispatcher::new();
    let listener = LinkListener::bind(&args.path, dispatcher.handle(), LinkConfig::default())
        .map_err(|err| transport_error("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let printed = Arc::new(AtomicUsize::new(0));
    let attachments = Attachments::default();
    let dispatch = dispatcher.handle();
    let name = args.name;
    let limit = args.count;
    let counter = Arc::clone(&printed);
    spawn_acceptor(listener, attachments.clone(), move |link| {
        let channel = link_channel(
            link,
            globals.transport,
            dispatch.clone(),
            ChannelConfig::default(),
        );
        let handler_name = name.clone();
        let counter = Arc::clone(&counter);
        channel.listen(name.clone(), move || PrintHandler {
            name: handler_name.clone(),
            format: globals.format,
            port: None,
            printed: Arc::clone(&counter),
            limit,
        })?;
        Ok(Attached::single(link.clone(), channel))
    })?;

    serve(&dispatcher, &running, &attachments, || match limit {
        Some(limit) => printed.load(Ordering::SeqCst) >= limit,
        None => false,
    });
    Ok(SUCCESS)
}
