use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use busport_channel::{ChannelConfig, HandlerError, Session, SessionContext, SessionHandler};
use busport_transport::{Dispatcher, LinkConfig, LinkListener};
use serde_json::{json, Value};

use crate::cmd::serve::{install_ctrlc_handler, serve, spawn_acceptor, Attached, Attachments};
use crate::cmd::{link_channel, EchoArgs, Globals};
use crate::exit::{transport_error, CliResult, SUCCESS};

/// Answers every message on its port with the same message.
struct EchoSession {
    name: String,
}

impl Session for EchoSession {
    fn handle_connect(&mut self, ctx: &mut SessionContext) -> Result<(), HandlerError> {
        if let Some(port) = ctx.port() {
            tracing::info!(name = %self.name, port = %port.port_id(), "echo port opened");
        }
        ctx.emit_load(json!({ "name": self.name }));
        Ok(())
    }

    fn handle_message(
        &mut self,
        ctx: &mut SessionContext,
        message: Value,
    ) -> Result<(), HandlerError> {
        tracing::info!(name = %self.name, "echoing message");
        ctx.post_message(message);
        Ok(())
    }

    fn handle_disconnect(&mut self, _ctx: &mut SessionContext) -> Result<(), HandlerError> {
        tracing::info!(name = %self.name, "echo port closed");
        Ok(())
    }
}

pub fn run(args: EchoArgs, globals: Globals) -> CliResult<i32> {
    let dispatcher = Dispatcher::new();
    let listener = LinkListener::bind(&args.path, dispatcher.handle(), LinkConfig::default())
        .map_err(|err| transport_error("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let attachments = Attachments::default();
    let dispatch = dispatcher.handle();
    let name = args.name;
    spawn_acceptor(listener, attachments.clone(), move |link| {
        let channel = link_channel(
            link,
            globals.transport,
            dispatch.clone(),
            ChannelConfig::default(),
        );
        let session_name = name.clone();
        channel.listen(name.clone(), move || {
            SessionHandler::new(EchoSession {
                name: session_name.clone(),
            })
        })?;
        Ok(Attached::single(link.clone(), channel))
    })?;

    serve(&dispatcher, &running, &attachments, || false);
    Ok(SUCCESS)
}
