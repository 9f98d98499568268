use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use busport_channel::{ChannelConfig, ChannelProxy, ProxyConfig};
use busport_transport::{Dispatcher, LinkConfig, LinkListener, StreamLink};

use crate::cmd::serve::{install_ctrlc_handler, serve, spawn_acceptor, Attached, Attachments};
use crate::cmd::{confirmed, link_channel, Globals, ProxyArgs};
use crate::exit::{transport_error, CliResult, SUCCESS};

/// Every accepted link gets its own upstream link; ports opened on the
/// accepted link for a relayed name are reopened upstream.
pub fn run(args: ProxyArgs, globals: Globals) -> CliResult<i32> {
    let upstream_config = confirmed(&args.connect_timeout)?;
    let proxy_config = ProxyConfig {
        max_backlog: args.max_backlog,
    };

    let dispatcher = Dispatcher::new();
    let listener =
        LinkListener::bind(&args.listen_path, dispatcher.handle(), LinkConfig::default())
            .map_err(|err| transport_error("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let attachments = Attachments::default();
    let dispatch = dispatcher.handle();
    let names = args.name;
    let target = args.target_path;
    spawn_acceptor(listener, attachments.clone(), move |link| {
        let upstream = StreamLink::connect(&target, dispatch.clone(), LinkConfig::default())?;
        let first = link_channel(
            link,
            globals.transport,
            dispatch.clone(),
            ChannelConfig::default(),
        );
        let second = link_channel(&upstream, globals.transport, dispatch.clone(), upstream_config);
        let attached = Attached {
            links: vec![link.clone(), upstream.clone()],
            channels: vec![first.clone(), second.clone()],
        };

        let proxy = ChannelProxy::with_config(first, second, proxy_config);
        for name in &names {
            if let Err(err) = proxy.listen(name.clone()) {
                proxy.disconnect();
                return Err(err);
            }
        }
        tracing::info!(upstream = ?target, names = ?names, "relaying link upstream");
        Ok(attached)
    })?;

    serve(&dispatcher, &running, &attachments, || false);
    Ok(SUCCESS)
}
