//! Accept loop and dispatcher driver shared by the serving commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use busport_channel::{ChannelError, GenericChannel};
use busport_transport::sync::lock;
use busport_transport::{Dispatcher, LinkListener, Primitive, StreamLink, TransportError};
use tracing::{debug, error, info, warn};

use crate::exit::{CliError, CliResult, INTERNAL};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Links opened for one accepted peer and the channels riding on them.
pub struct Attached {
    pub links: Vec<StreamLink>,
    pub channels: Vec<GenericChannel>,
}

impl Attached {
    pub fn single(link: StreamLink, channel: GenericChannel) -> Self {
        Self {
            links: vec![link],
            channels: vec![channel],
        }
    }

    fn is_dead(&self) -> bool {
        self.links.iter().any(StreamLink::is_closed)
    }

    fn close(&self) {
        for channel in &self.channels {
            channel.disconnect();
        }
        for link in &self.links {
            link.close();
        }
    }
}

/// Everything attached by the accept thread, closed from the dispatcher
/// thread.
#[derive(Clone, Default)]
pub struct Attachments {
    inner: Arc<Mutex<Vec<Attached>>>,
}

impl Attachments {
    fn push(&self, attached: Attached) {
        lock(&self.inner).push(attached);
    }

    /// Close attachments whose peer went away.
    fn prune(&self) {
        let dead: Vec<Attached> = {
            let mut all = lock(&self.inner);
            let (dead, live): (Vec<Attached>, Vec<Attached>) = std::mem::take(&mut *all)
                .into_iter()
                .partition(Attached::is_dead);
            *all = live;
            dead
        };
        for attached in dead {
            debug!("peer link closed; releasing its ports");
            attached.close();
        }
    }

    fn close_all(&self) {
        let all = std::mem::take(&mut *lock(&self.inner));
        for attached in all {
            attached.close();
        }
    }
}

/// Accept links on a background thread, running `setup` on each before its
/// first envelope is delivered.
pub fn spawn_acceptor<F>(
    listener: LinkListener,
    attachments: Attachments,
    setup: F,
) -> CliResult<()>
where
    F: Fn(&StreamLink) -> Result<Attached, ChannelError> + Send + 'static,
{
    std::thread::Builder::new()
        .name("busport-accept".to_string())
        .spawn(move || loop {
            match listener.accept_with(&setup) {
                Ok(attached) => {
                    info!(path = ?listener.path(), "peer attached");
                    attachments.push(attached);
                }
                Err(ChannelError::Transport(TransportError::Accept(err))) => {
                    error!(error = %err, "accept failed; no longer accepting links");
                    break;
                }
                Err(err) => warn!(error = %err, "link setup failed"),
            }
        })
        .map(|_| ())
        .map_err(|err| CliError::new(INTERNAL, format!("accept thread failed to start: {err}")))
}

/// Drive the dispatcher until interrupted or `done` reports true, then
/// close every attachment.
pub fn serve(
    dispatcher: &Dispatcher,
    running: &AtomicBool,
    attachments: &Attachments,
    done: impl Fn() -> bool,
) {
    while running.load(Ordering::SeqCst) && !done() {
        dispatcher.poll(POLL_INTERVAL);
        attachments.prune();
    }
    attachments.close_all();
    dispatcher.run_until_idle();
}

pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
