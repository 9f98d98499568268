use std::sync::{Arc, Mutex, TryLockError};

use busport_transport::sync::lock;
use busport_transport::DispatchHandle;
use serde_json::Value;
use tracing::warn;

use crate::error::ChannelError;
use crate::port::PortHandle;

/// Callbacks for one port, supplied to `listen`/`connect` via a factory.
///
/// A handler owns the [`PortHandle`] it receives in `on_connect` for the
/// rest of its life. Callbacks run on the dispatcher thread.
pub trait ChannelHandler: Send + 'static {
    fn on_connect(&mut self, port: PortHandle);

    fn on_message(&mut self, message: Value);

    /// Called at most once, after the port has closed.
    fn on_disconnect(&mut self);

    /// A confirmed connect never opened. No port was handed out.
    fn on_connect_failed(&mut self, error: ChannelError) {
        warn!(error = %error, "connect failed");
    }
}

pub(crate) type SharedHandler = Arc<Mutex<dyn ChannelHandler>>;

/// Run `f` against the handler, or on the next dispatcher turn if the
/// handler is executing right now (it disconnected its own port).
pub(crate) fn notify_handler(
    dispatch: &DispatchHandle,
    handler: SharedHandler,
    f: impl FnOnce(&mut dyn ChannelHandler) + Send + 'static,
) {
    let deferred = match handler.try_lock() {
        Ok(mut guard) => {
            f(&mut *guard);
            None
        }
        Err(TryLockError::Poisoned(poisoned)) => {
            f(&mut *poisoned.into_inner());
            None
        }
        Err(TryLockError::WouldBlock) => Some(f),
    };
    if let Some(f) = deferred {
        dispatch.defer(move || f(&mut *lock(&handler)));
    }
}
