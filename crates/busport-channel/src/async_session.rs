//! Async session callbacks.
//!
//! An [`AsyncSession`] may await its own work inside a callback. The
//! multiplexer never awaits: [`BlockingSession`] drives each callback to
//! completion on a current-thread tokio runtime before the dispatcher moves
//! on, so frames for one port are still handled strictly in order.
//!
//! The dispatcher thread must not already be driving a tokio runtime.

use std::future::Future;
use std::io;
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::{Builder, Runtime};

use crate::error::{ChannelError, HandlerError};
use crate::session::{Session, SessionContext};

/// Application callbacks that may suspend while they run.
pub trait AsyncSession: Send + 'static {
    fn handle_connect(
        &mut self,
        _ctx: &mut SessionContext,
    ) -> impl Future<Output = Result<(), HandlerError>> {
        async { Ok(()) }
    }

    fn handle_message(
        &mut self,
        ctx: &mut SessionContext,
        message: Value,
    ) -> impl Future<Output = Result<(), HandlerError>>;

    fn handle_disconnect(
        &mut self,
        _ctx: &mut SessionContext,
    ) -> impl Future<Output = Result<(), HandlerError>> {
        async { Ok(()) }
    }

    fn handle_connect_failed(
        &mut self,
        _ctx: &mut SessionContext,
        _error: &ChannelError,
    ) -> impl Future<Output = ()> {
        async {}
    }
}

/// Runs an [`AsyncSession`] as a plain [`Session`].
pub struct BlockingSession<S> {
    session: S,
    runtime: Arc<Runtime>,
}

impl<S: AsyncSession> BlockingSession<S> {
    /// Wrap `session` with its own current-thread runtime.
    pub fn new(session: S) -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_time().build()?;
        Ok(Self::with_runtime(session, Arc::new(runtime)))
    }

    /// Wrap `session` on a runtime shared with other sessions.
    pub fn with_runtime(session: S, runtime: Arc<Runtime>) -> Self {
        Self { session, runtime }
    }

    pub fn session(&self) -> &S {
        &self.session
    }
}

impl<S: AsyncSession> Session for BlockingSession<S> {
    fn handle_connect(&mut self, ctx: &mut SessionContext) -> Result<(), HandlerError> {
        self.runtime.block_on(self.session.handle_connect(ctx))
    }

    fn handle_message(
        &mut self,
        ctx: &mut SessionContext,
        message: Value,
    ) -> Result<(), HandlerError> {
        self.runtime.block_on(self.session.handle_message(ctx, message))
    }

    fn handle_disconnect(&mut self, ctx: &mut SessionContext) -> Result<(), HandlerError> {
        self.runtime.block_on(self.session.handle_disconnect(ctx))
    }

    fn handle_connect_failed(&mut self, ctx: &mut SessionContext, error: &ChannelError) {
        self.runtime.block_on(self.session.handle_connect_failed(ctx, error));
    }
}
