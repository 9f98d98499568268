//! Session handlers: port lifecycle plus the error taxonomy.
//!
//! A [`SessionHandler`] wraps application callbacks ([`Session`]) and turns
//! every error they return into a control message on the same port. Errors
//! never reach the transport or the dispatcher.

use busport_frame::{ControlKind, ControlMessage};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ChannelError, HandlerError};
use crate::handler::ChannelHandler;
use crate::port::PortHandle;

/// Binding state of a session: `Unbound -> Bound -> Released`.
///
/// `Released` is the terminal unbound state; a released session never
/// binds again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unbound,
    Bound,
    Released,
}

/// Application callbacks run by a [`SessionHandler`].
pub trait Session: Send + 'static {
    fn handle_connect(&mut self, _ctx: &mut SessionContext) -> Result<(), HandlerError> {
        Ok(())
    }

    fn handle_message(
        &mut self,
        ctx: &mut SessionContext,
        message: Value,
    ) -> Result<(), HandlerError>;

    fn handle_disconnect(&mut self, _ctx: &mut SessionContext) -> Result<(), HandlerError> {
        Ok(())
    }

    fn handle_connect_failed(&mut self, _ctx: &mut SessionContext, _error: &ChannelError) {}
}

/// The port-facing half of a session: sending and control emitters.
#[derive(Debug)]
pub struct SessionContext {
    port: Option<PortHandle>,
    state: SessionState,
}

impl SessionContext {
    fn new() -> Self {
        Self {
            port: None,
            state: SessionState::Unbound,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn port(&self) -> Option<&PortHandle> {
        self.port.as_ref()
    }

    /// Send on the bound port. Without one the message is logged and
    /// dropped.
    pub fn post_message(&self, message: Value) {
        match &self.port {
            Some(port) => port.post_message(message),
            None => warn!(state = ?self.state, "attempted to send message on closed port"),
        }
    }

    /// Close the bound port, if any.
    pub fn disconnect(&self) {
        if let Some(port) = &self.port {
            port.disconnect();
        }
    }

    pub fn emit(&self, kind: ControlKind, payload: Value) {
        match ControlMessage::new(kind, payload).to_value() {
            Ok(value) => self.post_message(value),
            Err(err) => warn!(%kind, error = %err, "failed to encode control message"),
        }
    }

    /// Signal successful initialization.
    pub fn emit_load(&self, payload: Value) {
        self.emit(ControlKind::Load, payload);
    }

    pub fn emit_error(&self, payload: Value) {
        self.emit(ControlKind::Error, payload);
    }

    pub fn emit_close(&self, payload: Value) {
        self.emit(ControlKind::Close, payload);
    }

    pub fn emit_abort(&self, payload: Value) {
        self.emit(ControlKind::Abort, payload);
    }

    pub fn emit_timeout(&self, payload: Value) {
        self.emit(ControlKind::Timeout, payload);
    }

    /// Report an error to the peer with the control message its code
    /// selects. Untagged errors are sent as `error`.
    pub fn emit_runtime_error(&self, error: &HandlerError) {
        warn!(code = ?error.code(), error = %error, "session callback failed");
        let payload = error.to_payload();
        match error.control_kind() {
            ControlKind::Close => self.emit_close(payload),
            ControlKind::Abort => self.emit_abort(payload),
            ControlKind::Timeout => self.emit_timeout(payload),
            ControlKind::Error | ControlKind::Load => self.emit_error(payload),
        }
    }
}

/// [`ChannelHandler`] that runs a [`Session`] and routes its errors
/// through the control-message taxonomy.
pub struct SessionHandler<S> {
    session: S,
    ctx: SessionContext,
}

impl<S: Session> SessionHandler<S> {
    pub fn new(session: S) -> Self {
        Self {
            session,
            ctx: SessionContext::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.ctx.state
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }
}

impl<S: Session> ChannelHandler for SessionHandler<S> {
    fn on_connect(&mut self, port: PortHandle) {
        if self.ctx.state != SessionState::Unbound {
            warn!(state = ?self.ctx.state, port = %port.port_id(), "session cannot bind again");
            port.disconnect();
            return;
        }
        debug!(port = %port.port_id(), "session bound");
        self.ctx.state = SessionState::Bound;
        self.ctx.port = Some(port);
        if let Err(err) = self.session.handle_connect(&mut self.ctx) {
            self.ctx.emit_runtime_error(&err);
        }
    }

    fn on_message(&mut self, message: Value) {
        if let Err(err) = self.session.handle_message(&mut self.ctx, message) {
            self.ctx.emit_runtime_error(&err);
        }
    }

    fn on_disconnect(&mut self) {
        debug!("session released");
        self.ctx.state = SessionState::Released;
        self.ctx.port = None;
        if let Err(err) = self.session.handle_disconnect(&mut self.ctx) {
            self.ctx.emit_runtime_error(&err);
        }
    }

    fn on_connect_failed(&mut self, error: ChannelError) {
        warn!(error = %error, "session connect failed");
        self.ctx.state = SessionState::Released;
        self.session.handle_connect_failed(&mut self.ctx, &error);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use busport_frame::Frame;
    use busport_transport::sync::lock;
    use serde_json::json;

    use super::*;
    use crate::testing::{confirmed, Harness, Recorder};

    /// Fails according to the message it receives.
    #[derive(Default)]
    struct Scripted {
        connected: bool,
        disconnected: Arc<Mutex<usize>>,
        fail_disconnect: bool,
    }

    impl Session for Scripted {
        fn handle_connect(&mut self, ctx: &mut SessionContext) -> Result<(), HandlerError> {
            self.connected = true;
            ctx.emit_load(json!({"ready": true}));
            Ok(())
        }

        fn handle_message(
            &mut self,
            ctx: &mut SessionContext,
            message: Value,
        ) -> Result<(), HandlerError> {
            match message.as_str() {
                Some("abort") => Err(HandlerError::abort("aborted by request")),
                Some("timeout") => Err(HandlerError::timeout("too slow")),
                Some("close") => Err(HandlerError::close("closing")),
                Some("tagged-error") => Err(HandlerError::error("tagged")),
                Some("plain") => Err(HandlerError::runtime("plain failure")),
                Some("json") => {
                    let _: u32 = serde_json::from_value(json!("not a number"))?;
                    Ok(())
                }
                _ => {
                    ctx.post_message(json!({ "echo": &message }));
                    Ok(())
                }
            }
        }

        fn handle_disconnect(&mut self, _ctx: &mut SessionContext) -> Result<(), HandlerError> {
            *lock(&self.disconnected) += 1;
            if self.fail_disconnect {
                return Err(HandlerError::runtime("cleanup failed"));
            }
            Ok(())
        }
    }

    fn controls(frames: &Mutex<Vec<Frame>>) -> Vec<ControlMessage> {
        lock(frames)
            .iter()
            .filter_map(|frame| match frame {
                Frame::Message { message, .. } => ControlMessage::from_value(message),
                _ => None,
            })
            .collect()
    }

    struct Setup {
        h: Harness,
        frames: Arc<Mutex<Vec<Frame>>>,
        client: Recorder,
        disconnected: Arc<Mutex<usize>>,
    }

    fn setup(fail_disconnect: bool) -> Setup {
        let h = Harness::new();
        let frames = h.tap();
        let server_channel = h.channel(confirmed());
        let client_channel = h.channel(confirmed());
        let disconnected = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&disconnected);
        server_channel
            .listen("svc", move || {
                SessionHandler::new(Scripted {
                    disconnected: Arc::clone(&counter),
                    fail_disconnect,
                    ..Scripted::default()
                })
            })
            .unwrap();
        let client = Recorder::new();
        client_channel.connect("svc", client.handler_factory()).unwrap();
        h.settle();
        Setup {
            h,
            frames,
            client,
            disconnected,
        }
    }

    #[test]
    fn connect_emits_load() {
        let s = setup(false);
        assert_eq!(
            s.client.messages(),
            vec![json!({"type": "load", "payload": {"ready": true}})]
        );
    }

    #[test]
    fn tagged_errors_emit_matching_control_messages() {
        let s = setup(false);
        for (input, kind) in [
            ("abort", ControlKind::Abort),
            ("timeout", ControlKind::Timeout),
            ("close", ControlKind::Close),
            ("tagged-error", ControlKind::Error),
            ("plain", ControlKind::Error),
            ("json", ControlKind::Error),
        ] {
            lock(&s.frames).clear();
            s.client.port().post_message(json!(input));
            s.h.settle();

            let emitted = controls(&s.frames);
            assert_eq!(emitted.len(), 1, "one control message for {input}");
            assert_eq!(emitted[0].kind, kind, "control kind for {input}");
        }
        // Message-level errors never close the port.
        assert!(s.client.port().is_open());
        assert_eq!(s.client.disconnects(), 0);
    }

    #[test]
    fn abort_payload_carries_code_and_message() {
        let s = setup(false);
        s.client.port().post_message(json!("abort"));
        s.h.settle();
        assert_eq!(
            s.client.messages().last(),
            Some(&json!({
                "type": "abort",
                "payload": {"code": "abort", "message": "aborted by request"},
            }))
        );
    }

    #[test]
    fn successful_messages_are_answered() {
        let s = setup(false);
        s.client.port().post_message(json!("hello"));
        s.h.settle();
        assert_eq!(
            s.client.messages().last(),
            Some(&json!({"echo": "hello"}))
        );
    }

    #[test]
    fn disconnect_releases_and_swallows_cleanup_errors() {
        let s = setup(true);
        lock(&s.frames).clear();
        s.client.port().disconnect();
        s.h.settle();

        assert_eq!(*lock(&s.disconnected), 1);
        // The cleanup error had no port to travel on.
        assert!(controls(&s.frames).is_empty());
    }

    #[test]
    fn unbound_context_drops_sends() {
        let handler = SessionHandler::new(Scripted::default());
        assert_eq!(handler.state(), SessionState::Unbound);
        handler.context().post_message(json!("nowhere"));
        handler.context().emit_error(json!("nowhere"));
        assert!(handler.context().port().is_none());
    }

    #[test]
    fn released_session_refuses_to_rebind() {
        let h = Harness::new();
        let server_channel = h.channel(confirmed());
        let client_channel = h.channel(confirmed());
        let shared: Arc<Mutex<Option<PortHandle>>> = Arc::new(Mutex::new(None));

        // Grab the first server port so it can be offered to a released session.
        struct Capture(Arc<Mutex<Option<PortHandle>>>);
        impl ChannelHandler for Capture {
            fn on_connect(&mut self, port: PortHandle) {
                *lock(&self.0) = Some(port);
            }
            fn on_message(&mut self, _message: Value) {}
            fn on_disconnect(&mut self) {}
        }
        let slot = Arc::clone(&shared);
        server_channel
            .listen("svc", move || Capture(Arc::clone(&slot)))
            .unwrap();
        let client = Recorder::new();
        client_channel.connect("svc", client.handler_factory()).unwrap();
        h.settle();
        let port = lock(&shared).clone().unwrap();

        let mut handler = SessionHandler::new(Scripted::default());
        handler.on_disconnect();
        assert_eq!(handler.state(), SessionState::Released);
        handler.on_connect(port.clone());
        assert_eq!(handler.state(), SessionState::Released);
        assert!(!handler.session().connected);
        assert!(!port.is_open());
    }
}
