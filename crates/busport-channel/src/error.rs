use std::fmt;
use std::time::Duration;

use busport_frame::ControlKind;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Errors that can occur in channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] busport_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] busport_frame::FrameError),

    /// The channel was disconnected and accepts no further work.
    #[error("channel is closed")]
    Closed,

    /// No listener confirmed the connect in time.
    #[error("connect to '{name}' was not accepted within {timeout:?}")]
    ConnectTimeout { name: String, timeout: Duration },

    /// The connecting side disconnected before the port opened.
    #[error("connect to '{name}' was cancelled")]
    ConnectCancelled { name: String },

    /// The peer tore the port down before it opened.
    #[error("peer disconnected '{name}' before accepting")]
    PeerDisconnected { name: String },
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Classification tag carried by a [`HandlerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCode {
    Error,
    Close,
    Abort,
    Timeout,
}

impl ErrorCode {
    /// Control message emitted for this code.
    pub fn control_kind(self) -> ControlKind {
        match self {
            ErrorCode::Error => ControlKind::Error,
            ErrorCode::Close => ControlKind::Close,
            ErrorCode::Abort => ControlKind::Abort,
            ErrorCode::Timeout => ControlKind::Timeout,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.control_kind().as_str()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned from a session callback.
///
/// The optional `code` decides which control message reports it to the
/// peer. Untagged errors are runtime errors and are reported as `error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    code: Option<ErrorCode>,
    message: String,
}

impl HandlerError {
    /// Unclassified runtime error.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_code(ErrorCode::Error, message)
    }

    pub fn abort(message: impl Into<String>) -> Self {
        Self::with_code(ErrorCode::Abort, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_code(ErrorCode::Timeout, message)
    }

    pub fn close(message: impl Into<String>) -> Self {
        Self::with_code(ErrorCode::Close, message)
    }

    pub fn code(&self) -> Option<ErrorCode> {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Control message kind used to report this error.
    pub fn control_kind(&self) -> ControlKind {
        self.code.map_or(ControlKind::Error, ErrorCode::control_kind)
    }

    /// `{ code, message }` as carried in a control message payload.
    pub fn to_payload(&self) -> Value {
        json!({ "code": self.code, "message": self.message })
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::runtime(err.to_string())
    }
}

impl From<ChannelError> for HandlerError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::ConnectTimeout { .. } => Self::timeout(err.to_string()),
            ChannelError::Closed
            | ChannelError::ConnectCancelled { .. }
            | ChannelError::PeerDisconnected { .. } => Self::close(err.to_string()),
            other => Self::runtime(other.to_string()),
        }
    }
}
