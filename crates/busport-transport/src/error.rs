use std::path::PathBuf;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified socket path.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified socket path.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming stream link.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on a stream link.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// An envelope header did not start with the expected magic bytes.
    #[error("invalid envelope magic (expected 0x4250 \"BP\")")]
    InvalidMagic,

    /// An envelope body exceeds the configured maximum size.
    #[error("envelope too large ({size} bytes, max {max})")]
    EnvelopeTooLarge { size: usize, max: usize },

    /// An envelope body was not valid JSON.
    #[error("envelope json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The link closed before a complete envelope was received.
    #[error("connection closed (incomplete envelope)")]
    ConnectionClosed,

    /// The primitive has been closed and no longer carries messages.
    #[error("transport closed")]
    Closed,

    /// A transport kind name could not be parsed.
    #[error("unknown transport kind '{0}' (expected generic, window, worker or broadcast)")]
    UnknownKind(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
