/// Errors that can occur while encoding or decoding frames and payloads.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A value could not be converted to or from JSON.
    #[error("frame serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A tagged buffer carried invalid base64 text.
    #[error("invalid base64 buffer: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A value tagged as a buffer had no `buffer` string.
    #[error("tagged buffer is missing its `buffer` field")]
    MissingBuffer,
}

pub type Result<T> = std::result::Result<T, FrameError>;
