//! Base64 carriage for binary payloads.
//!
//! Transports that only move JSON cannot carry raw bytes, so binary payloads
//! travel as `{ type: BASE64_TAG, buffer: "<base64>" }`. The multiplexer never
//! looks inside payloads; applications call these helpers at their edges.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::error::{FrameError, Result};

pub const BASE64_TAG: &str = "base64(0c9b4f2e-7a51-4d1e-b3c8-2f6a9d4e8b17)";

/// Wrap bytes as a tagged base64 value. Empty input yields `None`.
pub fn encode_buffer(bytes: &[u8]) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    Some(json!({ "type": BASE64_TAG, "buffer": STANDARD.encode(bytes) }))
}

/// Unwrap a tagged base64 value.
///
/// Returns `Ok(None)` for null and for values that are not tagged buffers.
pub fn decode_buffer(value: &Value) -> Result<Option<Vec<u8>>> {
    if !is_buffer(value) {
        return Ok(None);
    }
    let text = value
        .get("buffer")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingBuffer)?;
    Ok(Some(STANDARD.decode(text)?))
}

pub fn is_buffer(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str) == Some(BASE64_TAG)
}
