//! Wire frames of the port multiplexing protocol.
//!
//! Frames share the transport with unrelated traffic, so every frame carries
//! a `type` tag unique to this protocol:
//!
//! ```text
//! Connect    { type: CONNECT_TAG,    name, port }
//! Accept     { type: ACCEPT_TAG,     port, id }
//! Message    { type: MESSAGE_TAG,    port, id, message }
//! Disconnect { type: DISCONNECT_TAG, port, id }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::id::{PortId, SessionId};

pub const CONNECT_TAG: &str = "connect(3fad0d6b-ae8c-43f0-99d8-3c1b6d6c013e)";
pub const MESSAGE_TAG: &str = "message(45b409ba-788d-4f5c-87ff-14c3c2836ee6)";
pub const DISCONNECT_TAG: &str = "disconnect(b9c899b2-ed95-4b36-af46-c907fbc54026)";
pub const ACCEPT_TAG: &str = "accept(6c1e2f0a-93d4-4b57-a8e2-5f0d7b1c94e3)";

/// All tags owned by this protocol.
pub const FRAME_TAGS: [&str; 4] = [CONNECT_TAG, MESSAGE_TAG, DISCONNECT_TAG, ACCEPT_TAG];

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Request to open `port` against a listener registered for `name`.
    #[serde(rename = "connect(3fad0d6b-ae8c-43f0-99d8-3c1b6d6c013e)")]
    Connect { name: String, port: PortId },

    /// Listener confirmation that `port` is open.
    #[serde(rename = "accept(6c1e2f0a-93d4-4b57-a8e2-5f0d7b1c94e3)")]
    Accept { port: PortId, id: SessionId },

    /// Application payload on `port`, sent by session `id`.
    #[serde(rename = "message(45b409ba-788d-4f5c-87ff-14c3c2836ee6)")]
    Message {
        port: PortId,
        id: SessionId,
        #[serde(default)]
        message: Value,
    },

    /// Teardown of `port`, sent by session `id`.
    #[serde(rename = "disconnect(b9c899b2-ed95-4b36-af46-c907fbc54026)")]
    Disconnect { port: PortId, id: SessionId },
}

impl Frame {
    /// Recognize a frame in raw transport data.
    ///
    /// Returns `None` for values that are not tagged as one of this
    /// protocol's frames, and for tagged values that fail to parse.
    pub fn decode(data: &Value) -> Option<Frame> {
        let tag = data.get("type")?.as_str()?;
        if !FRAME_TAGS.contains(&tag) {
            return None;
        }
        match Frame::deserialize(data) {
            Ok(frame) => Some(frame),
            Err(err) => {
                debug!(tag, error = %err, "ignoring malformed frame");
                None
            }
        }
    }

    /// Check the raw `type` tag and one string field without parsing the
    /// whole frame. Listeners use this to skip traffic meant for others
    /// before paying for [`Frame::decode`].
    pub fn peek(data: &Value, tag: &str, key: &str, expected: &str) -> bool {
        data.get("type").and_then(Value::as_str) == Some(tag)
            && data.get(key).and_then(Value::as_str) == Some(expected)
    }

    pub fn encode(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Frame::Connect { .. } => CONNECT_TAG,
            Frame::Accept { .. } => ACCEPT_TAG,
            Frame::Message { .. } => MESSAGE_TAG,
            Frame::Disconnect { .. } => DISCONNECT_TAG,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Connect { .. } => "connect",
            Frame::Accept { .. } => "accept",
            Frame::Message { .. } => "message",
            Frame::Disconnect { .. } => "disconnect",
        }
    }

    pub fn port(&self) -> &PortId {
        match self {
            Frame::Connect { port, .. }
            | Frame::Accept { port, .. }
            | Frame::Message { port, .. }
            | Frame::Disconnect { port, .. } => port,
        }
    }

    /// Sender session, for frames that carry one.
    pub fn session(&self) -> Option<&SessionId> {
        match self {
            Frame::Connect { .. } => None,
            Frame::Accept { id, .. } | Frame::Message { id, .. } | Frame::Disconnect { id, .. } => {
                Some(id)
            }
        }
    }
}
