//! Control messages sent over an open port by session handlers.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Control message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    /// Successful initialization.
    Load,
    Error,
    Close,
    Abort,
    Timeout,
}

impl ControlKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlKind::Load => "load",
            ControlKind::Error => "error",
            ControlKind::Close => "close",
            ControlKind::Abort => "abort",
            ControlKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{ type: <kind>, payload }` as carried in a port message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub kind: ControlKind,
    #[serde(default)]
    pub payload: Value,
}

impl ControlMessage {
    pub fn new(kind: ControlKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    pub fn load(payload: Value) -> Self {
        Self::new(ControlKind::Load, payload)
    }

    pub fn error(payload: Value) -> Self {
        Self::new(ControlKind::Error, payload)
    }

    pub fn close(payload: Value) -> Self {
        Self::new(ControlKind::Close, payload)
    }

    pub fn abort(payload: Value) -> Self {
        Self::new(ControlKind::Abort, payload)
    }

    pub fn timeout(payload: Value) -> Self {
        Self::new(ControlKind::Timeout, payload)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Recognize a control message in a port payload.
    pub fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }
}
