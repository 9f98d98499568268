//! Wire vocabulary for busport channels.
//!
//! Every frame is a JSON object tagged with a protocol-unique `type`, so it
//! can share a broadcast transport with unrelated traffic:
//! - [`Frame`]: connect / accept / message / disconnect
//! - [`PortId`] and [`SessionId`]: `<unix-millis>-<random>` identifiers
//! - [`ControlMessage`]: load / error / close / abort / timeout payloads
//! - base64 helpers for binary payloads

pub mod buffer;
pub mod control;
pub mod error;
pub mod frame;
pub mod id;

pub use buffer::{decode_buffer, encode_buffer, is_buffer, BASE64_TAG};
pub use control::{ControlKind, ControlMessage};
pub use error::{FrameError, Result};
pub use frame::{Frame, ACCEPT_TAG, CONNECT_TAG, DISCONNECT_TAG, FRAME_TAGS, MESSAGE_TAG};
pub use id::{PortId, SessionId};
