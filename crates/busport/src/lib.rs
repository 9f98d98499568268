//! Connection-oriented ports over broadcast messaging.
//!
//! busport turns a transport that can only broadcast values into one that
//! carries many independent, named, bidirectional ports, each with its own
//! connect and disconnect lifecycle.
//!
//! # Crate Structure
//!
//! - [`transport`]: messaging primitives, the dispatcher, the in-process bus,
//!   Unix-socket stream links and the transport adapters
//! - [`frame`]: wire frames, port and session identifiers, control messages
//! - [`channel`]: the port multiplexer, session handlers and the proxy

/// Re-export transport types.
pub mod transport {
    pub use busport_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use busport_frame::*;
}

/// Re-export channel types.
pub mod channel {
    pub use busport_channel::*;
}
