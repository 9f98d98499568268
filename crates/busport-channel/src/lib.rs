//! Connection-oriented ports over broadcast transports.
//!
//! A [`GenericChannel`] invents connections on top of a [`Transport`] that
//! only broadcasts raw values: connect/accept handshakes, per-port
//! demultiplexing, self-echo suppression and single-fire disconnects.
//! [`SessionHandler`] layers a lifecycle and error taxonomy on one port, and
//! [`ChannelProxy`] relays ports between two channels.
//!
//! [`Transport`]: busport_transport::Transport

pub mod error;
pub mod handler;
pub mod multiplexer;
pub mod port;
pub mod proxy;
pub mod session;

#[cfg(feature = "async")]
pub mod async_session;

#[cfg(test)]
mod testing;

pub use error::{ChannelError, ErrorCode, HandlerError, Result};
pub use handler::ChannelHandler;
pub use multiplexer::{ChannelConfig, ConnectMode, GenericChannel};
pub use port::{PortHandle, PortState};
pub use proxy::{ChannelProxy, ProxyConfig};
pub use session::{Session, SessionContext, SessionHandler, SessionState};

#[cfg(feature = "async")]
pub use async_session::{AsyncSession, BlockingSession};
