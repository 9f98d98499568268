use serde_json::Value;

use crate::error::Result;
use crate::event::{Listener, ListenerId, SourceId};

/// Wildcard target origin: deliver to every endpoint.
pub const ANY_ORIGIN: &str = "*";

/// A raw broadcast-style messaging primitive.
///
/// This is the host capability the transport adapters wrap: best-effort
/// posting with no delivery guarantee, and an add/remove listener set that
/// receives every event reaching this endpoint, whether or not it was meant
/// for the listener.
pub trait Primitive: Send + Sync {
    /// Identity stamped on every event this endpoint posts.
    fn source(&self) -> SourceId;

    /// Origin string of this endpoint.
    fn origin(&self) -> &str;

    /// Source that trusted events arrive from. A shared window hears itself;
    /// a point-to-point link hears its peer.
    fn trusted_source(&self) -> SourceId {
        self.source()
    }

    /// Post a value. `target_origin` restricts delivery to endpoints with a
    /// matching origin; `None` or [`ANY_ORIGIN`] reaches everyone.
    fn post_message(&self, data: Value, target_origin: Option<&str>) -> Result<()>;

    /// Register a listener for events reaching this endpoint.
    fn add_event_listener(&self, listener: Listener) -> ListenerId;

    /// Remove a listener. Returns false if it was not registered.
    fn remove_event_listener(&self, id: ListenerId) -> bool;

    /// Stop sending and receiving. Safe to call more than once.
    fn close(&self);

    /// Short name for diagnostics.
    fn primitive_name(&self) -> &'static str;
}

/// Whether an endpoint with `origin` is reached by a post targeted at `target`.
pub fn origin_matches(target: Option<&str>, origin: &str) -> bool {
    match target {
        None => true,
        Some(ANY_ORIGIN) => true,
        Some(target) => target == origin,
    }
}
