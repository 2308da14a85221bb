//! Registry and topology records.
//!
//! Plain value types shared by the stores, the registry, the discovery engine
//! and the message contracts.

mod component;
mod connection;

pub use component::{ChannelSchema, Component, ComponentId, ComponentType};
pub use connection::{Connection, ConnectionId, Endpoint, TopologyAction};

/// Current time as epoch seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Fresh time-ordered identifier.
///
/// UUIDv7 strings sort by creation time, which keeps id-ordered keyset
/// pagination close to insertion order.
pub(crate) fn new_id() -> String {
    uuid::Uuid::now_v7().as_simple().to_string()
}
