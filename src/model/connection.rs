use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ComponentId;

/// Identifier of a topology connection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(super::new_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A channel of a specific component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub component_id: ComponentId,
    pub channel_name: String,
}

impl Endpoint {
    pub fn new(component_id: ComponentId, channel_name: impl Into<String>) -> Self {
        Self {
            component_id,
            channel_name: channel_name.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.component_id, self.channel_name)
    }
}

/// Directed edge from a publish channel to a subscribe channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    /// Publishing side.
    pub source: Endpoint,
    /// Subscribing side.
    pub target: Endpoint,
    pub enabled: bool,
    pub create_timestamp: i64,
    pub update_timestamp: i64,
    /// Soft-delete marker; `None` while the connection is live.
    #[serde(default)]
    pub deleted_timestamp: Option<i64>,
    /// Third-party channels notified when a message traverses the connection.
    #[serde(default)]
    pub c2_subscriptions: BTreeSet<Endpoint>,
}

impl Connection {
    /// New live connection stamped with `now`.
    pub fn new(source: Endpoint, target: Endpoint, enabled: bool, now: i64) -> Self {
        Self {
            id: ConnectionId::generate(),
            source,
            target,
            enabled,
            create_timestamp: now,
            update_timestamp: now,
            deleted_timestamp: None,
            c2_subscriptions: BTreeSet::new(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.deleted_timestamp.is_none()
    }

    /// Whether `component` is the source or the target.
    pub fn involves(&self, component: &ComponentId) -> bool {
        &self.source.component_id == component || &self.target.component_id == component
    }

    /// Whether this connection joins `source` to `target`.
    pub fn same_endpoints(&self, source: &Endpoint, target: &Endpoint) -> bool {
        &self.source == source && &self.target == target
    }
}

/// Intent sent to the broker-binding service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TopologyAction {
    /// Bind the connection so messages flow.
    Enable,
    /// Keep the connection but stop the flow.
    Disable,
    /// Unbind the connection for good.
    Remove,
}

impl fmt::Display for TopologyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Enable => "ENABLE",
            Self::Disable => "DISABLE",
            Self::Remove => "REMOVE",
        };
        f.write_str(name)
    }
}
