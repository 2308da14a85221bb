//! Topology behavior and designed topology.
//!
//! The behavior decides what happens after a component registers or a
//! connection is created by hand: nothing, automatic discovery, or the
//! connections an operator declared up front.

mod designer;

pub use designer::TopologyDesigner;


use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Reaction to a topology event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopologyBehavior {
    DoNothing,
    #[default]
    AutoDiscover,
    ApplyTopology,
    /// Apply the designed topology; discover only if it left the
    /// component unconnected.
    ApplyTopologyOrAutoDiscover,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TopologyBehaviorConfig {
    /// Reaction to a successful registration.
    pub component_registered: TopologyBehavior,
    /// Reaction to a connection created by hand.
    pub connection_created: TopologyBehavior,
}

/// A channel of a component referenced by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignedEndpoint {
    pub component: String,
    pub channel: String,
}

/// Connection declared by an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignedConnection {
    pub source: DesignedEndpoint,
    pub target: DesignedEndpoint,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Channels told about every message crossing the connection.
    #[serde(default)]
    pub notifications: Vec<DesignedEndpoint>,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignedTopology {
    pub connections: Vec<DesignedConnection>,
}

impl DesignedTopology {
    pub fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::DesignedTopology {
            path: path.to_string(),
            source,
        })
    }

    /// Designed connections naming `component` on either side.
    pub fn involving<'a>(&'a self, component: &'a str) -> impl Iterator<Item = &'a DesignedConnection> {
        self.connections
            .iter()
            .filter(move |c| c.source.component == component || c.target.component == component)
    }
}
