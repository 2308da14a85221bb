//! Topology and startup configuration types.

use serde::Deserialize;

use super::ConfigError;
use crate::behavior::{DesignedTopology, TopologyBehaviorConfig};
use crate::startup::{ComponentStartupPolicy, ConnectionStartupPolicy};

/// Default page size of the discovery scan.
pub const DEFAULT_DISCOVERY_PAGE_SIZE: usize = 10;

/// How the topology grows as components come and go.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub behavior: TopologyBehaviorConfig,
    /// Page size used when scanning the registry for counterparts.
    pub discovery_page_size: usize,
    /// Designed connections declared inline.
    pub designed: DesignedTopology,
    /// YAML file with further designed connections.
    pub designed_file: Option<String>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            behavior: TopologyBehaviorConfig::default(),
            discovery_page_size: DEFAULT_DISCOVERY_PAGE_SIZE,
            designed: DesignedTopology::default(),
            designed_file: None,
        }
    }
}

impl TopologyConfig {
    /// Inline designed connections followed by those of `designed_file`.
    pub fn designed_topology(&self) -> Result<DesignedTopology, ConfigError> {
        let mut topology = self.designed.clone();
        if let Some(path) = &self.designed_file {
            let file = DesignedTopology::from_yaml_file(path)?;
            topology.connections.extend(file.connections);
        }
        Ok(topology)
    }
}

/// What to do with state left over from a previous run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    pub components: ComponentStartupPolicy,
    pub connections: ConnectionStartupPolicy,
}
