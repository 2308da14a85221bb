//! Read view of the live topology.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{pin_mut, TryStreamExt};
use serde::Serialize;

use crate::model::{ComponentId, ComponentType, ConnectionId, Endpoint};
use crate::storage::{self, ComponentStore, ConnectionStore, StorageError};

/// An active component and where its messages go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentTopology {
    pub id: ComponentId,
    pub name: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    pub connections: Vec<TopologyEdge>,
}

/// Outgoing live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologyEdge {
    pub connection_id: ConnectionId,
    pub source_channel: String,
    pub target: Endpoint,
    pub enabled: bool,
    pub notifications: Vec<Endpoint>,
}

pub(super) async fn live_topology(
    components: Arc<dyn ComponentStore>,
    connections: Arc<dyn ConnectionStore>,
    page_size: usize,
) -> Result<Vec<ComponentTopology>, StorageError> {
    let mut outgoing: HashMap<ComponentId, Vec<TopologyEdge>> = HashMap::new();
    let pages = storage::live_connection_pages(connections, page_size);
    pin_mut!(pages);
    while let Some(page) = pages.try_next().await? {
        for connection in page {
            outgoing
                .entry(connection.source.component_id.clone())
                .or_default()
                .push(TopologyEdge {
                    connection_id: connection.id,
                    source_channel: connection.source.channel_name,
                    target: connection.target,
                    enabled: connection.enabled,
                    notifications: connection.c2_subscriptions.into_iter().collect(),
                });
        }
    }

    let mut topology = Vec::new();
    let pages = storage::active_component_pages(components, page_size);
    pin_mut!(pages);
    while let Some(page) = pages.try_next().await? {
        for component in page {
            let connections = outgoing.remove(&component.id).unwrap_or_default();
            topology.push(ComponentTopology {
                id: component.id,
                name: component.name,
                component_type: component.component_type,
                connections,
            });
        }
    }
    Ok(topology)
}
