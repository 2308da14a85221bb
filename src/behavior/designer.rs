use std::sync::Arc;

use tracing::{debug, warn};

use super::{DesignedConnection, DesignedEndpoint, DesignedTopology};
use crate::lifecycle::{LifecycleError, LifecycleManager};
use crate::model::{self, Component, Connection, ConnectionId, Endpoint};
use crate::storage::{ComponentStore, StorageError};

/// Applies a [`DesignedTopology`] to the live registry.
pub struct TopologyDesigner {
    components: Arc<dyn ComponentStore>,
    lifecycle: Arc<LifecycleManager>,
    designed: DesignedTopology,
}

impl TopologyDesigner {
    pub fn new(
        components: Arc<dyn ComponentStore>,
        lifecycle: Arc<LifecycleManager>,
        designed: DesignedTopology,
    ) -> Self {
        Self {
            components,
            lifecycle,
            designed,
        }
    }

    /// Create the designed connections `component` takes part in.
    ///
    /// Counterparts are matched by name among active components. Channels
    /// must exist with the right direction; payload schemas are trusted.
    /// Returns the connections created by this call.
    pub async fn apply_for_component(
        &self,
        component: &Component,
    ) -> Result<Vec<Connection>, StorageError> {
        let mut created = Vec::new();

        for designed in self.designed.involving(&component.name) {
            let sources = self.resolve(&designed.source, true, component).await?;
            let targets = self.resolve(&designed.target, false, component).await?;

            for source in &sources {
                for target in &targets {
                    if source.component_id != component.id && target.component_id != component.id {
                        continue;
                    }
                    let connection = Connection::new(
                        source.clone(),
                        target.clone(),
                        designed.enabled,
                        model::now(),
                    );
                    let upserted = self.lifecycle.connect(connection).await?;
                    let connection = upserted.connection().clone();
                    self.subscribe(&connection.id, designed).await?;
                    if upserted.is_created() {
                        created.push(connection);
                    }
                }
            }
        }

        Ok(created)
    }

    /// Add the designed notifications of a connection created by hand.
    pub async fn apply_for_connection(
        &self,
        connection: &Connection,
    ) -> Result<usize, StorageError> {
        let Some(source) = self.components.get(&connection.source.component_id).await? else {
            return Ok(0);
        };
        let Some(target) = self.components.get(&connection.target.component_id).await? else {
            return Ok(0);
        };

        let mut added = 0;
        for designed in &self.designed.connections {
            let matches = designed.source.component == source.name
                && designed.source.channel == connection.source.channel_name
                && designed.target.component == target.name
                && designed.target.channel == connection.target.channel_name;
            if matches {
                added += self.subscribe(&connection.id, designed).await?;
            }
        }
        Ok(added)
    }

    async fn subscribe(
        &self,
        connection_id: &ConnectionId,
        designed: &DesignedConnection,
    ) -> Result<usize, StorageError> {
        let mut added = 0;
        for notification in &designed.notifications {
            for subscriber in self.subscribers(notification).await? {
                match self.lifecycle.add_subscription(connection_id, &subscriber).await {
                    Ok(true) => added += 1,
                    Ok(false) => {}
                    Err(LifecycleError::Storage(e)) => return Err(e),
                    Err(e) => {
                        warn!(
                            connection_id = %connection_id,
                            error = %e,
                            "Designed notification skipped"
                        );
                    }
                }
            }
        }
        Ok(added)
    }

    /// Endpoints for a designed side. `registered` is used as-is when it
    /// carries the name, since it may not be visible to a fresh read yet.
    async fn resolve(
        &self,
        endpoint: &DesignedEndpoint,
        publishes: bool,
        registered: &Component,
    ) -> Result<Vec<Endpoint>, StorageError> {
        let candidates = if endpoint.component == registered.name {
            vec![registered.clone()]
        } else {
            self.components.active_named(&endpoint.component).await?
        };

        Ok(candidates
            .into_iter()
            .filter_map(|component| {
                let channel = component.channel(&endpoint.channel)?;
                let direction_ok = if publishes {
                    channel.is_publisher()
                } else {
                    channel.is_subscriber()
                };
                if !direction_ok {
                    debug!(
                        component = %endpoint.component,
                        channel = %endpoint.channel,
                        "Designed channel has the wrong direction"
                    );
                    return None;
                }
                Some(Endpoint::new(component.id.clone(), endpoint.channel.clone()))
            })
            .collect())
    }

    async fn subscribers(&self, endpoint: &DesignedEndpoint) -> Result<Vec<Endpoint>, StorageError> {
        Ok(self
            .components
            .active_named(&endpoint.component)
            .await?
            .into_iter()
            .filter(|c| c.channel(&endpoint.channel).is_some_and(|ch| ch.is_subscriber()))
            .map(|c| Endpoint::new(c.id, endpoint.channel.clone()))
            .collect())
    }
}
