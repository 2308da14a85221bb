//! Connection lifecycle.
//!
//! Every connection state change goes through here so that the matching
//! intent reaches the broker-binding service. Intents are best effort:
//! a failed notification is logged and the stored change stands.

use std::sync::Arc;

use futures::{pin_mut, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::{self, ComponentId, Connection, ConnectionId, Endpoint, TopologyAction};
use crate::notifier::{TopologyChange, TopologyNotifier};
use crate::storage::{
    self, ComponentStore, ConnectionPage, ConnectionQuery, ConnectionStore, StorageError,
    Upserted,
};

#[cfg(test)]
mod tests;

/// Errors raised by lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("No live connection with id {0}")]
    NotFound(ConnectionId),

    #[error("Invalid connection: {0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Request to join two channels by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateConnection {
    pub source: Endpoint,
    pub target: Endpoint,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// Persists connection changes and emits the matching intents.
pub struct LifecycleManager {
    components: Arc<dyn ComponentStore>,
    connections: Arc<dyn ConnectionStore>,
    notifier: Arc<dyn TopologyNotifier>,
    page_size: usize,
}

impl LifecycleManager {
    pub fn new(
        components: Arc<dyn ComponentStore>,
        connections: Arc<dyn ConnectionStore>,
        notifier: Arc<dyn TopologyNotifier>,
        page_size: usize,
    ) -> Self {
        Self {
            components,
            connections,
            notifier,
            page_size: page_size.max(1),
        }
    }

    pub fn connections(&self) -> &Arc<dyn ConnectionStore> {
        &self.connections
    }

    /// Send an intent, logging rather than failing when delivery breaks.
    pub async fn notify(&self, action: TopologyAction, connection_id: &ConnectionId) {
        let change = TopologyChange::new(action, connection_id.clone());
        if let Err(e) = self.notifier.notify(change).await {
            warn!(
                action = %action,
                connection_id = %connection_id,
                error = %e,
                "Topology change not delivered"
            );
        }
    }

    /// Store a connection unless its endpoints are already joined.
    ///
    /// A newly stored, enabled connection is announced with ENABLE.
    pub async fn connect(&self, connection: Connection) -> Result<Upserted, StorageError> {
        let upserted = self.connections.upsert(connection).await?;
        if let Upserted::Created(created) = &upserted {
            info!(
                connection_id = %created.id,
                source = %created.source,
                target = %created.target,
                enabled = created.enabled,
                "Connection created"
            );
            if created.enabled {
                self.notify(TopologyAction::Enable, &created.id).await;
            }
        }
        Ok(upserted)
    }

    /// Enable, disable or remove a live connection.
    pub async fn set_state(
        &self,
        id: &ConnectionId,
        action: TopologyAction,
    ) -> Result<Connection, LifecycleError> {
        let enabled = match action {
            TopologyAction::Enable => true,
            TopologyAction::Disable => false,
            TopologyAction::Remove => return self.remove(id).await,
        };

        let connection = self
            .connections
            .set_enabled(id, enabled, model::now())
            .await?
            .ok_or_else(|| LifecycleError::NotFound(id.clone()))?;

        info!(connection_id = %id, enabled, "Connection state changed");
        self.notify(action, id).await;
        Ok(connection)
    }

    /// Soft-delete a live connection and announce its removal.
    pub async fn remove(&self, id: &ConnectionId) -> Result<Connection, LifecycleError> {
        let connection = self
            .connections
            .soft_delete(id, model::now())
            .await?
            .ok_or_else(|| LifecycleError::NotFound(id.clone()))?;

        info!(connection_id = %id, "Connection removed");
        self.notify(TopologyAction::Remove, id).await;
        Ok(connection)
    }

    /// Notify `subscriber` of traffic on a live connection.
    ///
    /// Returns whether the subscriber was newly added.
    pub async fn add_subscription(
        &self,
        id: &ConnectionId,
        subscriber: &Endpoint,
    ) -> Result<bool, LifecycleError> {
        let added = self
            .connections
            .add_subscription(id, subscriber, model::now())
            .await?
            .ok_or_else(|| LifecycleError::NotFound(id.clone()))?;

        if added {
            debug!(connection_id = %id, subscriber = %subscriber, "Subscription added");
        }
        Ok(added)
    }

    /// Pull every channel of `component` out of all notification sets.
    pub async fn remove_all_subscriptions_of(
        &self,
        component: &ComponentId,
    ) -> Result<u64, StorageError> {
        let changed = self
            .connections
            .remove_subscriptions_of(component, model::now())
            .await?;
        if changed > 0 {
            info!(component_id = %component, connections = changed, "Subscriptions removed");
        }
        Ok(changed)
    }

    /// Close every live connection that has `component` at either end.
    ///
    /// Each connection closed here is announced with REMOVE; connections
    /// another caller closed first are skipped. A failure on one connection
    /// is logged and the sweep moves on.
    pub async fn close_connections_of(
        &self,
        component: &ComponentId,
    ) -> Result<Vec<ConnectionId>, StorageError> {
        let page_size = self.page_size;
        let connections = self.connections.clone();
        let owner = component.clone();
        let pages = storage::keyset_pages(
            page_size,
            move |after: Option<ConnectionId>| {
                let connections = connections.clone();
                let owner = owner.clone();
                async move {
                    connections
                        .live_involving_after(&owner, after.as_ref(), page_size)
                        .await
                }
            },
            |c: &Connection| c.id.clone(),
        );
        pin_mut!(pages);

        let mut closed = Vec::new();
        while let Some(page) = pages.try_next().await? {
            for connection in page {
                match self.connections.soft_delete(&connection.id, model::now()).await {
                    Ok(Some(_)) => {
                        self.notify(TopologyAction::Remove, &connection.id).await;
                        closed.push(connection.id);
                    }
                    Ok(None) => {
                        debug!(connection_id = %connection.id, "Connection already closed");
                    }
                    Err(e) => {
                        warn!(
                            connection_id = %connection.id,
                            error = %e,
                            "Failed to close connection"
                        );
                    }
                }
            }
        }

        if !closed.is_empty() {
            info!(component_id = %component, closed = closed.len(), "Connections closed");
        }
        Ok(closed)
    }

    /// Join two channels by hand.
    ///
    /// Both components must be active, the source channel must publish and
    /// the target channel must subscribe. Payload schemas are not compared.
    pub async fn create(&self, request: CreateConnection) -> Result<Upserted, LifecycleError> {
        self.check_endpoint(&request.source, true).await?;
        self.check_endpoint(&request.target, false).await?;

        let connection = Connection::new(
            request.source,
            request.target,
            request.enabled,
            model::now(),
        );
        Ok(self.connect(connection).await?)
    }

    async fn check_endpoint(&self, endpoint: &Endpoint, publishes: bool) -> Result<(), LifecycleError> {
        let component = match self.components.get(&endpoint.component_id).await? {
            Some(component) if component.is_active() => component,
            _ => {
                return Err(LifecycleError::Validation(format!(
                    "component {} is not active",
                    endpoint.component_id
                )))
            }
        };

        let channel = component.channel(&endpoint.channel_name).ok_or_else(|| {
            LifecycleError::Validation(format!("unknown channel {}", endpoint))
        })?;

        if publishes && !channel.is_publisher() {
            return Err(LifecycleError::Validation(format!(
                "source channel {} does not publish",
                endpoint
            )));
        }
        if !publishes && !channel.is_subscriber() {
            return Err(LifecycleError::Validation(format!(
                "target channel {} does not subscribe",
                endpoint
            )));
        }
        Ok(())
    }

    pub async fn get(&self, id: &ConnectionId) -> Result<Option<Connection>, StorageError> {
        self.connections.get(id).await
    }

    pub async fn query(&self, query: &ConnectionQuery) -> Result<ConnectionPage, StorageError> {
        self.connections.query(query).await
    }
}
