//! Connection discovery.
//!
//! When a component registers, the registry is scanned once, page by page,
//! for channels whose payload schemas line up with the newcomer's. Only the
//! registering side scans, so two components registering at the same time
//! may miss each other; the next registration of either closes the gap.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{pin_mut, Stream, TryStreamExt};
use tracing::{debug, info, warn};

use crate::lifecycle::{LifecycleError, LifecycleManager};
use crate::model::{
    self, ChannelSchema, Component, ComponentId, ComponentType, Connection, ConnectionId,
    Endpoint,
};
use crate::payload::{self, PayloadSchema};
use crate::storage::{self, ComponentStore, StorageError};


/// Finds connections and notification subscriptions by schema.
pub struct DiscoveryEngine {
    components: Arc<dyn ComponentStore>,
    lifecycle: Arc<LifecycleManager>,
    page_size: usize,
}

impl DiscoveryEngine {
    pub fn new(
        components: Arc<dyn ComponentStore>,
        lifecycle: Arc<LifecycleManager>,
        page_size: usize,
    ) -> Self {
        Self {
            components,
            lifecycle,
            page_size: page_size.max(1),
        }
    }

    fn active_components(&self) -> impl Stream<Item = storage::Result<Vec<Component>>> {
        storage::active_component_pages(self.components.clone(), self.page_size)
    }

    fn live_connections(&self) -> impl Stream<Item = storage::Result<Vec<Connection>>> {
        storage::live_connection_pages(self.lifecycle.connections().clone(), self.page_size)
    }

    /// Connect `component` to every active counterpart with a compatible
    /// channel, in both directions.
    ///
    /// Returns the connections this call created. Connections that already
    /// existed are left alone. A failed upsert is logged and skipped; a
    /// failed page read ends the scan with an error.
    pub async fn discover_connections(
        &self,
        component: &Component,
    ) -> Result<Vec<Connection>, StorageError> {
        let pages = self.active_components();
        pin_mut!(pages);

        let mut created = Vec::new();
        while let Some(page) = pages.try_next().await? {
            for other in page.iter().filter(|other| other.id != component.id) {
                for (source, target) in compatible_pairs(component, other) {
                    match self.connect(source, target).await {
                        Ok(Some(connection)) => created.push(connection),
                        Ok(None) => {}
                        Err(e) => {
                            warn!(
                                component_id = %component.id,
                                counterpart = %other.id,
                                error = %e,
                                "Failed to store discovered connection"
                            );
                        }
                    }
                }
            }
        }

        info!(
            component_id = %component.id,
            name = %component.name,
            created = created.len(),
            "Connection discovery finished"
        );
        Ok(created)
    }

    async fn connect(
        &self,
        source: Side<'_>,
        target: Side<'_>,
    ) -> Result<Option<Connection>, StorageError> {
        let connection = Connection::new(
            Endpoint::new(source.0.id.clone(), source.1.name.clone()),
            Endpoint::new(target.0.id.clone(), target.1.name.clone()),
            true,
            model::now(),
        );
        let upserted = self.lifecycle.connect(connection).await?;
        if !upserted.is_created() {
            return Ok(None);
        }

        let connection = upserted.into_connection();
        if let Some(published) = &source.1.publish {
            if let Err(e) = self.subscribe_c2_components(&connection, published).await {
                warn!(
                    connection_id = %connection.id,
                    error = %e,
                    "Subscription discovery failed"
                );
            }
        }
        Ok(Some(connection))
    }

    /// Subscribe every matching C2 channel to a connection created outside
    /// discovery.
    pub async fn discover_subscriptions(&self, connection: &Connection) -> Result<usize, StorageError> {
        let published = self
            .components
            .get(&connection.source.component_id)
            .await?
            .and_then(|c| c.channel(&connection.source.channel_name).cloned())
            .and_then(|c| c.publish);
        match published {
            Some(published) => self.subscribe_c2_components(connection, &published).await,
            None => Ok(0),
        }
    }

    /// Add every active C2 channel that accepts `published` to the
    /// connection's notification set.
    async fn subscribe_c2_components(
        &self,
        connection: &Connection,
        published: &PayloadSchema,
    ) -> Result<usize, StorageError> {
        let pages = self.active_components();
        pin_mut!(pages);

        let mut added = 0;
        while let Some(page) = pages.try_next().await? {
            for watcher in page.iter().filter(|c| c.component_type == ComponentType::C2) {
                if connection.involves(&watcher.id) {
                    continue;
                }
                for channel in watcher.subscribers() {
                    if !payload::matches_optional(Some(published), channel.subscribe.as_ref()) {
                        continue;
                    }
                    let subscriber = Endpoint::new(watcher.id.clone(), channel.name.clone());
                    if self.subscribe(&connection.id, &subscriber).await? {
                        added += 1;
                    }
                }
            }
        }
        Ok(added)
    }

    /// Subscribe a newly registered C2 component to every live connection
    /// whose traffic one of its channels accepts.
    pub async fn discover_subscriptions_for_c2(
        &self,
        component: &Component,
    ) -> Result<usize, StorageError> {
        if component.component_type != ComponentType::C2 {
            return Ok(0);
        }

        let pages = self.live_connections();
        pin_mut!(pages);

        // Source components seen during this scan.
        let mut sources: HashMap<ComponentId, Option<Component>> = HashMap::new();
        let mut added = 0;
        while let Some(page) = pages.try_next().await? {
            for connection in page.iter().filter(|c| !c.involves(&component.id)) {
                let source_id = &connection.source.component_id;
                if !sources.contains_key(source_id) {
                    let source = self.components.get(source_id).await?;
                    sources.insert(source_id.clone(), source);
                }
                let published = sources
                    .get(source_id)
                    .and_then(Option::as_ref)
                    .and_then(|c| c.channel(&connection.source.channel_name))
                    .and_then(|c| c.publish.as_ref());
                let Some(published) = published else {
                    continue;
                };

                for channel in component.subscribers() {
                    if !payload::matches_optional(Some(published), channel.subscribe.as_ref()) {
                        continue;
                    }
                    let subscriber = Endpoint::new(component.id.clone(), channel.name.clone());
                    if self.subscribe(&connection.id, &subscriber).await? {
                        added += 1;
                    }
                }
            }
        }

        info!(component_id = %component.id, added, "Subscription discovery finished");
        Ok(added)
    }

    /// A connection closed mid-scan is skipped.
    async fn subscribe(
        &self,
        connection_id: &ConnectionId,
        subscriber: &Endpoint,
    ) -> Result<bool, StorageError> {
        match self.lifecycle.add_subscription(connection_id, subscriber).await {
            Ok(added) => Ok(added),
            Err(LifecycleError::Storage(e)) => Err(e),
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "Subscription skipped");
                Ok(false)
            }
        }
    }
}

/// One end of a prospective connection.
pub type Side<'a> = (&'a Component, &'a ChannelSchema);

/// Channel pairs of `a` and `b` that can be joined, as (source, target).
pub fn compatible_pairs<'a>(a: &'a Component, b: &'a Component) -> Vec<(Side<'a>, Side<'a>)> {
    let mut pairs = Vec::new();
    for x in &a.channels {
        for y in &b.channels {
            if x.feeds(y) {
                pairs.push(((a, x), (b, y)));
            }
            if y.feeds(x) {
                pairs.push(((b, y), (a, x)));
            }
        }
    }
    pairs
}
