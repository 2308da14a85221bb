//! In-memory storage implementations.
//!
//! Used by the standalone runtime when no database is configured and by
//! tests. Each store can be switched into a failing mode to exercise
//! transient-error handling upstream.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    ComponentPage, ComponentQuery, ComponentStore, ConnectionPage, ConnectionQuery,
    ConnectionStore, Result, StorageError, Upserted,
};
use crate::model::{Component, ComponentId, Connection, ConnectionId, Endpoint};


/// Component store backed by an id-ordered map.
#[derive(Default)]
pub struct MemoryComponentStore {
    components: RwLock<BTreeMap<ComponentId, Component>>,
    unavailable: RwLock<bool>,
}

impl MemoryComponentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`StorageError::Unavailable`].
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    async fn check(&self) -> Result<()> {
        if *self.unavailable.read().await {
            return Err(StorageError::Unavailable("component store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ComponentStore for MemoryComponentStore {
    async fn insert(&self, component: &Component) -> Result<()> {
        self.check().await?;
        let mut components = self.components.write().await;
        if components.contains_key(&component.id) {
            return Err(StorageError::DuplicateComponent(component.id.clone()));
        }
        components.insert(component.id.clone(), component.clone());
        Ok(())
    }

    async fn get(&self, id: &ComponentId) -> Result<Option<Component>> {
        self.check().await?;
        Ok(self.components.read().await.get(id).cloned())
    }

    async fn finish(&self, id: &ComponentId, now: i64) -> Result<Option<Component>> {
        self.check().await?;
        let mut components = self.components.write().await;
        match components.get_mut(id) {
            Some(component) if component.is_active() => {
                component.finished_time = Some(now);
                Ok(Some(component.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn finish_all(&self, now: i64) -> Result<u64> {
        self.check().await?;
        let mut components = self.components.write().await;
        let mut changed = 0;
        for component in components.values_mut().filter(|c| c.is_active()) {
            component.finished_time = Some(now);
            changed += 1;
        }
        Ok(changed)
    }

    async fn drop_all(&self) -> Result<u64> {
        self.check().await?;
        let mut components = self.components.write().await;
        let removed = components.len() as u64;
        components.clear();
        Ok(removed)
    }

    async fn active_after(
        &self,
        after: Option<&ComponentId>,
        limit: usize,
    ) -> Result<Vec<Component>> {
        self.check().await?;
        let components = self.components.read().await;
        Ok(components
            .values()
            .filter(|c| after.map_or(true, |a| &c.id > a))
            .filter(|c| c.is_active() && !c.channels.is_empty())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn active_named(&self, name: &str) -> Result<Vec<Component>> {
        self.check().await?;
        let components = self.components.read().await;
        Ok(components
            .values()
            .filter(|c| c.is_active() && c.name == name)
            .cloned()
            .collect())
    }

    async fn query(&self, query: &ComponentQuery) -> Result<ComponentPage> {
        self.check().await?;
        let components = self.components.read().await;
        Ok(query.paginate(components.values().cloned()))
    }
}

#[derive(Default)]
struct ConnectionTable {
    rows: BTreeMap<ConnectionId, Connection>,
    /// Live connection per (source, target).
    live: HashMap<(Endpoint, Endpoint), ConnectionId>,
}

impl ConnectionTable {
    fn live_mut(&mut self, id: &ConnectionId) -> Option<&mut Connection> {
        self.rows.get_mut(id).filter(|c| c.is_live())
    }
}

/// Connection store backed by an id-ordered map plus a live-pair index.
///
/// The index and the rows share one lock, so upserts on the same pair are
/// serialized.
#[derive(Default)]
pub struct MemoryConnectionStore {
    table: RwLock<ConnectionTable>,
    unavailable: RwLock<bool>,
}

impl MemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`StorageError::Unavailable`].
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    async fn check(&self) -> Result<()> {
        if *self.unavailable.read().await {
            return Err(StorageError::Unavailable("connection store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn upsert(&self, connection: Connection) -> Result<Upserted> {
        self.check().await?;
        let mut table = self.table.write().await;
        let pair = (connection.source.clone(), connection.target.clone());

        if let Some(existing) = table.live.get(&pair).and_then(|id| table.rows.get(id)) {
            return Ok(Upserted::Existing(existing.clone()));
        }

        table.live.insert(pair, connection.id.clone());
        table.rows.insert(connection.id.clone(), connection.clone());
        Ok(Upserted::Created(connection))
    }

    async fn get(&self, id: &ConnectionId) -> Result<Option<Connection>> {
        self.check().await?;
        Ok(self.table.read().await.rows.get(id).cloned())
    }

    async fn set_enabled(
        &self,
        id: &ConnectionId,
        enabled: bool,
        now: i64,
    ) -> Result<Option<Connection>> {
        self.check().await?;
        let mut table = self.table.write().await;
        Ok(table.live_mut(id).map(|connection| {
            connection.enabled = enabled;
            connection.update_timestamp = now;
            connection.clone()
        }))
    }

    async fn soft_delete(&self, id: &ConnectionId, now: i64) -> Result<Option<Connection>> {
        self.check().await?;
        let mut table = self.table.write().await;
        let Some(connection) = table.live_mut(id) else {
            return Ok(None);
        };
        connection.deleted_timestamp = Some(now);
        connection.enabled = false;
        connection.update_timestamp = now;
        let deleted = connection.clone();
        table
            .live
            .remove(&(deleted.source.clone(), deleted.target.clone()));
        Ok(Some(deleted))
    }

    async fn add_subscription(
        &self,
        id: &ConnectionId,
        subscriber: &Endpoint,
        now: i64,
    ) -> Result<Option<bool>> {
        self.check().await?;
        let mut table = self.table.write().await;
        Ok(table.live_mut(id).map(|connection| {
            let added = connection.c2_subscriptions.insert(subscriber.clone());
            if added {
                connection.update_timestamp = now;
            }
            added
        }))
    }

    async fn remove_subscriptions_of(&self, component: &ComponentId, now: i64) -> Result<u64> {
        self.check().await?;
        let mut table = self.table.write().await;
        let mut changed = 0;
        for connection in table.rows.values_mut() {
            let before = connection.c2_subscriptions.len();
            connection
                .c2_subscriptions
                .retain(|s| &s.component_id != component);
            if connection.c2_subscriptions.len() != before {
                connection.update_timestamp = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn live_after(
        &self,
        after: Option<&ConnectionId>,
        limit: usize,
    ) -> Result<Vec<Connection>> {
        self.check().await?;
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .filter(|c| after.map_or(true, |a| &c.id > a))
            .filter(|c| c.is_live())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn live_involving_after(
        &self,
        component: &ComponentId,
        after: Option<&ConnectionId>,
        limit: usize,
    ) -> Result<Vec<Connection>> {
        self.check().await?;
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .filter(|c| after.map_or(true, |a| &c.id > a))
            .filter(|c| c.is_live() && c.involves(component))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn query(&self, query: &ConnectionQuery) -> Result<ConnectionPage> {
        self.check().await?;
        let table = self.table.read().await;
        Ok(query.paginate(table.rows.values().cloned()))
    }

    async fn disable_all(&self, now: i64) -> Result<u64> {
        self.check().await?;
        let mut table = self.table.write().await;
        let mut changed = 0;
        for connection in table.rows.values_mut() {
            if connection.is_live() && connection.enabled {
                connection.enabled = false;
                connection.update_timestamp = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn soft_delete_all(&self, now: i64) -> Result<u64> {
        self.check().await?;
        let mut table = self.table.write().await;
        let mut changed = 0;
        for connection in table.rows.values_mut().filter(|c| c.is_live()) {
            connection.deleted_timestamp = Some(now);
            connection.enabled = false;
            connection.update_timestamp = now;
            changed += 1;
        }
        table.live.clear();
        Ok(changed)
    }

    async fn drop_all(&self) -> Result<u64> {
        self.check().await?;
        let mut table = self.table.write().await;
        let removed = table.rows.len() as u64;
        table.rows.clear();
        table.live.clear();
        Ok(removed)
    }
}
