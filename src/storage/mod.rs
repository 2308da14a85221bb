//! Persistence for the component registry and the topology.
//!
//! Two stores sit behind traits so the control plane can run against
//! memory in tests and SQLite in deployment:
//! - [`ComponentStore`]: registered components, finished in place
//! - [`ConnectionStore`]: connections, soft-deleted in place
//!
//! Every state transition is a test-and-set on the store, so callers that
//! race on the same record observe exactly one winner.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::model::{Component, ComponentId, Connection, ConnectionId, Endpoint};

pub mod memory;
pub mod query;

#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{MemoryComponentStore, MemoryConnectionStore};
pub use query::{
    ComponentOrder, ComponentPage, ComponentQuery, ConnectionPage, ConnectionQuery, TextPattern,
};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteComponentStore, SqliteConnectionStore};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Component already exists: {0}")]
    DuplicateComponent(ComponentId),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of [`ConnectionStore::upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upserted {
    /// No live connection joined the endpoints; this one was stored.
    Created(Connection),
    /// A live connection already joined the endpoints and was left untouched.
    Existing(Connection),
}

impl Upserted {
    pub fn connection(&self) -> &Connection {
        match self {
            Self::Created(c) | Self::Existing(c) => c,
        }
    }

    pub fn into_connection(self) -> Connection {
        match self {
            Self::Created(c) | Self::Existing(c) => c,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Registered components.
///
/// Components are never updated after insert except for the one-way
/// `finished_time` transition.
#[async_trait]
pub trait ComponentStore: Send + Sync {
    /// Store a new component. Fails if the id is already present.
    async fn insert(&self, component: &Component) -> Result<()>;

    /// Fetch a component, active or finished.
    async fn get(&self, id: &ComponentId) -> Result<Option<Component>>;

    /// Mark an active component finished.
    ///
    /// Returns the finished component only for the caller that performed
    /// the transition; `None` if the component is unknown or already finished.
    async fn finish(&self, id: &ComponentId, now: i64) -> Result<Option<Component>>;

    /// Finish every active component. Returns how many changed.
    async fn finish_all(&self, now: i64) -> Result<u64>;

    /// Remove every component record. Returns how many were removed.
    async fn drop_all(&self) -> Result<u64>;

    /// Active components that declare at least one channel, with id greater
    /// than `after`, ordered by id.
    async fn active_after(
        &self,
        after: Option<&ComponentId>,
        limit: usize,
    ) -> Result<Vec<Component>>;

    /// Active components registered under `name`, ordered by id.
    async fn active_named(&self, name: &str) -> Result<Vec<Component>>;

    /// Filtered, sorted window over active components.
    async fn query(&self, query: &ComponentQuery) -> Result<ComponentPage>;
}

/// Topology connections.
///
/// At most one live connection exists per (source, target) endpoint pair.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Store `connection` unless a live one already joins the same endpoints.
    async fn upsert(&self, connection: Connection) -> Result<Upserted>;

    /// Fetch a connection, live or deleted.
    async fn get(&self, id: &ConnectionId) -> Result<Option<Connection>>;

    /// Set the enabled flag of a live connection.
    ///
    /// `None` if the connection is unknown or deleted.
    async fn set_enabled(
        &self,
        id: &ConnectionId,
        enabled: bool,
        now: i64,
    ) -> Result<Option<Connection>>;

    /// Soft-delete and disable a live connection.
    ///
    /// Returns the deleted connection only for the caller that performed
    /// the transition.
    async fn soft_delete(&self, id: &ConnectionId, now: i64) -> Result<Option<Connection>>;

    /// Add `subscriber` to a live connection's notification set.
    ///
    /// `None` if the connection is unknown or deleted, otherwise whether the
    /// subscriber was newly added.
    async fn add_subscription(
        &self,
        id: &ConnectionId,
        subscriber: &Endpoint,
        now: i64,
    ) -> Result<Option<bool>>;

    /// Pull every channel of `component` out of all notification sets.
    ///
    /// Returns the number of connections that changed.
    async fn remove_subscriptions_of(&self, component: &ComponentId, now: i64) -> Result<u64>;

    /// Live connections with id greater than `after`, ordered by id.
    async fn live_after(
        &self,
        after: Option<&ConnectionId>,
        limit: usize,
    ) -> Result<Vec<Connection>>;

    /// Live connections where `component` is source or target, ordered by id.
    async fn live_involving_after(
        &self,
        component: &ComponentId,
        after: Option<&ConnectionId>,
        limit: usize,
    ) -> Result<Vec<Connection>>;

    /// Filtered window over connections, ordered by id.
    async fn query(&self, query: &ConnectionQuery) -> Result<ConnectionPage>;

    /// Disable every live connection. Returns how many changed.
    async fn disable_all(&self, now: i64) -> Result<u64>;

    /// Soft-delete and disable every live connection. Returns how many changed.
    async fn soft_delete_all(&self, now: i64) -> Result<u64>;

    /// Remove every connection record. Returns how many were removed.
    async fn drop_all(&self) -> Result<u64>;
}

/// Lazily walk a keyset-paginated listing.
///
/// `fetch(after)` returns up to `page_size` records ordered by key, starting
/// strictly after `after`. The stream ends after the first short page. Each
/// page is fetched only when polled, so records modified between pages do
/// not shift the cursor.
pub fn keyset_pages<T, K, F, Fut>(
    page_size: usize,
    fetch: F,
    key_of: fn(&T) -> K,
) -> impl Stream<Item = Result<Vec<T>>>
where
    F: Fn(Option<K>) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    futures::stream::try_unfold(Some(None::<K>), move |cursor| {
        let pending = cursor.map(|after| fetch(after));
        async move {
            let Some(pending) = pending else {
                return Ok(None);
            };
            let page = pending.await?;
            if page.is_empty() {
                return Ok(None);
            }
            let next = if page.len() < page_size {
                None
            } else {
                page.last().map(|last| Some(key_of(last)))
            };
            Ok(Some((page, next)))
        }
    })
}

/// Active components with channels, one page at a time.
pub fn active_component_pages(
    components: Arc<dyn ComponentStore>,
    page_size: usize,
) -> impl Stream<Item = Result<Vec<Component>>> {
    keyset_pages(
        page_size,
        move |after: Option<ComponentId>| {
            let components = components.clone();
            async move { components.active_after(after.as_ref(), page_size).await }
        },
        |c: &Component| c.id.clone(),
    )
}

/// Live connections, one page at a time.
pub fn live_connection_pages(
    connections: Arc<dyn ConnectionStore>,
    page_size: usize,
) -> impl Stream<Item = Result<Vec<Connection>>> {
    keyset_pages(
        page_size,
        move |after: Option<ConnectionId>| {
            let connections = connections.clone();
            async move { connections.live_after(after.as_ref(), page_size).await }
        },
        |c: &Connection| c.id.clone(),
    )
}

/// Initialize storage based on configuration.
pub async fn init_storage(
    config: &StorageConfig,
) -> std::result::Result<(Arc<dyn ComponentStore>, Arc<dyn ConnectionStore>), Box<dyn std::error::Error>>
{
    match config.storage_type {
        StorageType::Memory => {
            info!("Storage: memory");
            Ok((
                Arc::new(MemoryComponentStore::new()),
                Arc::new(MemoryConnectionStore::new()),
            ))
        }
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            let path = &config.sqlite.path;
            info!("Storage: sqlite at {}", path);

            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", path)).await?;

            let components = SqliteComponentStore::new(pool.clone());
            components.init_schema().await?;

            let connections = SqliteConnectionStore::new(pool);
            connections.init_schema().await?;

            Ok((Arc::new(components), Arc::new(connections)))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err("SQLite feature not enabled".into())
        }
    }
}
