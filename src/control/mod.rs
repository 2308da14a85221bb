//! Control plane façade.
//!
//! Ties the registry, discovery, lifecycle and designed topology together
//! into the flows the message handlers drive. Registration and
//! unregistration succeed once the component record is written; the
//! topology work that follows is best effort and only logged on failure.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::behavior::{TopologyBehavior, TopologyBehaviorConfig, TopologyDesigner};
use crate::config::{Config, ConfigError};
use crate::discovery::DiscoveryEngine;
use crate::lifecycle::{CreateConnection, LifecycleError, LifecycleManager};
use crate::model::{
    Component, ComponentId, ComponentType, Connection, ConnectionId, TopologyAction,
};
use crate::notifier::TopologyNotifier;
use crate::registry::{RegisterComponent, Registry, RegistryError};
use crate::startup::{StartupReconciler, StartupReport};
use crate::storage::{
    ComponentPage, ComponentQuery, ComponentStore, ConnectionPage, ConnectionQuery,
    ConnectionStore, StorageError,
};

mod view;

pub use view::{ComponentTopology, TopologyEdge};


/// Errors surfaced to message handlers.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// How a failed request should be treated by its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is wrong; redelivery cannot help.
    Invalid,
    /// The request names something that is not there.
    NotFound,
    /// Storage hiccup; the request may succeed later.
    Transient,
}

impl ControlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Registry(RegistryError::Validation(_))
            | Self::Lifecycle(LifecycleError::Validation(_)) => ErrorKind::Invalid,
            Self::Registry(RegistryError::NotFound(_))
            | Self::Lifecycle(LifecycleError::NotFound(_)) => ErrorKind::NotFound,
            Self::Registry(RegistryError::Storage(e))
            | Self::Lifecycle(LifecycleError::Storage(e))
            | Self::Storage(e) => storage_kind(e),
        }
    }
}

fn storage_kind(error: &StorageError) -> ErrorKind {
    match error {
        StorageError::DuplicateComponent(_) | StorageError::Corrupt { .. } => ErrorKind::Invalid,
        _ => ErrorKind::Transient,
    }
}

/// Entry point for every topology operation.
pub struct ControlPlane {
    registry: Registry,
    lifecycle: Arc<LifecycleManager>,
    discovery: DiscoveryEngine,
    designer: TopologyDesigner,
    behavior: TopologyBehaviorConfig,
    startup: StartupReconciler,
    page_size: usize,
}

impl ControlPlane {
    pub fn from_config(
        components: Arc<dyn ComponentStore>,
        connections: Arc<dyn ConnectionStore>,
        notifier: Arc<dyn TopologyNotifier>,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        let page_size = config.topology.discovery_page_size;
        let lifecycle = Arc::new(LifecycleManager::new(
            components.clone(),
            connections.clone(),
            notifier,
            page_size,
        ));
        let designer = TopologyDesigner::new(
            components.clone(),
            lifecycle.clone(),
            config.topology.designed_topology()?,
        );

        Ok(Self {
            registry: Registry::new(components.clone()),
            discovery: DiscoveryEngine::new(components.clone(), lifecycle.clone(), page_size),
            lifecycle,
            designer,
            behavior: config.topology.behavior,
            startup: StartupReconciler::new(components, connections, config.startup),
            page_size: page_size.max(1),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Reconcile state left by a previous run. Only the first call in a
    /// process does anything.
    pub async fn startup(&self) -> Result<Option<StartupReport>, ControlError> {
        Ok(self.startup.run().await?)
    }

    pub async fn register(&self, request: RegisterComponent) -> Result<Component, ControlError> {
        let component = self.registry.register(request).await?;
        self.grow_topology(&component).await;
        Ok(component)
    }

    async fn grow_topology(&self, component: &Component) {
        let behavior = self.behavior.component_registered;
        let discover = match behavior {
            TopologyBehavior::DoNothing => false,
            TopologyBehavior::AutoDiscover => true,
            TopologyBehavior::ApplyTopology => {
                self.apply_design(component).await;
                false
            }
            TopologyBehavior::ApplyTopologyOrAutoDiscover => {
                self.apply_design(component).await;
                match self.is_unconnected(&component.id).await {
                    Ok(unconnected) => unconnected,
                    Err(e) => {
                        error!(component_id = %component.id, error = %e, "Connection check failed");
                        false
                    }
                }
            }
        };
        if !discover {
            return;
        }

        if let Err(e) = self.discovery.discover_connections(component).await {
            error!(component_id = %component.id, error = %e, "Connection discovery failed");
        }
        if component.component_type == ComponentType::C2 {
            if let Err(e) = self.discovery.discover_subscriptions_for_c2(component).await {
                error!(component_id = %component.id, error = %e, "Subscription discovery failed");
            }
        }
    }

    async fn apply_design(&self, component: &Component) {
        match self.designer.apply_for_component(component).await {
            Ok(created) => info!(
                component_id = %component.id,
                created = created.len(),
                "Designed topology applied"
            ),
            Err(e) => error!(
                component_id = %component.id,
                error = %e,
                "Designed topology could not be applied"
            ),
        }
    }

    async fn is_unconnected(&self, component: &ComponentId) -> Result<bool, StorageError> {
        let live = self
            .lifecycle
            .connections()
            .live_involving_after(component, None, 1)
            .await?;
        Ok(live.is_empty())
    }

    /// Finish a component and tear down everything attached to it.
    pub async fn unregister(&self, id: &ComponentId) -> Result<Component, ControlError> {
        let component = self.registry.unregister(id).await?;

        if let Err(e) = self.lifecycle.remove_all_subscriptions_of(id).await {
            error!(component_id = %id, error = %e, "Failed to remove subscriptions");
        }
        match self.lifecycle.close_connections_of(id).await {
            Ok(closed) => info!(
                component_id = %id,
                closed = closed.len(),
                "Component unregistered"
            ),
            Err(e) => error!(component_id = %id, error = %e, "Failed to close connections"),
        }
        Ok(component)
    }

    /// Create a connection by hand and apply the `connection_created`
    /// behavior when it is new.
    pub async fn create_connection(
        &self,
        request: CreateConnection,
    ) -> Result<Connection, ControlError> {
        let upserted = self.lifecycle.create(request).await?;
        if !upserted.is_created() {
            return Ok(upserted.into_connection());
        }

        let connection = upserted.into_connection();
        let result = match self.behavior.connection_created {
            TopologyBehavior::DoNothing => Ok(0),
            TopologyBehavior::AutoDiscover => {
                self.discovery.discover_subscriptions(&connection).await
            }
            TopologyBehavior::ApplyTopology => {
                self.designer.apply_for_connection(&connection).await
            }
            TopologyBehavior::ApplyTopologyOrAutoDiscover => {
                match self.designer.apply_for_connection(&connection).await {
                    Ok(0) => self.discovery.discover_subscriptions(&connection).await,
                    other => other,
                }
            }
        };
        if let Err(e) = result {
            warn!(connection_id = %connection.id, error = %e, "Notification setup failed");
        }

        // Re-read so the caller sees the subscriptions just added.
        Ok(self
            .lifecycle
            .get(&connection.id)
            .await?
            .unwrap_or(connection))
    }

    pub async fn change_topology(
        &self,
        id: &ConnectionId,
        action: TopologyAction,
    ) -> Result<Connection, ControlError> {
        Ok(self.lifecycle.set_state(id, action).await?)
    }

    pub async fn query_components(
        &self,
        query: &ComponentQuery,
    ) -> Result<ComponentPage, ControlError> {
        Ok(self.registry.query_active(query).await?)
    }

    pub async fn query_connections(
        &self,
        query: &ConnectionQuery,
    ) -> Result<ConnectionPage, ControlError> {
        Ok(self.lifecycle.query(query).await?)
    }

    /// Every active component with its outgoing live connections.
    pub async fn live_topology(&self) -> Result<Vec<ComponentTopology>, ControlError> {
        Ok(view::live_topology(
            self.registry.store().clone(),
            self.lifecycle.connections().clone(),
            self.page_size,
        )
        .await?)
    }
}
