//! Component registry.
//!
//! Validates and persists registrations, finishes components on
//! unregistration, and serves the listings discovery and queries need.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::{self, ChannelSchema, Component, ComponentId, ComponentType};
use crate::storage::{ComponentPage, ComponentQuery, ComponentStore, StorageError};

mod validation;

pub use validation::validate;


/// Errors raised by registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid registration: {0}")]
    Validation(String),

    #[error("No active component with id {0}")]
    NotFound(ComponentId),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Payload of a registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterComponent {
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    pub name: String,
    pub version: String,
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, alias = "channel_list")]
    pub channels: Vec<ChannelSchema>,
}

/// Registry of components backed by a [`ComponentStore`].
#[derive(Clone)]
pub struct Registry {
    components: Arc<dyn ComponentStore>,
}

impl Registry {
    pub fn new(components: Arc<dyn ComponentStore>) -> Self {
        Self { components }
    }

    /// Validate and persist a new component, active from now.
    pub async fn register(&self, request: RegisterComponent) -> Result<Component, RegistryError> {
        validate(&request).map_err(RegistryError::Validation)?;

        let component = Component {
            id: ComponentId::generate(),
            component_type: request.component_type,
            name: request.name,
            description: request.description,
            version: request.version,
            api_version: request.api_version,
            since: model::now(),
            finished_time: None,
            channels: request.channels,
        };
        self.components.insert(&component).await?;

        info!(
            component_id = %component.id,
            name = %component.name,
            channels = component.channels.len(),
            "Component registered"
        );
        Ok(component)
    }

    /// Finish an active component.
    ///
    /// Only one caller can finish a component; everyone else, and callers
    /// naming an unknown id, get `NotFound`.
    pub async fn unregister(&self, id: &ComponentId) -> Result<Component, RegistryError> {
        match self.components.finish(id, model::now()).await? {
            Some(component) => {
                info!(component_id = %id, name = %component.name, "Component unregistered");
                Ok(component)
            }
            None => {
                debug!(component_id = %id, "Unregister of unknown or finished component");
                Err(RegistryError::NotFound(id.clone()))
            }
        }
    }

    pub async fn get(&self, id: &ComponentId) -> Result<Option<Component>, RegistryError> {
        Ok(self.components.get(id).await?)
    }

    pub async fn query_active(
        &self,
        query: &ComponentQuery,
    ) -> Result<ComponentPage, RegistryError> {
        Ok(self.components.query(query).await?)
    }

    pub fn store(&self) -> &Arc<dyn ComponentStore> {
        &self.components
    }
}
