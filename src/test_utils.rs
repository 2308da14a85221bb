//! Fixtures shared by unit tests.

use std::sync::Arc;

use crate::lifecycle::LifecycleManager;
use crate::model::{self, ChannelSchema, Component, ComponentId, ComponentType};
use crate::notifier::MockTopologyNotifier;
use crate::payload::{BasicFormat, PayloadSchema};
use crate::registry::Registry;
use crate::storage::{ComponentStore, MemoryComponentStore, MemoryConnectionStore};

pub fn text() -> PayloadSchema {
    PayloadSchema::basic(BasicFormat::String)
}

pub fn number() -> PayloadSchema {
    PayloadSchema::basic(BasicFormat::Number)
}

/// Active component with a fresh id.
pub fn component(
    component_type: ComponentType,
    name: &str,
    channels: Vec<ChannelSchema>,
) -> Component {
    Component {
        id: ComponentId::generate(),
        component_type,
        name: name.to_string(),
        description: None,
        version: "1.0.0".into(),
        api_version: "1.0.0".into(),
        since: model::now(),
        finished_time: None,
        channels,
    }
}

/// In-memory stores plus a recording notifier.
pub struct Harness {
    pub components: Arc<MemoryComponentStore>,
    pub connections: Arc<MemoryConnectionStore>,
    pub notifier: Arc<MockTopologyNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            components: Arc::new(MemoryComponentStore::new()),
            connections: Arc::new(MemoryConnectionStore::new()),
            notifier: Arc::new(MockTopologyNotifier::new()),
        }
    }

    pub fn registry(&self) -> Registry {
        Registry::new(self.components.clone())
    }

    pub fn lifecycle(&self, page_size: usize) -> LifecycleManager {
        LifecycleManager::new(
            self.components.clone(),
            self.connections.clone(),
            self.notifier.clone(),
            page_size,
        )
    }

    /// Store `component` as-is and hand it back.
    pub async fn add(&self, component: Component) -> Component {
        self.components
            .insert(&component)
            .await
            .expect("insert component");
        component
    }
}
