//! Topology change notifications.
//!
//! The broker-binding service learns which connections to bind, pause or
//! unbind from `TopologyChange` intents. Delivery is best effort: a failed
//! notification is logged by the caller and never undoes the state change
//! that produced it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::bus::{self, BusError, MessageBus};
use crate::model::{ConnectionId, TopologyAction};

/// Intent for the broker-binding service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyChange {
    pub action: TopologyAction,
    pub connection_id: ConnectionId,
}

impl TopologyChange {
    pub fn new(action: TopologyAction, connection_id: ConnectionId) -> Self {
        Self {
            action,
            connection_id,
        }
    }
}

/// Errors raised while delivering an intent.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(#[from] BusError),
}

/// Sink for topology intents.
#[async_trait]
pub trait TopologyNotifier: Send + Sync {
    async fn notify(&self, change: TopologyChange) -> Result<(), NotifyError>;
}

/// Publishes intents as JSON on a bus queue.
pub struct BusTopologyNotifier {
    bus: Arc<dyn MessageBus>,
    queue: String,
}

impl BusTopologyNotifier {
    pub fn new(bus: Arc<dyn MessageBus>, queue: impl Into<String>) -> Self {
        Self {
            bus,
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl TopologyNotifier for BusTopologyNotifier {
    async fn notify(&self, change: TopologyChange) -> Result<(), NotifyError> {
        bus::publish_json(self.bus.as_ref(), &self.queue, &change).await?;
        debug!(
            action = %change.action,
            connection_id = %change.connection_id,
            queue = %self.queue,
            "Published topology change"
        );
        Ok(())
    }
}

/// Records intents in memory for tests.
#[derive(Default)]
pub struct MockTopologyNotifier {
    changes: RwLock<Vec<TopologyChange>>,
    fail_on_notify: RwLock<bool>,
}

impl MockTopologyNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_notify(&self, fail: bool) {
        *self.fail_on_notify.write().await = fail;
    }

    pub async fn changes(&self) -> Vec<TopologyChange> {
        self.changes.read().await.clone()
    }

    /// Recorded intents with the given action.
    pub async fn with_action(&self, action: TopologyAction) -> Vec<TopologyChange> {
        self.changes
            .read()
            .await
            .iter()
            .filter(|c| c.action == action)
            .cloned()
            .collect()
    }

    pub async fn clear(&self) {
        self.changes.write().await.clear();
    }
}

#[async_trait]
impl TopologyNotifier for MockTopologyNotifier {
    async fn notify(&self, change: TopologyChange) -> Result<(), NotifyError> {
        if *self.fail_on_notify.read().await {
            return Err(NotifyError::Delivery(BusError::Publish(
                "Mock notify failure".to_string(),
            )));
        }
        self.changes.write().await.push(change);
        Ok(())
    }
}
