//! Mock message bus implementation for testing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BusError, Delivery, MessageBus, MessageHandler, Outcome, Result};

/// Mock message bus for testing.
///
/// Publishes are recorded. Handlers registered with `subscribe` can be
/// driven directly with [`MockMessageBus::deliver`].
#[derive(Default)]
pub struct MockMessageBus {
    published: RwLock<Vec<(String, Vec<u8>)>>,
    handlers: RwLock<HashMap<String, Vec<Arc<dyn MessageHandler>>>>,
    fail_on_publish: RwLock<bool>,
}

impl MockMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    /// JSON bodies published to `queue`, in publish order.
    pub async fn published_json(&self, queue: &str) -> Vec<serde_json::Value> {
        self.published
            .read()
            .await
            .iter()
            .filter(|(q, _)| q == queue)
            .filter_map(|(_, body)| serde_json::from_slice(body).ok())
            .collect()
    }

    pub async fn take_published(&self) -> Vec<(String, Vec<u8>)> {
        std::mem::take(&mut *self.published.write().await)
    }

    /// Hand `body` to every handler subscribed to `queue`, once each.
    pub async fn deliver(&self, queue: &str, body: Vec<u8>) -> Vec<Outcome> {
        let handlers = self
            .handlers
            .read()
            .await
            .get(queue)
            .cloned()
            .unwrap_or_default();
        let delivery = Delivery::new(queue, body);

        let mut outcomes = Vec::with_capacity(handlers.len());
        for handler in handlers {
            outcomes.push(handler.handle(delivery.clone()).await);
        }
        outcomes
    }
}

#[async_trait]
impl MessageBus for MockMessageBus {
    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<()> {
        if *self.fail_on_publish.read().await {
            return Err(BusError::Connection("Mock publish failure".to_string()));
        }
        self.published.write().await.push((queue.to_string(), body));
        Ok(())
    }

    async fn subscribe(&self, queue: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        self.handlers
            .write()
            .await
            .entry(queue.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    async fn start_consuming(&self) -> Result<()> {
        Ok(())
    }
}
