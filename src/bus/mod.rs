//! Message bus for the control plane's queues.
//!
//! This module contains:
//! - `MessageBus` trait: publish to and consume from named queues
//! - `MessageHandler` trait: processes one delivery and decides its fate
//! - Implementations: in-process channels, AMQP (RabbitMQ), Mock

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::info;

use crate::config::{MessagingConfig, MessagingType};

pub mod dispatch;
pub mod mock;

#[cfg(feature = "amqp")]
pub mod amqp;
#[cfg(feature = "channel")]
pub mod channel;

#[cfg(feature = "amqp")]
pub use amqp::AmqpMessageBus;
#[cfg(feature = "channel")]
pub use channel::ChannelMessageBus;
pub use mock::MockMessageBus;

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A message taken off a queue.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue: String,
    pub body: Arc<[u8]>,
    /// Zero for the first delivery, incremented on each redelivery.
    pub attempt: usize,
}

impl Delivery {
    pub fn new(queue: impl Into<String>, body: impl Into<Arc<[u8]>>) -> Self {
        Self {
            queue: queue.into(),
            body: body.into(),
            attempt: 0,
        }
    }
}

/// What the bus should do with a delivery once its handler finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Processed; remove it.
    Ack,
    /// Rejected; remove it without redelivery.
    Nack(String),
    /// Failed transiently; redeliver later.
    Retry(String),
}

/// Handler for messages consumed from a queue.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, Outcome>;
}

/// Interface for queue-based messaging.
///
/// Implementations:
/// - `ChannelMessageBus`: tokio broadcast channels within one process
/// - `AmqpMessageBus`: RabbitMQ via AMQP
/// - `MockMessageBus`: records publishes for tests
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a raw body to `queue`.
    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<()>;

    /// Register `handler` for every message arriving on `queue`.
    async fn subscribe(&self, queue: &str, handler: Arc<dyn MessageHandler>) -> Result<()>;

    /// Start delivering to the registered handlers.
    async fn start_consuming(&self) -> Result<()>;
}

/// Serialize `value` as JSON and publish it to `queue`.
pub async fn publish_json<T: Serialize + ?Sized>(
    bus: &dyn MessageBus,
    queue: &str,
    value: &T,
) -> Result<()> {
    let body = serde_json::to_vec(value)?;
    bus.publish(queue, body).await
}

/// Initialize the message bus based on configuration.
pub async fn init_bus(
    config: &MessagingConfig,
) -> std::result::Result<Arc<dyn MessageBus>, Box<dyn std::error::Error>> {
    match config.messaging_type {
        #[cfg(feature = "channel")]
        MessagingType::Channel => {
            info!("Messaging: in-process channels");
            Ok(Arc::new(ChannelMessageBus::new(config.retry.clone())))
        }
        #[cfg(not(feature = "channel"))]
        MessagingType::Channel => {
            tracing::error!("Channel messaging requested but 'channel' feature is not enabled");
            Err("Channel feature not enabled".into())
        }
        #[cfg(feature = "amqp")]
        MessagingType::Amqp => {
            info!("Messaging: amqp");
            let bus = AmqpMessageBus::new(config.amqp.clone(), config.retry.clone()).await?;
            Ok(Arc::new(bus))
        }
        #[cfg(not(feature = "amqp"))]
        MessagingType::Amqp => {
            tracing::error!("AMQP messaging requested but 'amqp' feature is not enabled");
            Err("AMQP feature not enabled".into())
        }
    }
}
