//! AMQP (RabbitMQ) message bus implementation.
//!
//! Every control-plane queue is a durable queue on the default exchange,
//! addressed by its name.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use deadpool_lapin::{Manager, Pool, PoolError};
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, Instrument};

use super::{dispatch, BusError, Delivery, MessageBus, MessageHandler, Outcome, Result};
use crate::config::{AmqpConfig, RetryConfig};

/// The default exchange routes by queue name.
const DEFAULT_EXCHANGE: &str = "";

/// Publish attempts after the first one.
const PUBLISH_RETRIES: usize = 5;

/// AMQP message bus using RabbitMQ.
pub struct AmqpMessageBus {
    pool: Pool,
    config: AmqpConfig,
    retry: RetryConfig,
    declared: RwLock<HashSet<String>>,
    pending: Mutex<Vec<(String, Arc<dyn MessageHandler>)>>,
    consuming: RwLock<bool>,
}

impl AmqpMessageBus {
    /// Connect to the broker and verify the connection.
    pub async fn new(config: AmqpConfig, retry: RetryConfig) -> Result<Self> {
        let manager = Manager::new(config.url.clone(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| BusError::Connection(format!("Failed to create pool: {}", e)))?;

        let conn = pool
            .get()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to connect: {}", e)))?;
        drop(conn);

        info!(url = %config.url, "Connected to AMQP");

        Ok(Self {
            pool,
            config,
            retry,
            declared: RwLock::new(HashSet::new()),
            pending: Mutex::new(Vec::new()),
            consuming: RwLock::new(false),
        })
    }

    /// Get a channel from the pool.
    async fn get_channel(pool: &Pool) -> Result<Channel> {
        let conn = pool.get().await.map_err(|e: PoolError| {
            BusError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))
    }

    async fn declare_queue(channel: &Channel, queue: &str) -> Result<()> {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to declare queue: {}", e)))?;
        Ok(())
    }

    async fn publish_once(&self, queue: &str, body: &[u8]) -> Result<()> {
        let channel = Self::get_channel(&self.pool).await?;

        if !self.declared.read().await.contains(queue) {
            Self::declare_queue(&channel, queue).await?;
            self.declared.write().await.insert(queue.to_string());
        }

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2); // persistent

        let confirm = channel
            .basic_publish(
                DEFAULT_EXCHANGE,
                queue,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(|e| BusError::Publish(format!("Failed to publish: {}", e)))?;

        confirm
            .await
            .map_err(|e| BusError::Publish(format!("Publish confirmation failed: {}", e)))?;
        Ok(())
    }

    fn spawn_consumer(&self, queue: String, handler: Arc<dyn MessageHandler>) {
        let pool = self.pool.clone();
        let retry = self.retry.clone();
        let prefetch = self.config.prefetch;

        tokio::spawn(async move {
            Self::consume_with_reconnect(pool, queue, handler, retry, prefetch).await;
        });
    }

    /// Consumer loop with automatic reconnection and exponential backoff with jitter.
    async fn consume_with_reconnect(
        pool: Pool,
        queue: String,
        handler: Arc<dyn MessageHandler>,
        retry: RetryConfig,
        prefetch: u16,
    ) {
        use futures::StreamExt;

        let backoff_builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(30))
            .with_jitter();
        let mut backoff_iter = backoff_builder.build();

        loop {
            match Self::setup_consumer(&pool, &queue, prefetch).await {
                Ok(mut consumer) => {
                    info!(queue = %queue, "Consumer connected, processing messages");
                    backoff_iter = backoff_builder.build();

                    while let Some(delivery) = consumer.next().await {
                        match delivery {
                            Ok(delivery) => {
                                Self::process_delivery(&queue, delivery, handler.as_ref(), &retry)
                                    .await;
                            }
                            Err(e) => {
                                error!(error = %e, "Consumer delivery error, will reconnect");
                                break;
                            }
                        }
                    }

                    info!(queue = %queue, "Consumer stream ended, reconnecting...");
                }
                Err(e) => {
                    let delay = backoff_iter.next().unwrap_or(Duration::from_secs(30));
                    error!(
                        error = %e,
                        backoff_ms = %delay.as_millis(),
                        queue = %queue,
                        "Failed to set up consumer, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            let delay = backoff_iter.next().unwrap_or(Duration::from_secs(30));
            tokio::time::sleep(delay).await;
        }
    }

    async fn setup_consumer(pool: &Pool, queue: &str, prefetch: u16) -> Result<lapin::Consumer> {
        let channel = Self::get_channel(pool).await?;
        Self::declare_queue(&channel, queue).await?;

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to set prefetch: {}", e)))?;

        channel
            .basic_consume(
                queue,
                "mov-consumer",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to start consumer: {}", e)))
    }

    async fn process_delivery(
        queue: &str,
        delivery: lapin::message::Delivery,
        handler: &dyn MessageHandler,
        retry: &RetryConfig,
    ) {
        debug!(queue = %queue, "Received message");

        let span = tracing::info_span!("bus.consume", queue = %queue);
        let message = Delivery::new(queue, delivery.data.clone());
        let outcome = dispatch::deliver(handler, message, retry)
            .instrument(span)
            .await;

        let settled = match outcome {
            Outcome::Ack => delivery.ack(BasicAckOptions::default()).await,
            Outcome::Nack(_) => {
                delivery
                    .reject(BasicRejectOptions { requeue: false })
                    .await
            }
            // Out of in-process attempts: the broker redelivers it.
            Outcome::Retry(_) => {
                delivery
                    .reject(BasicRejectOptions { requeue: true })
                    .await
            }
        };
        if let Err(e) = settled {
            error!(queue = %queue, error = %e, "Failed to settle message");
        }
    }
}

#[async_trait]
impl MessageBus for AmqpMessageBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(queue = %queue))]
    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<()> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(5))
            .with_max_times(PUBLISH_RETRIES)
            .with_jitter()
            .build();

        let mut last_error = None;

        for (attempt, delay) in std::iter::once(Duration::ZERO).chain(backoff).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }

            match self.publish_once(queue, &body).await {
                Ok(()) => {
                    debug!("Published message");
                    return Ok(());
                }
                Err(e) => {
                    error!(
                        attempt = attempt + 1,
                        max_retries = PUBLISH_RETRIES,
                        error = %e,
                        "Publish failed, retrying..."
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BusError::Publish("Publish failed".to_string())))
    }

    async fn subscribe(&self, queue: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        if *self.consuming.read().await {
            self.spawn_consumer(queue.to_string(), handler);
        } else {
            self.pending.lock().await.push((queue.to_string(), handler));
        }
        info!(queue = %queue, "Handler subscribed to AMQP bus");
        Ok(())
    }

    async fn start_consuming(&self) -> Result<()> {
        {
            let mut consuming = self.consuming.write().await;
            if *consuming {
                return Ok(());
            }
            *consuming = true;
        }

        let pending = std::mem::take(&mut *self.pending.lock().await);
        for (queue, handler) in pending {
            self.spawn_consumer(queue, handler);
        }
        Ok(())
    }
}
