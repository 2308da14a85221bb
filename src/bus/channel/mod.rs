//! In-memory channel-based message bus for standalone mode.
//!
//! Uses one tokio broadcast channel per queue. Each subscribed handler gets
//! its own consumer task, so a queue is processed in order while different
//! queues run concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::{dispatch, Delivery, MessageBus, MessageHandler, Outcome, Result};
use crate::config::RetryConfig;

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 1024;

type Subscription = (String, broadcast::Receiver<Delivery>, Arc<dyn MessageHandler>);

/// In-process message bus using tokio broadcast channels.
pub struct ChannelMessageBus {
    senders: RwLock<HashMap<String, broadcast::Sender<Delivery>>>,
    /// Subscriptions made before `start_consuming`.
    pending: Mutex<Vec<Subscription>>,
    consuming: RwLock<bool>,
    retry: RetryConfig,
}

impl ChannelMessageBus {
    pub fn new(retry: RetryConfig) -> Self {
        info!("Channel message bus initialized");
        Self {
            senders: RwLock::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            consuming: RwLock::new(false),
            retry,
        }
    }

    async fn sender(&self, queue: &str) -> broadcast::Sender<Delivery> {
        if let Some(sender) = self.senders.read().await.get(queue) {
            return sender.clone();
        }
        self.senders
            .write()
            .await
            .entry(queue.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Deliver until the handler settles the message. A message whose
    /// redelivery attempts ran out stays at the head of its queue and is
    /// tried again after `max_delay`, as a broker requeue would.
    async fn consume(handler: &dyn MessageHandler, mut delivery: Delivery, retry: &RetryConfig) {
        loop {
            match dispatch::deliver(handler, delivery.clone(), retry).await {
                Outcome::Retry(_) => {
                    warn!(queue = %delivery.queue, "Requeueing message");
                    delivery.attempt += retry.max_attempts + 1;
                    tokio::time::sleep(retry.max_delay()).await;
                }
                Outcome::Ack | Outcome::Nack(_) => return,
            }
        }
    }

    fn spawn_consumer(&self, subscription: Subscription) {
        let (queue, mut receiver, handler) = subscription;
        let retry = self.retry.clone();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(delivery) => {
                        debug!(queue = %queue, "Received message via channel");
                        Self::consume(handler.as_ref(), delivery, &retry).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        error!(queue = %queue, skipped = n, "Channel consumer lagged, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(queue = %queue, "Channel closed, stopping consumer");
                        break;
                    }
                }
            }
        });
    }
}

impl Default for ChannelMessageBus {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[async_trait]
impl MessageBus for ChannelMessageBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(queue = %queue))]
    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<()> {
        let sender = self.sender(queue).await;
        match sender.send(Delivery::new(queue, body)) {
            Ok(receivers) => debug!(receivers, "Published message to channel"),
            // No subscribers; the message is dropped as on an unbound exchange.
            Err(_) => debug!("Published message (no receivers)"),
        }
        Ok(())
    }

    async fn subscribe(&self, queue: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let receiver = self.sender(queue).await.subscribe();
        let subscription = (queue.to_string(), receiver, handler);

        if *self.consuming.read().await {
            self.spawn_consumer(subscription);
        } else {
            self.pending.lock().await.push(subscription);
        }
        info!(queue = %queue, "Handler subscribed to channel bus");
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
        let count = pending.len();
        for subscription in pending {
            self.spawn_consumer(subscription);
        }
        info!(consumers = count, "Channel consumers started");
        Ok(())
    }
}
