//! Handler dispatch with bounded redelivery.

use backon::{BackoffBuilder, ExponentialBuilder};
use tracing::{error, warn};

use super::{Delivery, MessageHandler, Outcome};
use crate::config::RetryConfig;

/// Run `handler` on `delivery`, redelivering `Retry` outcomes with
/// exponential backoff.
///
/// Returns the final outcome. A `Retry` result means the attempts ran out
/// and the message goes back to the transport for later redelivery.
pub async fn deliver(
    handler: &dyn MessageHandler,
    mut delivery: Delivery,
    retry: &RetryConfig,
) -> Outcome {
    let mut backoff = ExponentialBuilder::default()
        .with_min_delay(retry.min_delay())
        .with_max_delay(retry.max_delay())
        .with_max_times(retry.max_attempts)
        .with_jitter()
        .build();

    loop {
        match handler.handle(delivery.clone()).await {
            Outcome::Retry(reason) => match backoff.next() {
                Some(delay) => {
                    warn!(
                        queue = %delivery.queue,
                        attempt = delivery.attempt,
                        backoff_ms = %delay.as_millis(),
                        reason = %reason,
                        "Handler asked for redelivery"
                    );
                    tokio::time::sleep(delay).await;
                    delivery.attempt += 1;
                }
                None => {
                    error!(
                        queue = %delivery.queue,
                        attempts = delivery.attempt + 1,
                        reason = %reason,
                        "Redelivery attempts exhausted, returning message to transport"
                    );
                    return Outcome::Retry(reason);
                }
            },
            Outcome::Nack(reason) => {
                warn!(queue = %delivery.queue, reason = %reason, "Message rejected");
                return Outcome::Nack(reason);
            }
            Outcome::Ack => return Outcome::Ack,
        }
    }
}
