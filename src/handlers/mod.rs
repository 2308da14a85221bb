//! Queue handlers.
//!
//! One handler per inbound queue. Each decodes its JSON message, calls the
//! control plane and maps the result to an [`Outcome`]:
//! - malformed or invalid requests are nacked
//! - requests naming unknown records are nacked
//! - storage failures are retried

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{error, warn};

use crate::bus::{self, Delivery, MessageBus, Outcome};
use crate::config::QueuesConfig;
use crate::control::{ControlError, ControlPlane, ErrorKind};

mod component;
mod topology;

pub use component::{
    ComponentsPage, QueryComponents, QueryComponentsHandler, RegisterHandler, UnregisterComponent,
    UnregisterHandler,
};
pub use topology::{ChangeTopologyHandler, CreateConnectionHandler};


/// Decode a JSON body, nacking it when it does not parse.
fn decode<T: DeserializeOwned>(delivery: &Delivery) -> Result<T, Outcome> {
    serde_json::from_slice(&delivery.body).map_err(|e| {
        warn!(
            queue = %delivery.queue,
            error = %e,
            payload = %String::from_utf8_lossy(&delivery.body),
            "Malformed message"
        );
        Outcome::Nack(format!("malformed message: {}", e))
    })
}

/// Map a control plane failure to the fate of its delivery.
fn outcome_for(delivery: &Delivery, e: &ControlError) -> Outcome {
    let payload = String::from_utf8_lossy(&delivery.body);
    match e.kind() {
        ErrorKind::Invalid => {
            warn!(queue = %delivery.queue, error = %e, payload = %payload, "Request rejected");
            Outcome::Nack(e.to_string())
        }
        ErrorKind::NotFound => {
            warn!(queue = %delivery.queue, error = %e, payload = %payload, "Request target not found");
            Outcome::Nack(e.to_string())
        }
        ErrorKind::Transient => {
            error!(queue = %delivery.queue, error = %e, payload = %payload, "Request failed");
            Outcome::Retry(e.to_string())
        }
    }
}

/// Subscribe a handler for every inbound queue.
pub async fn register_all(
    bus: Arc<dyn MessageBus>,
    control: Arc<ControlPlane>,
    queues: &QueuesConfig,
) -> bus::Result<()> {
    bus.subscribe(
        &queues.register_component,
        Arc::new(RegisterHandler::new(control.clone())),
    )
    .await?;
    bus.subscribe(
        &queues.unregister_component,
        Arc::new(UnregisterHandler::new(control.clone())),
    )
    .await?;
    bus.subscribe(
        &queues.query_components,
        Arc::new(QueryComponentsHandler::new(
            control.clone(),
            bus.clone(),
            queues.components_page.clone(),
        )),
    )
    .await?;
    bus.subscribe(
        &queues.create_connection,
        Arc::new(CreateConnectionHandler::new(control.clone())),
    )
    .await?;
    bus.subscribe(
        &queues.change_topology,
        Arc::new(ChangeTopologyHandler::new(control)),
    )
    .await?;
    Ok(())
}
