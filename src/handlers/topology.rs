//! Topology queues: manual creation and state changes.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, Instrument};

use super::{decode, outcome_for};
use crate::bus::{Delivery, MessageHandler, Outcome};
use crate::control::ControlPlane;
use crate::lifecycle::CreateConnection;
use crate::notifier::TopologyChange;

pub struct CreateConnectionHandler {
    control: Arc<ControlPlane>,
}

impl CreateConnectionHandler {
    pub fn new(control: Arc<ControlPlane>) -> Self {
        Self { control }
    }
}

impl MessageHandler for CreateConnectionHandler {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, Outcome> {
        let control = self.control.clone();
        let span = tracing::info_span!("topology.create", attempt = delivery.attempt);
        Box::pin(
            async move {
                let request: CreateConnection = match decode(&delivery) {
                    Ok(request) => request,
                    Err(outcome) => return outcome,
                };
                match control.create_connection(request).await {
                    Ok(connection) => {
                        info!(connection_id = %connection.id, "Connection request handled");
                        Outcome::Ack
                    }
                    Err(e) => outcome_for(&delivery, &e),
                }
            }
            .instrument(span),
        )
    }
}

/// Applies ENABLE, DISABLE or REMOVE requests.
pub struct ChangeTopologyHandler {
    control: Arc<ControlPlane>,
}

impl ChangeTopologyHandler {
    pub fn new(control: Arc<ControlPlane>) -> Self {
        Self { control }
    }
}

impl MessageHandler for ChangeTopologyHandler {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, Outcome> {
        let control = self.control.clone();
        let span = tracing::info_span!("topology.modify", attempt = delivery.attempt);
        Box::pin(
            async move {
                let request: TopologyChange = match decode(&delivery) {
                    Ok(request) => request,
                    Err(outcome) => return outcome,
                };
                match control
                    .change_topology(&request.connection_id, request.action)
                    .await
                {
                    Ok(_) => Outcome::Ack,
                    Err(e) => outcome_for(&delivery, &e),
                }
            }
            .instrument(span),
        )
    }
}
