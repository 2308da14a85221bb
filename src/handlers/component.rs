//! Registry queues: register, unregister and query.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn, Instrument};

use super::{decode, outcome_for};
use crate::bus::{self, Delivery, MessageBus, MessageHandler, Outcome};
use crate::control::ControlPlane;
use crate::model::{Component, ComponentId, ComponentType};
use crate::registry::RegisterComponent;
use crate::storage::{query::DEFAULT_LIMIT, ComponentOrder, ComponentQuery, TextPattern};

pub struct RegisterHandler {
    control: Arc<ControlPlane>,
}

impl RegisterHandler {
    pub fn new(control: Arc<ControlPlane>) -> Self {
        Self { control }
    }
}

impl MessageHandler for RegisterHandler {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, Outcome> {
        let control = self.control.clone();
        let span = tracing::info_span!("component.register", attempt = delivery.attempt);
        Box::pin(
            async move {
                let request: RegisterComponent = match decode(&delivery) {
                    Ok(request) => request,
                    Err(outcome) => return outcome,
                };
                match control.register(request).await {
                    Ok(component) => {
                        info!(
                            component_id = %component.id,
                            name = %component.name,
                            "Component registered"
                        );
                        Outcome::Ack
                    }
                    Err(e) => outcome_for(&delivery, &e),
                }
            }
            .instrument(span),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterComponent {
    pub component_id: ComponentId,
}

pub struct UnregisterHandler {
    control: Arc<ControlPlane>,
}

impl UnregisterHandler {
    pub fn new(control: Arc<ControlPlane>) -> Self {
        Self { control }
    }
}

impl MessageHandler for UnregisterHandler {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, Outcome> {
        let control = self.control.clone();
        let span = tracing::info_span!("component.unregister", attempt = delivery.attempt);
        Box::pin(
            async move {
                let request: UnregisterComponent = match decode(&delivery) {
                    Ok(request) => request,
                    Err(outcome) => return outcome,
                };
                match control.unregister(&request.component_id).await {
                    Ok(_) => Outcome::Ack,
                    Err(e) => outcome_for(&delivery, &e),
                }
            }
            .instrument(span),
        )
    }
}

/// Registry query as it arrives on the wire.
///
/// `pattern` is a substring, or a regex when wrapped in slashes. `order`
/// is a comma-separated list of fields, each optionally prefixed with `-`
/// for descending order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryComponents {
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default, rename = "type")]
    pub component_type: Option<ComponentType>,
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
    pub query_id: String,
}

impl QueryComponents {
    pub fn to_query(&self) -> Result<ComponentQuery, String> {
        let pattern = self
            .pattern
            .as_deref()
            .map(TextPattern::parse)
            .transpose()
            .map_err(|e| format!("invalid pattern: {}", e))?;
        let order = match self.order.as_deref() {
            Some(order) => ComponentOrder::parse(order)?,
            None => ComponentOrder::default(),
        };
        Ok(ComponentQuery {
            pattern,
            component_type: self.component_type,
            order,
            offset: self.offset.unwrap_or(0),
            limit: self.limit.unwrap_or(DEFAULT_LIMIT),
        })
    }
}

/// Answer to a [`QueryComponents`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentsPage {
    pub query_id: String,
    pub total: u64,
    pub components: Vec<Component>,
}

pub struct QueryComponentsHandler {
    control: Arc<ControlPlane>,
    bus: Arc<dyn MessageBus>,
    reply_queue: String,
}

impl QueryComponentsHandler {
    pub fn new(control: Arc<ControlPlane>, bus: Arc<dyn MessageBus>, reply_queue: String) -> Self {
        Self {
            control,
            bus,
            reply_queue,
        }
    }
}

impl MessageHandler for QueryComponentsHandler {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, Outcome> {
        let control = self.control.clone();
        let bus = self.bus.clone();
        let reply_queue = self.reply_queue.clone();
        let span = tracing::info_span!("component.query", attempt = delivery.attempt);
        Box::pin(
            async move {
                let request: QueryComponents = match decode(&delivery) {
                    Ok(request) => request,
                    Err(outcome) => return outcome,
                };
                let query = match request.to_query() {
                    Ok(query) => query,
                    Err(reason) => {
                        warn!(query_id = %request.query_id, reason = %reason, "Invalid query");
                        return Outcome::Nack(reason);
                    }
                };
                let page = match control.query_components(&query).await {
                    Ok(page) => page,
                    Err(e) => return outcome_for(&delivery, &e),
                };

                let reply = ComponentsPage {
                    query_id: request.query_id,
                    total: page.total,
                    components: page.components,
                };
                match bus::publish_json(bus.as_ref(), &reply_queue, &reply).await {
                    Ok(()) => Outcome::Ack,
                    Err(e) => {
                        error!(queue = %reply_queue, error = %e, "Failed to publish page");
                        Outcome::Retry(e.to_string())
                    }
                }
            }
            .instrument(span),
        )
    }
}
