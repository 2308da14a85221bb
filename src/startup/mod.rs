//! Startup reconciliation of state left by a previous run.
//!
//! Runs once per process before any message is consumed. No topology
//! intents are emitted: the broker-binding service is expected to rebuild
//! its bindings from scratch when the control plane restarts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::StartupConfig;
use crate::model;
use crate::storage::{ComponentStore, ConnectionStore, StorageError};

/// Fate of components registered by a previous run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentStartupPolicy {
    #[default]
    Preserve,
    /// Mark every active component finished.
    Finish,
    /// Erase every component.
    Drop,
}

/// Fate of connections created by a previous run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStartupPolicy {
    #[default]
    Preserve,
    /// Keep live connections but stop their flow.
    Disable,
    /// Soft-delete every live connection.
    Delete,
    /// Erase every connection.
    Drop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub components_changed: u64,
    pub connections_changed: u64,
}

pub struct StartupReconciler {
    components: Arc<dyn ComponentStore>,
    connections: Arc<dyn ConnectionStore>,
    config: StartupConfig,
    done: AtomicBool,
}

impl StartupReconciler {
    pub fn new(
        components: Arc<dyn ComponentStore>,
        connections: Arc<dyn ConnectionStore>,
        config: StartupConfig,
    ) -> Self {
        Self {
            components,
            connections,
            config,
            done: AtomicBool::new(false),
        }
    }

    /// Apply the configured policies.
    ///
    /// Returns `None` when reconciliation already ran in this process. A
    /// failed run may be retried.
    pub async fn run(&self) -> Result<Option<StartupReport>, StorageError> {
        if self.done.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        match reconcile(self.components.as_ref(), self.connections.as_ref(), self.config).await {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                self.done.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

pub async fn reconcile(
    components: &dyn ComponentStore,
    connections: &dyn ConnectionStore,
    config: StartupConfig,
) -> Result<StartupReport, StorageError> {
    let now = model::now();

    let components_changed = match config.components {
        ComponentStartupPolicy::Preserve => 0,
        ComponentStartupPolicy::Finish => components.finish_all(now).await?,
        ComponentStartupPolicy::Drop => components.drop_all().await?,
    };

    let connections_changed = match config.connections {
        ConnectionStartupPolicy::Preserve => 0,
        ConnectionStartupPolicy::Disable => connections.disable_all(now).await?,
        ConnectionStartupPolicy::Delete => connections.soft_delete_all(now).await?,
        ConnectionStartupPolicy::Drop => connections.drop_all().await?,
    };

    info!(
        components = ?config.components,
        connections = ?config.connections,
        components_changed,
        connections_changed,
        "Startup reconciliation complete"
    );

    Ok(StartupReport {
        components_changed,
        connections_changed,
    })
}
