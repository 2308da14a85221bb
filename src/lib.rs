//! Master of VALAWAI (`mov`)
//!
//! Control plane of a VALAWAI deployment. Components announce themselves
//! and their typed channels over the message bus; `mov` keeps the registry,
//! joins compatible channels into connections and tells the broker-binding
//! service which connections to enable, disable or remove.
//!
//! ## Layout
//! - [`payload`]: payload schemas and the compatibility matcher
//! - [`registry`], [`discovery`], [`lifecycle`]: the topology engine
//! - [`behavior`], [`startup`]: policies from configuration
//! - [`control`]: the flows behind each queue
//! - [`bus`], [`handlers`], [`notifier`]: messaging
//! - [`storage`]: memory and SQLite stores

pub mod behavior;
pub mod bus;
pub mod config;
pub mod control;
pub mod discovery;
pub mod handlers;
pub mod lifecycle;
pub mod model;
pub mod notifier;
pub mod payload;
pub mod registry;
pub mod startup;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod test_utils;
