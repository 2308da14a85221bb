//! Shared storage integration tests.
//!
//! Tests the ComponentStore and ConnectionStore interfaces against all
//! implementations. Each implementation module imports these test functions
//! and runs them.

pub mod component_store_tests;
pub mod connection_store_tests;
