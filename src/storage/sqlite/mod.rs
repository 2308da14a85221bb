//! SQLite implementations of the registry and topology stores.

mod component_store;
mod connection_store;

pub use component_store::SqliteComponentStore;
pub use connection_store::SqliteConnectionStore;
