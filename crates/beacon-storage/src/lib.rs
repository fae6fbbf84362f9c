//! Beacon Storage crate - SQLite persistence for attributes and events.
//!
//! Provides a WAL-mode SQLite database with migrations and durable
//! implementations of the `AttributeStore` and `EventStore` contracts
//! defined in `beacon-core`.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{SqliteAttributeStore, SqliteEventStore};
