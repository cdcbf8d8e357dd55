//! Database layer
//!
//! This module provides:
//! - Connection pooling (r2d2-sqlite) with WAL mode and foreign keys
//! - ACID transaction helpers
//! - Ordered, ledgered SQL migrations

pub mod connection;
pub mod migrations;
pub mod transactions;

pub use connection::{Database, initialize_pool};
pub use migrations::{Migration, apply_migrations, migrate_dir, migrate_embedded};
pub use transactions::execute_in_transaction;

/// Pooled SQLite connection type shared by the store and flag source
pub type SqlitePool = r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>;
