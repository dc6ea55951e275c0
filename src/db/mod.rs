//! Database layer for bulk-harvest
//!
//! SQLite persistence for the state document. The engine only needs whole
//! JSON values stored under a key, so the schema is a single key/value table
//! behind a versioned migration runner.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by concern:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`state`] - Key/value reads and writes, [`crate::store::StateStore`] impl

use sqlx::sqlite::SqlitePool;

mod migrations;
mod state;

/// Database handle for bulk-harvest
pub struct Database {
    pool: SqlitePool,
}
