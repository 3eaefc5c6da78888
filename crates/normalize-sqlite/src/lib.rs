//! # normalize-sqlite
//!
//! A relational normalization engine for embedded SQLite.
//!
//! Given a denormalized table whose rows repeat values in one or more
//! columns, [`Table::extract`] lifts those columns into a deduplicated
//! lookup table and rewrites the source to reference it by foreign
//! key. [`Table::extract_expand`] takes a column of structured
//! payloads and normalizes it into related tables: an object becomes a
//! 1:N reference, a scalar array becomes N:1 child rows, and an object
//! array becomes an M:N relationship through a junction table.
//!
//! # Architecture
//!
//! - **Database / Table** - handles over a caller-provided
//!   [`sqlx::SqlitePool`], with schema and row access plus inserts
//! - **Introspection** - committed schema state via `sqlite_master`
//!   and the pragma table functions
//! - **Extract engine** - plan, lookup reconciliation, dedup,
//!   source rewrite
//! - **Expand engine** - payload classification and the three
//!   expansion strategies
//! - **Rewriter** - the create/copy/drop/rename sequence used where
//!   SQLite's `ALTER TABLE` falls short
//!
//! Every mutating operation runs inside one engine-opened transaction
//! and either commits completely or leaves the database untouched.
//!
//! # Example
//!
//! ```rust,ignore
//! use normalize_sqlite::prelude::*;
//!
//! let db = Database::new(pool);
//! let trees = db.table("tree");
//! trees.extract(&["species"], ExtractOptions::new()).await?;
//! // tree.species is now tree.species_id -> species(id)
//! ```

pub mod database;
pub mod error;
pub mod expand;
pub mod extract;
mod introspect;
mod rewrite;

pub use database::{Database, Table};
pub use error::{NormalizeError, Result};
pub use expand::{json_decode, Payload};
pub use extract::ExtractOptions;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::database::{Database, Table};
    pub use crate::error::{NormalizeError, Result};
    pub use crate::expand::{json_decode, Payload};
    pub use crate::extract::ExtractOptions;
    pub use normalize_core::{Column, ForeignKey, Row, SqlType, SqlValue, ToSqlValue};
}
