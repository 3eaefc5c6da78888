//! # normalize-core
//!
//! Driver-free data model and SQL text generation for the
//! sqlite-normalize engine.
//!
//! This crate provides:
//! - the SQL value model ([`SqlValue`], [`Row`], [`TupleKey`])
//! - the schema model ([`SqlType`], [`Column`], [`ForeignKey`],
//!   [`TableSpec`])
//! - canonical `CREATE TABLE` rendering ([`ddl`])
//! - the extract planner ([`plan`])
//!
//! The engine crate (`normalize-sqlite`) binds these to a live SQLite
//! database; nothing in here touches a connection.

pub mod ddl;
pub mod plan;
pub mod schema;
pub mod value;

pub use plan::{ExtractPlan, PlanError};
pub use schema::{Column, ForeignKey, SqlType, TableSpec};
pub use value::{Row, SqlValue, ToSqlValue, TupleKey};
