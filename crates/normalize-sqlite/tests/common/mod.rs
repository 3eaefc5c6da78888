#![allow(dead_code)]

use normalize_core::Row;
use normalize_sqlite::Database;
use sqlx::sqlite::SqlitePoolOptions;

/// Fresh in-memory database on a single-connection pool.
pub async fn fresh_db() -> Database {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");
    Database::new(pool)
}

/// The 1000-row tree fixture: species cycles through four values.
pub fn tree_rows() -> Vec<Row> {
    let species = ["Palm", "Spruce", "Mangrove", "Oak"];
    (1..=1000_i64)
        .map(|i| {
            Row::new()
                .col("id", i)
                .col("name", format!("Tree {i}"))
                .col("species", species[(i as usize - 1) % 4])
                .col("end", 1_i64)
        })
        .collect()
}

/// Tree fixture with common and latin name columns cycling in step.
pub fn binomial_tree_rows() -> Vec<Row> {
    let common = ["Palm", "Spruce", "Mangrove", "Oak"];
    let latin = ["Arecaceae", "Picea", "Rhizophora", "Quercus"];
    (1..=1000_i64)
        .map(|i| {
            Row::new()
                .col("id", i)
                .col("name", format!("Tree {i}"))
                .col("common_name", common[(i as usize - 1) % 4])
                .col("latin_name", latin[(i as usize - 1) % 4])
        })
        .collect()
}
