//! Error types for the normalization engine.

use normalize_core::PlanError;

/// Errors surfaced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// A requested column set is invalid: unknown columns, duplicate or
    /// empty requests, rename collisions, or an existing lookup table
    /// whose schema is incompatible with the request.
    #[error("invalid columns: {0}")]
    InvalidColumns(String),

    /// A table the caller asserted to exist does not.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// A decoded payload does not match the expansion strategy chosen
    /// from the first row.
    #[error("shape mismatch in column [{column}]: expected {expected}, found {found}")]
    ShapeMismatch {
        /// Column being expanded.
        column: String,
        /// Shape implied by the first decoded payload.
        expected: &'static str,
        /// Shape actually found.
        found: &'static str,
    },

    /// A payload failed to decode.
    #[error("payload decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Database error, propagated verbatim.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<PlanError> for NormalizeError {
    fn from(err: PlanError) -> Self {
        Self::InvalidColumns(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, NormalizeError>;
