//! # Database Error Types
//!
//! Error types for database operations and the ledger services.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)          CoreError (kiln-core)             │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  run_in_transaction() rolls back on ANY Err                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Request layer renders code() + structured fields                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use kiln_core::{CoreError, Shortage, ValidationError};
use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Batch or movement for a non-existent item
    /// - Recipe component pointing at a missing item
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// An append-only guard trigger refused an UPDATE or DELETE.
    #[error("Immutable record: {0}")]
    Immutable(String),

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Run meta or journal payload could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A business rule refused the operation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Canonical shortage list when this is an insufficient-stock outcome.
    pub fn shortages(&self) -> Option<&[Shortage]> {
        match self {
            DbError::Core(core) => core.shortages(),
            _ => None,
        }
    }

    /// The business error, if this is one.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            DbError::Core(core) => Some(core),
            _ => None,
        }
    }

    /// Stable snake_case code for the boundary layer.
    pub fn code(&self) -> &'static str {
        match self {
            DbError::Core(core) => core.code(),
            DbError::NotFound { .. } => "not_found",
            DbError::UniqueViolation { .. } => "unique_violation",
            DbError::ForeignKeyViolation { .. } => "foreign_key_violation",
            DbError::Immutable(_) => "immutable",
            DbError::PoolExhausted => "pool_exhausted",
            _ => "internal",
        }
    }
}

impl From<ValidationError> for DbError {
    fn from(err: ValidationError) -> Self {
        DbError::Core(CoreError::Validation(err))
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint/trigger type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>"
                // FK constraint: "FOREIGN KEY constraint failed"
                // Guard triggers: "... is append-only" / "... immutable ..."
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else if msg.contains("append-only") || msg.contains("immutable") {
                    DbError::Immutable(msg.to_string())
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortages_pass_through() {
        let err: DbError = CoreError::InsufficientStock {
            shortages: vec![Shortage::new(1, 6000, 4000)],
            run_id: Some(3),
        }
        .into();

        assert_eq!(err.code(), "insufficient_stock");
        assert_eq!(err.shortages().map(|s| s.len()), Some(1));
        assert!(DbError::PoolExhausted.shortages().is_none());
    }

    #[test]
    fn test_validation_converts_through_core() {
        let err: DbError = ValidationError::required("name").into();
        assert!(matches!(err, DbError::Core(CoreError::Validation(_))));
        assert_eq!(err.code(), "required");
    }
}
