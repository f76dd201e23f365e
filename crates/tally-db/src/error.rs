//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ApiError (tally-api) ← { code, message } for clients                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Contention (`SQLITE_BUSY`, pool timeouts) becomes [`ErrorCode::Busy`];
//! unique-index races and stale state updates become [`ErrorCode::Conflict`].
//! Both are safe to retry.

use tally_core::ErrorCode;
use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - A second active day at a location
    /// - A second non-closed session on a terminal
    /// - Duplicate username / location code / session number
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// CHECK constraint or trigger abort (append-only tables).
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// The row changed underneath a conditional update.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The database or the pool stayed locked past the deadline.
    #[error("Database busy: {0}")]
    Busy(String),

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A JSON column could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates a Conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        DbError::Conflict(message.into())
    }

    /// The client-visible code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            DbError::NotFound { .. } => ErrorCode::NotFound,
            DbError::UniqueViolation { .. } | DbError::Conflict(_) => ErrorCode::Conflict,
            DbError::Busy(_) => ErrorCode::Busy,
            DbError::ForeignKeyViolation { .. } | DbError::ConstraintViolation(_) => {
                ErrorCode::ValidationError
            }
            DbError::ConnectionFailed(_)
            | DbError::MigrationFailed(_)
            | DbError::QueryFailed(_)
            | DbError::Serialization(_)
            | DbError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.code(), ErrorCode::Busy | ErrorCode::Conflict)
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → by SQLite code / message:
///     SQLITE_BUSY (5), SQLITE_LOCKED (6)   → Busy
///     "UNIQUE constraint failed"           → UniqueViolation
///     "FOREIGN KEY constraint failed"      → ForeignKeyViolation
///     "CHECK constraint failed", RAISE     → ConstraintViolation
/// sqlx::Error::PoolTimedOut   → DbError::Busy
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
                // extended codes keep the primary code in the low byte
                let primary = db_err
                    .code()
                    .and_then(|c| c.parse::<i32>().ok())
                    .map(|c| c & 0xff);

                if matches!(primary, Some(5) | Some(6)) || msg.contains("database is locked") {
                    DbError::Busy(msg.to_string())
                } else if msg.contains("UNIQUE constraint failed") {
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
                } else if msg.contains("CHECK constraint failed") || msg.contains("append-only") {
                    DbError::ConstraintViolation(msg.to_string())
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => {
                DbError::Busy("timed out waiting for a connection".to_string())
            }

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
