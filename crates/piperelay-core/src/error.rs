//! Error types and result handling for core operations.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for storage and ingest operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend operation failed.
    #[error("storage error: {0}")]
    Database(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness or referential constraint violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Caller-supplied input was rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Ingested payload exceeds the 256 KiB limit.
    #[error("payload too large: {size_bytes} bytes exceeds {limit_bytes} byte limit")]
    PayloadTooLarge {
        /// Size of the rejected payload in bytes.
        size_bytes: usize,
        /// Configured maximum payload size in bytes.
        limit_bytes: usize,
    },
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested entity not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Conflict(format!("unique constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                Self::Conflict(format!("foreign key constraint violation: {db_err}"))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = CoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn payload_too_large_reports_both_sizes() {
        let err = CoreError::PayloadTooLarge { size_bytes: 300_000, limit_bytes: 262_144 };
        let message = err.to_string();
        assert!(message.contains("300000"));
        assert!(message.contains("262144"));
    }
}
