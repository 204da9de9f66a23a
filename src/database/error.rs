use thiserror::Error;

/// Errors surfaced by the durable stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique constraint violation (idempotency key, ledger entry key,
    /// reservation slot). Callers decide whether this is a replay or a race.
    #[error("duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    /// Stored value could not be decoded into a domain type.
    #[error("corrupt stored value: {message}")]
    Decode { message: String },

    /// Underlying database failure.
    #[error("database error: {message}")]
    Database { message: String, is_retryable: bool },
}

impl StoreError {
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StoreError::Duplicate {
                    entity: "row",
                    key: db_err.constraint().unwrap_or("unknown").to_string(),
                };
            }
        }
        let is_retryable = matches!(
            err,
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
        );
        StoreError::Database {
            message: err.to_string(),
            is_retryable,
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        StoreError::Decode {
            message: message.into(),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate { .. })
    }
}

impl From<StoreError> for crate::error::AppError {
    fn from(err: StoreError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        let is_retryable = matches!(
            &err,
            StoreError::Database {
                is_retryable: true,
                ..
            }
        );
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            is_retryable,
        }))
    }
}
