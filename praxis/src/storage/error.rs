use crate::core::{CoreError, Transient};
use thiserror::Error;

/// Storage layer error type for praxis.
///
/// Wraps backend and serialization errors while preserving the error chain.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The backend could not be reached, or a pooled connection could not be obtained.
    #[error("connection error: {0}")]
    Connection(String),

    /// The backend did not answer in time.
    #[error("store operation timed out: {0}")]
    Timeout(String),

    /// A SQL operation failed.
    #[cfg(feature = "sqlite")]
    #[error("database operation failed")]
    Database(#[from] sqlx::Error),

    /// A non-SQL backend rejected the operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// A core serialization or deserialization error occurred.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// A caller-supplied argument cannot be stored.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The backend does not support the requested operation.
    #[error("operation not supported: {0}")]
    Unsupported(String),
}

impl Transient for StorageError {
    fn is_transient(&self) -> bool {
        match self {
            StorageError::Connection(_) | StorageError::Timeout(_) => true,
            #[cfg(feature = "sqlite")]
            StorageError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StorageError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() {
            StorageError::Timeout(e.to_string())
        } else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            StorageError::Connection(e.to_string())
        } else {
            StorageError::Backend(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
