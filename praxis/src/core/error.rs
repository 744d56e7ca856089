use thiserror::Error;

/// Core error type for praxis.
///
/// Covers encoding of persisted values and schema evolution of typed
/// workflow state. Storage and execution layers wrap this error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Serialization failed when encoding a value to bytes.
    #[error("serialization failed")]
    Serialization(#[source] serde_json::Error),

    /// Deserialization failed when decoding bytes to a value.
    #[error("deserialization failed")]
    Deserialization(#[source] serde_json::Error),

    /// A persisted state blob was written by a newer schema than this binary knows.
    #[error("cannot migrate state from schema v{from} to v{to}: {reason}")]
    SchemaMigration { from: u32, to: u32, reason: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Boxed error returned by pluggable collaborators (handlers, runners, nodes, sinks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
