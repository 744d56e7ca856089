//! Foundation types shared by every layer.
//!
//! This module hides the serialization format (JSON via serde_json) and the
//! fingerprint hash (SeaHash) behind small functions, and defines the retry
//! vocabulary used to classify transient failures.

mod error;
mod retry;
mod serialization;

pub use error::{BoxError, CoreError, Result};
pub use retry::{retry_transient, RetryPolicy, Transient};
pub use serialization::{deserialize_value, fingerprint, serialize_value, truncate_chars};
