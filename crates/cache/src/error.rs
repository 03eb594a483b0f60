//! Adapter error types and result alias.
//!
//! Store failures pass through unchanged inside [`CacheError::Store`]; the
//! remaining variants are raised by the adapters themselves.
//!
//! # Error Types
//!
//! - [`CacheError::Store`] - The tuple store failed (including "unreachable")
//! - [`CacheError::CorruptValue`] - A stored column is neither an integer nor a sentinel blob
//! - [`CacheError::MissingKey`] - `incr`/`decr` on an absent or expired key
//! - [`CacheError::NotANumber`] - `incr`/`decr` on a blob value
//! - [`CacheError::Serialization`] - A value could not be serialized for storage
//! - [`CacheError::Delivery`] - A buffer delivery could not be scheduled or applied
//!
//! Losing an `add` race and draining an empty buffer window are not errors;
//! they surface as `Ok(false)` and
//! [`ProcessOutcome::Skipped`](crate::ProcessOutcome::Skipped).

use thiserror::Error;
use std::sync::Arc;

use tuplekit_store::{BoxError, StorageError};

/// Result type alias for adapter operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors returned by the cache, result backend, and coalescing buffer.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// The tuple store failed. Never retried locally.
    #[error(transparent)]
    Store(#[from] StorageError),

    /// A stored value could not be decoded.
    ///
    /// Never coerced to a miss: a corrupt row is an infrastructure problem the
    /// caller must see.
    #[error("Corrupt value at '{key}': {message}")]
    CorruptValue {
        /// Store key of the row.
        key: String,
        /// What was wrong with it.
        message: String,
    },

    /// `incr`/`decr` targeted a key that is absent or expired.
    #[error("Key '{key}' not found")]
    MissingKey {
        /// Store key that was missing.
        key: String,
    },

    /// `incr`/`decr` targeted a key holding a non-integer value.
    #[error("Value at '{key}' is not an integer")]
    NotANumber {
        /// Store key of the row.
        key: String,
    },

    /// A value could not be serialized.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
        /// The underlying serializer error.
        #[source]
        source: serde_json::Error,
    },

    /// The delivery scheduler or buffer consumer failed.
    ///
    /// Counter rows drained before the failure are gone; the caller decides
    /// whether to re-apply the delivery.
    #[error("Delivery error: {message}")]
    Delivery {
        /// Description of the failure.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },
}

impl CacheError {
    /// Creates a new `CorruptValue` error.
    #[must_use]
    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorruptValue { key: key.into(), message: message.into() }
    }

    /// Creates a new `MissingKey` error.
    #[must_use]
    pub fn missing_key(key: impl Into<String>) -> Self {
        Self::MissingKey { key: key.into() }
    }

    /// Creates a new `NotANumber` error.
    #[must_use]
    pub fn not_a_number(key: impl Into<String>) -> Self {
        Self::NotANumber { key: key.into() }
    }

    /// Creates a new `Delivery` error.
    #[must_use]
    pub fn delivery(message: impl Into<String>) -> Self {
        Self::Delivery { message: message.into(), source: None }
    }

    /// Creates a new `Delivery` error wrapping the consumer's own error.
    #[must_use]
    pub fn delivery_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Delivery { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` when the underlying store was unreachable or timed out.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_transient())
    }
}
