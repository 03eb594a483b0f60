//! Store error types and result alias.
//!
//! This module defines the error types that tuple store operations can
//! produce. Every [`TupleStore`](crate::TupleStore) implementation must map
//! its client library's failures onto these variants.
//!
//! # Error Types
//!
//! - [`StorageError::Conflict`] - Insert hit an existing primary key
//! - [`StorageError::Connection`] - Network or connection-related failures
//! - [`StorageError::Timeout`] - Operation exceeded time limit
//! - [`StorageError::UnknownSpace`] - The space id is not defined on the store
//! - [`StorageError::UnknownProcedure`] - No server-side procedure with that name
//! - [`StorageError::FieldType`] - An update op targeted a field of the wrong type
//! - [`StorageError::InvalidTuple`] - A tuple or key does not fit the space schema
//! - [`StorageError::Internal`] - Backend-specific internal errors
//!
//! # Example
//!
//! ```
//! use tuplekit_store::{SpaceId, StorageError, StorageResult};
//!
//! fn lookup(space: SpaceId) -> StorageResult<()> {
//!     Err(StorageError::unknown_space(space))
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

use crate::types::SpaceId;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during tuple store operations.
///
/// Errors preserve their source chain via the `#[source]` attribute, enabling
/// debugging tools to display the full error context.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// An insert found a row with the same primary key.
    ///
    /// This is the authoritative "already exists" signal used for
    /// insert-if-absent protocols. It is not transient: retrying the same
    /// insert yields the same conflict until the row is removed.
    #[error("Duplicate key")]
    Conflict,

    /// Connection or network error.
    ///
    /// The store could not be reached, or the connection failed mid-request.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Operation timed out.
    #[error("Operation timeout")]
    Timeout,

    /// The space is not defined on the store.
    #[error("Space {space} does not exist")]
    UnknownSpace {
        /// The missing space.
        space: SpaceId,
    },

    /// No server-side procedure is registered under this name.
    #[error("Procedure '{name}' is not defined")]
    UnknownProcedure {
        /// The procedure name that was called.
        name: String,
    },

    /// An update operation targeted a field whose type does not support it,
    /// e.g. an arithmetic add on a binary field.
    #[error("Field {field} in space {space}: {message}")]
    FieldType {
        /// Space holding the row.
        space: SpaceId,
        /// Zero-based field number.
        field: usize,
        /// What was wrong with the field.
        message: String,
    },

    /// A tuple, key or update does not fit the space's schema.
    #[error("Invalid tuple: {message}")]
    InvalidTuple {
        /// Description of the schema violation.
        message: String,
    },

    /// Internal store error.
    ///
    /// Catch-all for backend-specific errors that don't fit other categories.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },
}

impl StorageError {
    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict() -> Self {
        Self::Conflict
    }

    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Creates a new `UnknownSpace` error.
    #[must_use]
    pub fn unknown_space(space: SpaceId) -> Self {
        Self::UnknownSpace { space }
    }

    /// Creates a new `UnknownProcedure` error.
    #[must_use]
    pub fn unknown_procedure(name: impl Into<String>) -> Self {
        Self::UnknownProcedure { name: name.into() }
    }

    /// Creates a new `FieldType` error.
    #[must_use]
    pub fn field_type(space: SpaceId, field: usize, message: impl Into<String>) -> Self {
        Self::FieldType { space, field, message: message.into() }
    }

    /// Creates a new `InvalidTuple` error.
    #[must_use]
    pub fn invalid_tuple(message: impl Into<String>) -> Self {
        Self::InvalidTuple { message: message.into() }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` when the failure is about reaching the store rather
    /// than about the request itself.
    ///
    /// Transient errors are the "store unavailable" class: the same request
    /// may succeed later. Adapters never retry them locally; the caller or
    /// its scheduler owns retry policy.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout)
    }
}

/// Errors raised while validating configuration values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric field is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// Minimum accepted value.
        min: String,
        /// Value that was supplied.
        value: String,
    },

    /// Two fields that must differ hold the same value.
    #[error("{field} must differ from {other}, both are {value}")]
    MustDiffer {
        /// Name of the offending field.
        field: &'static str,
        /// Name of the field it collides with.
        other: &'static str,
        /// The shared value.
        value: String,
    },

    /// A field holds a value that is not acceptable for another reason.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}
