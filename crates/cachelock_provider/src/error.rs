// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for provider operations.

use thiserror::Error;

use crate::Key;

/// A specialized [`Result`] type for provider operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An error returned by a [`Provider`](crate::Provider).
///
/// Lock contention is not an error: providers report it through [`Sentinel::NO_LOCK`](crate::Sentinel::NO_LOCK)
/// and [`SetOutcome::conflict`](crate::SetOutcome::conflict). Errors are reserved for conditions
/// the caller has to degrade around.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A dependency could not be registered because the key holds a tombstone.
    #[error("key {0} holds a tombstone")]
    Tombstoned(Key),

    /// The caller supplied arguments the provider cannot act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The provider does not implement the requested operation.
    #[error("{0} is not supported by this provider")]
    Unsupported(&'static str),

    /// A slot holds content that cannot be decoded, such as a malformed dependency list.
    #[error("value at {key} is corrupt")]
    Corrupt {
        /// The key whose content failed to decode.
        key: Key,
        /// The decoding failure.
        #[source]
        source: serde_json::Error,
    },

    /// The backend failed (network, timeout, protocol).
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps any backend failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use cachelock_provider::Error;
    ///
    /// let error = Error::backend("connection reset");
    /// assert_eq!(error.to_string(), "connection reset");
    /// ```
    pub fn backend(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Backend(cause.into())
    }
}
