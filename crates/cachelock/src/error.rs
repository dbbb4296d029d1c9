// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache operations.

use cachelock_provider::{Key, SentinelType};
use thiserror::Error;

/// A specialized [`Result`] type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An error returned by the lock, delete and metrics operations.
///
/// Reads and saves never fail: they degrade to a miss or to not caching, and report what
/// happened through their return values and the log.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A lock could not be established. The caller should retry the whole operation.
    #[error("conflicting cache operation on {keys:?}, please retry the call")]
    LockConflict {
        /// The keys the lock was requested on.
        keys: Vec<Key>,
        /// The backend failure behind the conflict, if any.
        #[source]
        source: Option<cachelock_provider::Error>,
    },

    /// The requested lock kind is not valid for the target.
    #[error("{0} locks cannot be taken on per-item collections")]
    InvalidLockKind(SentinelType),

    /// Metrics were requested from a context that never had them attached.
    #[error("cache metrics are not initialized on this context")]
    MetricsNotInitialized,

    /// The provider failed.
    #[error(transparent)]
    Provider(#[from] cachelock_provider::Error),
}

impl Error {
    /// Returns `true` if retrying the failed call may succeed.
    ///
    /// # Examples
    ///
    /// ```
    /// use cachelock::Error;
    ///
    /// let error = Error::LockConflict { keys: Vec::new(), source: None };
    /// assert!(error.is_retryable());
    /// assert!(!Error::MetricsNotInitialized.is_retryable());
    /// ```
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockConflict { .. })
    }
}
