// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for configuring in-memory providers.

use std::{sync::Arc, time::Duration};

use cachelock_provider::{DefaultSentinelManager, SentinelManager};

use crate::provider::InMemoryProvider;

/// How long an abandoned lock blocks its keys by default.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// How long a tombstone blocks new dependents by default.
pub const DEFAULT_TOMBSTONE_TTL: Duration = Duration::from_secs(5);

/// Builder for configuring an [`InMemoryProvider`].
///
/// # Examples
///
/// ```
/// use cachelock_memory::InMemoryProvider;
/// use std::time::Duration;
///
/// let provider = InMemoryProvider::builder()
///     .name("userstore")
///     .lock_ttl(Duration::from_secs(10))
///     .tombstone_ttl(Duration::from_secs(2))
///     .build();
/// ```
#[derive(Debug)]
pub struct InMemoryProviderBuilder {
    pub(crate) name: Option<String>,
    pub(crate) lock_ttl: Duration,
    pub(crate) tombstone_ttl: Duration,
    pub(crate) sentinel_manager: Option<Arc<dyn SentinelManager>>,
}

impl Default for InMemoryProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProviderBuilder {
    /// Creates a builder with the default lock and tombstone lifetimes and the
    /// [`DefaultSentinelManager`] rules.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: None,
            lock_ttl: DEFAULT_LOCK_TTL,
            tombstone_ttl: DEFAULT_TOMBSTONE_TTL,
            sentinel_manager: None,
        }
    }

    /// Sets the name reported by `cache_name` and used in logs.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets how long a sentinel survives if its holder never releases it.
    #[must_use]
    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Sets how long tombstones block new dependents and read locks.
    #[must_use]
    pub fn tombstone_ttl(mut self, ttl: Duration) -> Self {
        self.tombstone_ttl = ttl;
        self
    }

    /// Replaces the sentinel rules.
    #[must_use]
    pub fn sentinel_manager(mut self, manager: impl SentinelManager + 'static) -> Self {
        self.sentinel_manager = Some(Arc::new(manager));
        self
    }

    /// Builds the configured provider.
    #[must_use]
    pub fn build(self) -> InMemoryProvider {
        InMemoryProvider::from_builder(self)
    }

    pub(crate) fn take_sentinel_manager(&mut self) -> Arc<dyn SentinelManager> {
        self.sentinel_manager.take().unwrap_or_else(|| Arc::new(DefaultSentinelManager))
    }
}
