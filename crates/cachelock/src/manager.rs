// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{fmt, sync::Arc};

use cachelock_provider::Provider;

use crate::{KeyNameProvider, Result, TtlProvider};

/// Bundles a provider with the key naming and TTL policies of one cache namespace.
///
/// A manager holds no mutable state; share one (or clones of it) across every request.
///
/// # Examples
///
/// ```
/// use cachelock::{InMemoryProvider, KeyNames, Manager, Ttls};
/// use std::time::Duration;
///
/// let manager = Manager::new(
///     InMemoryProvider::new(),
///     KeyNames::new("authz").with_template("USER", "USER_{}"),
///     Ttls::new(Duration::from_secs(300)),
/// );
/// assert_eq!(manager.names().prefix(), "authz");
/// ```
#[derive(Clone)]
pub struct Manager<P> {
    provider: P,
    names: Arc<dyn KeyNameProvider>,
    ttls: Arc<dyn TtlProvider>,
}

impl<P: fmt::Debug> fmt::Debug for Manager<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("provider", &self.provider)
            .field("names", &self.names)
            .field("ttls", &self.ttls)
            .finish()
    }
}

impl<P: Provider> Manager<P> {
    /// Creates a manager.
    pub fn new(provider: P, names: impl KeyNameProvider + 'static, ttls: impl TtlProvider + 'static) -> Self {
        Self {
            provider,
            names: Arc::new(names),
            ttls: Arc::new(ttls),
        }
    }

    /// Returns the provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Returns the key naming policy.
    pub fn names(&self) -> &dyn KeyNameProvider {
        &*self.names
    }

    /// Returns the TTL policy.
    pub fn ttls(&self) -> &dyn TtlProvider {
        &*self.ttls
    }

    /// Removes every key of the namespace. Tombstones survive unless `flush_tombstones`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`](crate::Error::Provider) if the provider fails.
    pub async fn flush(&self, flush_tombstones: bool) -> Result<()> {
        tracing::debug!(cache.name = self.provider.cache_name(), cache.prefix = self.names.prefix(), "cache.flush");
        self.provider.flush(self.names.prefix(), flush_tombstones).await?;
        Ok(())
    }
}
