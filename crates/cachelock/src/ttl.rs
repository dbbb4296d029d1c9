// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Time-to-live tables.

use std::{collections::HashMap, fmt, time::Duration};

/// The TTL that disables caching of a key type.
pub const SKIP_CACHE_TTL: Duration = Duration::ZERO;

/// Maps key-type identifiers to time-to-live values.
///
/// [`SKIP_CACHE_TTL`] turns every read and save of the type into a no-op.
pub trait TtlProvider: Send + Sync + fmt::Debug {
    /// Returns the TTL for `id`.
    fn ttl(&self, id: &str) -> Duration;
}

/// A [`TtlProvider`] with per-identifier overrides of a default TTL.
///
/// # Examples
///
/// ```
/// use cachelock::{SKIP_CACHE_TTL, TtlProvider, Ttls};
/// use std::time::Duration;
///
/// let ttls = Ttls::new(Duration::from_secs(300)).with_ttl("AUDIT", SKIP_CACHE_TTL);
///
/// assert_eq!(ttls.ttl("USER"), Duration::from_secs(300));
/// assert!(ttls.ttl("AUDIT").is_zero());
/// ```
#[derive(Clone, Debug)]
pub struct Ttls {
    default: Duration,
    overrides: HashMap<String, Duration>,
}

impl Ttls {
    /// Creates a table answering `default` for every identifier.
    #[must_use]
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Overrides the TTL of `id`.
    #[must_use]
    pub fn with_ttl(mut self, id: impl Into<String>, ttl: Duration) -> Self {
        self.overrides.insert(id.into(), ttl);
        self
    }
}

impl TtlProvider for Ttls {
    fn ttl(&self, id: &str) -> Duration {
        self.overrides.get(id).copied().unwrap_or(self.default)
    }
}
