// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Request-scoped cache metrics.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;

use crate::{Error, Result};

/// Counters and latencies collected over one request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    /// Cache operations that reached the provider.
    pub calls: u64,
    /// Lookups that returned an item.
    pub hits: u64,
    /// Lookups that returned nothing.
    pub misses: u64,
    /// Values written to the cache.
    pub stores: u64,
    /// Items deleted from the cache.
    pub deletions: u64,
    /// Duration of each provider read.
    pub get_latencies: Vec<Duration>,
    /// Duration of each provider write.
    pub store_latencies: Vec<Duration>,
    /// Duration of each provider delete.
    pub deletion_latencies: Vec<Duration>,
}

impl CacheMetrics {
    /// Returns the fraction of lookups that hit, or `None` before the first lookup.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "request-scoped counters stay far below 2^52")]
    pub fn hit_rate(&self) -> Option<f64> {
        let lookups = self.hits + self.misses;
        (lookups > 0).then(|| self.hits as f64 / lookups as f64)
    }

    /// Returns the time spent in the provider.
    #[must_use]
    pub fn total_latency(&self) -> Duration {
        self.get_latencies
            .iter()
            .chain(&self.store_latencies)
            .chain(&self.deletion_latencies)
            .sum()
    }
}

/// Per-request state threaded through every cache operation.
///
/// Clones share the attached metrics. A context without metrics records nothing.
///
/// # Examples
///
/// ```
/// use cachelock::{CacheContext, get_metrics, init_context};
///
/// let mut ctx = CacheContext::default();
/// assert!(get_metrics(&ctx).is_err());
///
/// init_context(&mut ctx);
/// assert_eq!(get_metrics(&ctx)?.calls, 0);
/// # Ok::<(), cachelock::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct CacheContext {
    metrics: Option<Arc<Mutex<CacheMetrics>>>,
}

impl CacheContext {
    /// Creates a context with fresh metrics attached.
    #[must_use]
    pub fn with_metrics() -> Self {
        Self {
            metrics: Some(Arc::default()),
        }
    }

    fn record(&self, update: impl FnOnce(&mut CacheMetrics)) {
        if let Some(metrics) = &self.metrics {
            update(&mut metrics.lock());
        }
    }

    pub(crate) fn record_call(&self) {
        self.record(|m| m.calls += 1);
    }

    pub(crate) fn record_lookup(&self, hit: bool) {
        self.record(|m| {
            if hit {
                m.hits += 1;
            } else {
                m.misses += 1;
            }
        });
    }

    pub(crate) fn record_get(&self, elapsed: Duration) {
        self.record(|m| m.get_latencies.push(elapsed));
    }

    pub(crate) fn record_store(&self, elapsed: Duration, stored: bool) {
        self.record(|m| {
            m.store_latencies.push(elapsed);
            if stored {
                m.stores += 1;
            }
        });
    }

    pub(crate) fn record_deletion(&self, elapsed: Duration, deleted: bool) {
        self.record(|m| {
            m.deletion_latencies.push(elapsed);
            if deleted {
                m.deletions += 1;
            }
        });
    }
}

/// Attaches fresh metrics to `ctx` unless it already has some.
pub fn init_context(ctx: &mut CacheContext) {
    if ctx.metrics.is_none() {
        ctx.metrics = Some(Arc::default());
    }
}

/// Attaches fresh metrics to `ctx`, dropping any it had.
pub fn reset_context(ctx: &mut CacheContext) {
    ctx.metrics = Some(Arc::default());
}

/// Returns a snapshot of the metrics attached to `ctx`.
///
/// # Errors
///
/// Returns [`Error::MetricsNotInitialized`] if `ctx` has no metrics attached.
pub fn get_metrics(ctx: &CacheContext) -> Result<CacheMetrics> {
    ctx.metrics
        .as_ref()
        .map(|metrics| metrics.lock().clone())
        .ok_or(Error::MetricsNotInitialized)
}
