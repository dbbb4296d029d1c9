// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Redis provider for the `cachelock` consistency layer.
//!
//! [`RedisProvider`] implements [`Provider`](cachelock_provider::Provider) on a stock Redis
//! server. No server-side scripting is required: compare-and-swap writes and all-or-nothing
//! lock acquisition are built from `WATCH` and `MULTI`/`EXEC`, while the decision of what may
//! overwrite what stays in the client's [`SentinelManager`](cachelock_provider::SentinelManager).
//!
//! Dependency lists are stored as JSON arrays in ordinary string keys and tombstones are
//! short-lived string keys, so the whole cache namespace can be inspected with `redis-cli`.
//!
//! # Configuration
//!
//! ```
//! use cachelock_redis::RedisProviderConfig;
//! use std::time::Duration;
//!
//! let config: RedisProviderConfig = RedisProviderConfig::new("redis://127.0.0.1:6379")
//!     .with_name("authz")
//!     .with_key_prefix("prod")
//!     .with_tombstone_ttl(Duration::from_secs(2));
//!
//! assert_eq!(config.namespaced("authz:OBJ_1"), "prod:authz:OBJ_1");
//! ```

mod config;
mod provider;

pub use config::RedisProviderConfig;
pub use provider::RedisProvider;
