// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! In-process provider for the `cachelock` consistency layer.
//!
//! [`InMemoryProvider`] keeps every slot in one map behind one mutex, which trivially gives it
//! the atomicity the [`Provider`](cachelock_provider::Provider) contract demands: a
//! compare-and-swap `set_value` and an all-or-nothing `write_sentinel`. Expiry is lazy and
//! measured on the tokio clock, so tests can pause and advance time.
//!
//! # Quick Start
//!
//! ```
//! use cachelock_memory::InMemoryProvider;
//! use cachelock_provider::{Key, Provider, SentinelType};
//! use std::time::Duration;
//!
//! # futures::executor::block_on(async {
//! let provider = InMemoryProvider::builder()
//!     .name("authz")
//!     .lock_ttl(Duration::from_secs(10))
//!     .build();
//!
//! let key = Key::from("authz:OBJ_1");
//! let sentinel = provider.write_sentinel(SentinelType::Create, &[key.clone()]).await?;
//! let outcome = provider
//!     .set_value(&key, &[key.clone()], r#"{"id":1}"#, &sentinel, Duration::from_secs(60))
//!     .await?;
//! assert!(outcome.stored);
//!
//! let lookup = provider.get_value(&key, false).await?;
//! assert_eq!(lookup.value.as_deref(), Some(r#"{"id":1}"#));
//! # Ok::<(), cachelock_provider::Error>(())
//! # });
//! ```

pub mod builder;
pub mod provider;

#[doc(inline)]
pub use builder::InMemoryProviderBuilder;
#[doc(inline)]
pub use provider::InMemoryProvider;
