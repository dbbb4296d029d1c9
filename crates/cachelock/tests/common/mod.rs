// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::time::Duration;

use cachelock::{Key, KeyNameProvider, KeyNames, Manager, Provider, SingleItem, Ttls};
use cachelock_memory::InMemoryProvider;
use serde::{Deserialize, Serialize};

pub const TTL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Widget {
    pub id: String,
    pub name: String,
    pub owner: Option<String>,
    pub valid: bool,
}

impl Widget {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
            owner: None,
            valid: true,
        }
    }

    pub fn owned_by(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_owned());
        self
    }

    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }
}

impl SingleItem for Widget {
    const CACHE_ID: &'static str = "WIDGET";

    fn primary_key(&self, names: &dyn KeyNameProvider) -> Key {
        names.key_name_with_string("WIDGET", &self.id)
    }

    fn secondary_keys(&self, names: &dyn KeyNameProvider) -> Vec<Key> {
        vec![names.key_name_with_string("WIDGET_BY_NAME", &self.name)]
    }

    fn global_collection_key(&self, names: &dyn KeyNameProvider) -> Option<Key> {
        Some(names.key_name_static("ALL_WIDGETS"))
    }

    fn per_item_collection_key(&self, names: &dyn KeyNameProvider) -> Option<Key> {
        self.owner.as_deref().map(|owner| names.key_name_with_string("OWNER_WIDGETS", owner))
    }

    fn dependencies_key(&self, names: &dyn KeyNameProvider) -> Option<Key> {
        Some(names.key_name_with_string("WIDGET_DEPS", &self.id))
    }

    fn dependency_keys(&self, names: &dyn KeyNameProvider) -> Vec<Key> {
        self.owner
            .as_deref()
            .map(|owner| vec![names.key_name_with_string("OWNER_DEPS", owner)])
            .unwrap_or_default()
    }

    fn is_modified_key(&self, names: &dyn KeyNameProvider) -> Option<Key> {
        Some(names.key_name_with_string("WIDGET_MODIFIED", &self.id))
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.valid { Ok(()) } else { Err("widget failed validation".into()) }
    }
}

/// An owner without its own collection keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
}

impl SingleItem for Owner {
    const CACHE_ID: &'static str = "OWNER";

    fn primary_key(&self, names: &dyn KeyNameProvider) -> Key {
        names.key_name_with_string("OWNER", &self.id)
    }

    fn per_item_collection_key(&self, names: &dyn KeyNameProvider) -> Option<Key> {
        Some(names.key_name_with_string("OWNER_WIDGETS", &self.id))
    }

    fn dependencies_key(&self, names: &dyn KeyNameProvider) -> Option<Key> {
        Some(names.key_name_with_string("OWNER_DEPS", &self.id))
    }
}

pub fn names() -> KeyNames {
    KeyNames::new("test")
}

pub fn manager() -> Manager<InMemoryProvider> {
    manager_with(InMemoryProvider::new())
}

pub fn manager_with<P: Provider>(provider: P) -> Manager<P> {
    Manager::new(provider, names(), Ttls::new(TTL))
}

pub fn key(id: &str, component: &str) -> Key {
    names().key_name_with_string(id, component)
}
