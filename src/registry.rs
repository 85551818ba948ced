//! Name to proxy lookup, used by records to find the proxy that wrote them.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::ProxyStorageSettings;
use crate::proxy::ProxyStore;
use crate::{Error, Result};

/// An immutable set of proxies keyed by name.
///
/// Records carry only the `proxy_storage_name` of the proxy that created
/// them; the registry turns that name back into the proxy, and a proxy back
/// into its name.
#[derive(Debug, Default)]
pub struct ProxyRegistry {
    stores: BTreeMap<String, Arc<ProxyStore>>,
}

impl ProxyRegistry {
    pub fn builder() -> ProxyRegistryBuilder {
        ProxyRegistryBuilder::default()
    }

    /// Build every proxy described by `settings`.
    pub async fn from_settings(settings: &ProxyStorageSettings) -> Result<Self> {
        let mut builder = Self::builder();
        for store in settings.build_proxies().await? {
            builder = builder.register(store);
        }
        builder.build()
    }

    /// The proxy registered as `name`.
    pub fn get(&self, name: &str) -> Result<&Arc<ProxyStore>> {
        self.stores
            .get(name)
            .ok_or_else(|| Error::Config(format!("no proxy storage registered as {name}")))
    }

    /// The name `store` is registered under, if it is registered here.
    pub fn name_of(&self, store: &ProxyStore) -> Option<&str> {
        self.stores
            .iter()
            .find(|(_, registered)| std::ptr::eq(registered.as_ref(), store))
            .map(|(name, _)| name.as_str())
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

/// Collects proxies for a [`ProxyRegistry`]. Names must be unique.
#[derive(Debug, Default)]
pub struct ProxyRegistryBuilder {
    stores: Vec<ProxyStore>,
}

impl ProxyRegistryBuilder {
    /// Register `store` under its own name.
    pub fn register(mut self, store: ProxyStore) -> Self {
        self.stores.push(store);
        self
    }

    pub fn build(self) -> Result<ProxyRegistry> {
        let mut stores = BTreeMap::new();
        for store in self.stores {
            let name = store.name().to_string();
            if stores.contains_key(&name) {
                return Err(Error::Config(format!(
                    "proxy storage {name} is registered twice"
                )));
            }
            stores.insert(name, Arc::new(store));
        }
        Ok(ProxyRegistry { stores })
    }
}
