//! Proxy settings loaded from TOML.
//!
//! ```toml
//! [proxies.media]
//! routing = "fallback"
//!
//! [proxies.media.metadata]
//! kind = "relational"
//! url = "sqlite://meta.db"
//! table = "proxy_records"
//!
//! [[proxies.media.backends]]
//! name = "disk"
//! kind = "local"
//! root = "/var/media"
//! fallback_errors = ["io", "permission_denied"]
//!
//! [[proxies.media.backends]]
//! name = "spare"
//! kind = "memory"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::meta::MetadataBackend;
use crate::proxy::ProxyStore;
use crate::{ByteStore, Error, ErrorKind, Result};

/// Settings for every proxy, keyed by proxy name.
#[derive(Debug, Default, Deserialize)]
pub struct ProxyStorageSettings {
    #[serde(default)]
    pub proxies: BTreeMap<String, ProxySettings>,
}

/// Settings of one proxy.
#[derive(Debug, Deserialize)]
pub struct ProxySettings {
    #[serde(default)]
    pub routing: RoutingMode,
    pub metadata: MetadataSettings,
    #[serde(default)]
    pub backends: Vec<BackendSettings>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    #[default]
    Single,
    Multi,
    Fallback,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetadataSettings {
    Relational {
        #[serde(deserialize_with = "secret_string")]
        url: SecretString,
        #[serde(default = "default_collection")]
        table: String,
    },
    Document {
        /// Database file; an in-memory database when absent.
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default = "default_collection")]
        collection: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendSettings {
    pub name: String,
    pub kind: StoreKind,
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Error kinds after which a write moves on to the next store.
    #[serde(default)]
    pub fallback_errors: Vec<ErrorKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Memory,
    Local,
}

fn default_collection() -> String {
    "proxy_records".to_string()
}

fn secret_string<'de, D>(deserializer: D) -> std::result::Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

impl ProxyStorageSettings {
    /// Parse and validate settings.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(s).map_err(|e| Error::Config(format!("invalid settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read, parse and validate the settings file at `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "Loading proxy storage settings");
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, proxy) in &self.proxies {
            proxy
                .validate()
                .map_err(|reason| Error::Config(format!("proxy {name}: {reason}")))?;
        }
        Ok(())
    }

    /// Build every configured proxy.
    pub async fn build_proxies(&self) -> Result<Vec<ProxyStore>> {
        let mut stores = Vec::with_capacity(self.proxies.len());
        for (name, proxy) in &self.proxies {
            stores.push(proxy.build(name).await?);
        }
        Ok(stores)
    }
}

impl ProxySettings {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.backends.is_empty() {
            return Err("no byte stores configured".into());
        }
        if self.routing == RoutingMode::Single && self.backends.len() != 1 {
            return Err(format!(
                "single routing takes exactly one byte store, got {}",
                self.backends.len()
            ));
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.name.is_empty() {
                return Err("byte store name cannot be empty".into());
            }
            if !seen.insert(backend.name.as_str()) {
                return Err(format!("duplicate byte store name: {}", backend.name));
            }
            if backend.kind == StoreKind::Local && backend.root.is_none() {
                return Err(format!("local byte store {} has no root", backend.name));
            }
        }
        Ok(())
    }

    /// Build the proxy called `name`.
    pub async fn build(&self, name: &str) -> Result<ProxyStore> {
        self.validate()
            .map_err(|reason| Error::Config(format!("proxy {name}: {reason}")))?;

        let mut builder = ProxyStore::builder(name).shared_metadata(self.metadata.build().await?);
        match self.routing {
            RoutingMode::Single => {
                builder = builder.shared_single(self.backends[0].build()?);
            }
            RoutingMode::Multi | RoutingMode::Fallback => {
                for backend in &self.backends {
                    builder = builder.shared_backend(backend.name.as_str(), backend.build()?);
                }
                builder = builder.with_fallback(self.routing == RoutingMode::Fallback);
            }
        }
        builder.build()
    }
}

impl MetadataSettings {
    pub async fn build(&self) -> Result<Arc<dyn MetadataBackend>> {
        match self {
            MetadataSettings::Relational { url, table } => relational(url, table).await,
            MetadataSettings::Document { path, collection } => {
                document(path.as_deref(), collection)
            }
        }
    }
}

impl BackendSettings {
    pub fn build(&self) -> Result<Arc<dyn ByteStore>> {
        match self.kind {
            StoreKind::Memory => memory(&self.fallback_errors),
            StoreKind::Local => {
                let root = self.root.as_deref().ok_or_else(|| {
                    Error::Config(format!("local byte store {} has no root", self.name))
                })?;
                local(root, &self.fallback_errors)
            }
        }
    }
}

#[cfg(not(all(
    feature = "relational",
    feature = "document",
    feature = "memory",
    feature = "local"
)))]
fn disabled(feature: &str) -> Error {
    Error::Config(format!("the `{feature}` feature is not enabled"))
}

#[cfg(feature = "relational")]
async fn relational(url: &SecretString, table: &str) -> Result<Arc<dyn MetadataBackend>> {
    use secrecy::ExposeSecret;

    let backend =
        crate::meta::RelationalMetadataBackend::connect(url.expose_secret(), table).await?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "relational"))]
async fn relational(_url: &SecretString, _table: &str) -> Result<Arc<dyn MetadataBackend>> {
    Err(disabled("relational"))
}

#[cfg(feature = "document")]
fn document(path: Option<&Path>, collection: &str) -> Result<Arc<dyn MetadataBackend>> {
    use crate::meta::DocumentMetadataBackend;

    let backend = match path {
        Some(path) => DocumentMetadataBackend::open(path, collection)?,
        None => DocumentMetadataBackend::in_memory(collection)?,
    };
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "document"))]
fn document(_path: Option<&Path>, _collection: &str) -> Result<Arc<dyn MetadataBackend>> {
    Err(disabled("document"))
}

#[cfg(feature = "memory")]
fn memory(fallback_errors: &[ErrorKind]) -> Result<Arc<dyn ByteStore>> {
    Ok(declare(crate::MemoryStore::new(), fallback_errors))
}

#[cfg(not(feature = "memory"))]
fn memory(_fallback_errors: &[ErrorKind]) -> Result<Arc<dyn ByteStore>> {
    Err(disabled("memory"))
}

#[cfg(feature = "local")]
fn local(root: &Path, fallback_errors: &[ErrorKind]) -> Result<Arc<dyn ByteStore>> {
    Ok(declare(crate::LocalStore::new(root), fallback_errors))
}

#[cfg(not(feature = "local"))]
fn local(_root: &Path, _fallback_errors: &[ErrorKind]) -> Result<Arc<dyn ByteStore>> {
    Err(disabled("local"))
}

#[cfg(any(feature = "memory", feature = "local"))]
fn declare<S: ByteStore + 'static>(store: S, kinds: &[ErrorKind]) -> Arc<dyn ByteStore> {
    if kinds.is_empty() {
        Arc::new(store)
    } else {
        Arc::new(crate::FallbackOn::new(store, kinds.iter().copied()))
    }
}
