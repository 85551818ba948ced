//! The proxy: logical paths in, byte store I/O and metadata bookkeeping out.

use std::fmt::Debug;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::adapters::multi::{FallbackRouter, MultiBackendRouter, Written};
use crate::meta::MetadataBackend;
use crate::path::{CounterSuffix, NamePolicy, clean_path};
use crate::record::{MetadataRecord, Owner, RecordData};
use crate::{ByteReader, ByteStore, Error, Result};

/// How a proxy picks the byte store for each operation.
#[derive(Debug)]
pub enum Routing {
    /// One unnamed store.
    Single(Arc<dyn ByteStore>),
    /// Named stores; writes go to the default or to the store named by `using`.
    Multi(MultiBackendRouter),
    /// Named stores with fallback on declared errors.
    Fallback(FallbackRouter),
}

impl Routing {
    fn router(&self) -> Option<&MultiBackendRouter> {
        match self {
            Routing::Single(_) => None,
            Routing::Multi(router) => Some(router),
            Routing::Fallback(fallback) => Some(fallback.router()),
        }
    }

    /// The store new writes go to.
    pub fn current(&self) -> Arc<dyn ByteStore> {
        match self {
            Routing::Single(store) => store.clone(),
            Routing::Multi(router) => router.default_store().clone(),
            Routing::Fallback(fallback) => fallback.router().default_store().clone(),
        }
    }

    /// Name of the store new writes go to, when stores are named.
    pub fn current_name(&self) -> Option<String> {
        self.router().map(|router| router.default_name().to_string())
    }

    /// The store holding `record`'s content, or the current store.
    pub fn resolve(&self, record: Option<&MetadataRecord>) -> Result<Arc<dyn ByteStore>> {
        match self.router() {
            None => Ok(self.current()),
            Some(router) => router.resolve(record).cloned(),
        }
    }

    /// The store a write naming `using` would target, with its name.
    pub fn target(&self, using: Option<&str>) -> Result<(Option<String>, Arc<dyn ByteStore>)> {
        match (self.router(), using) {
            (None, None) => Ok((None, self.current())),
            (None, Some(name)) => Err(Error::Config(format!(
                "cannot target byte store {name}: this proxy has a single unnamed store"
            ))),
            (Some(router), using) => {
                let (name, store) = router.target(using)?;
                Ok((Some(name.to_string()), store.clone()))
            }
        }
    }

    /// Write `content` under `name` through the routing strategy.
    pub async fn write(
        &self,
        name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
        using: Option<&str>,
    ) -> Result<Written> {
        match self {
            Routing::Single(store) => {
                if let Some(using) = using {
                    return Err(Error::Config(format!(
                        "cannot target byte store {using}: this proxy has a single unnamed store"
                    )));
                }
                let path = store.save(name, content).await?;
                Ok(Written {
                    path,
                    backend: None,
                })
            }
            Routing::Multi(router) => router.write(name, content, using).await,
            Routing::Fallback(fallback) => fallback.write(name, content, using).await,
        }
    }
}

/// Per-call options of [`ProxyStore::save`].
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Register this existing physical path instead of writing content.
    pub original_storage_path: Option<String>,
    /// Write to this named store for this call only.
    pub using: Option<String>,
    /// Entity the saved file belongs to, passed to the save hooks.
    pub owner: Option<Owner>,
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt a file already present at `path` in the byte store.
    pub fn adopting(mut self, path: impl Into<String>) -> Self {
        self.original_storage_path = Some(path.into());
        self
    }

    pub fn using(mut self, backend: impl Into<String>) -> Self {
        self.using = Some(backend.into());
        self
    }

    pub fn owned_by(mut self, owner: Owner) -> Self {
        self.owner = Some(owner);
        self
    }
}

/// Observer run after a file is saved on behalf of an owning entity.
#[async_trait::async_trait]
pub trait SaveHook: Send + Sync + Debug {
    async fn after_save(&self, store: &ProxyStore, path: &str, owner: &Owner) -> Result<()>;
}

/// Records the owning entity on the file's metadata.
///
/// Writes `content_type_id`, `object_id` and `field` through
/// [`MetadataBackend::update`], skipping the write when the record already
/// carries the same values.
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnerBinding;

#[async_trait::async_trait]
impl SaveHook for OwnerBinding {
    async fn after_save(&self, store: &ProxyStore, path: &str, owner: &Owner) -> Result<()> {
        let record = store.metadata().get(path).await?;
        if owner.is_bound_to(&record) {
            return Ok(());
        }

        tracing::debug!(
            proxy = %store.name(),
            %path,
            content_type_id = owner.content_type_id,
            object_id = owner.object_id,
            field = %owner.field,
            "Binding owner"
        );
        store.metadata().update(path, owner.to_update()).await
    }
}

/// A storage proxy.
///
/// Clients address files by logical path. Each save writes the content to a
/// byte store first and then creates a metadata record linking the logical
/// path to the physical one; reads and deletes resolve the record before
/// touching the byte store. The proxy is the only writer of its metadata.
///
/// Operations are awaited strictly in sequence. No transaction spans the
/// byte write and the metadata write: if creating the record fails after the
/// content was written, the content is left behind.
#[derive(Debug)]
pub struct ProxyStore {
    name: String,
    meta: Arc<dyn MetadataBackend>,
    routing: Routing,
    policy: Box<dyn NamePolicy>,
    hooks: Vec<Arc<dyn SaveHook>>,
}

impl ProxyStore {
    /// Start building a proxy called `name`.
    ///
    /// The name is written into every record as `proxy_storage_name` and is
    /// the key the proxy is registered under in a
    /// [`ProxyRegistry`](crate::ProxyRegistry).
    pub fn builder(name: impl Into<String>) -> ProxyStoreBuilder {
        ProxyStoreBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &dyn MetadataBackend {
        self.meta.as_ref()
    }

    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    /// Save `content` and return the logical path it is reachable under.
    ///
    /// The logical path is the cleaned full path of the physical object,
    /// made unique against existing records by the name policy. With
    /// [`SaveOptions::adopting`] no content is written and `content` is not
    /// read.
    ///
    /// Save hooks run once the record exists. Their errors are logged, not
    /// returned; call [`notify_saved`](Self::notify_saved) to observe them.
    pub async fn save<R>(&self, name: &str, content: &mut R, options: SaveOptions) -> Result<String>
    where
        R: AsyncRead + Send + Unpin,
    {
        let using = options.using.as_deref();
        let (original_storage_path, backend, store) = match options.original_storage_path {
            Some(path) => {
                let (backend, store) = self.routing.target(using)?;
                tracing::debug!(proxy = %self.name, %path, ?backend, "Adopting existing object");
                (path, backend, store)
            }
            None => {
                let written = self.routing.write(name, content, using).await?;
                let (_, store) = self.routing.target(written.backend.as_deref())?;
                (written.path, written.backend, store)
            }
        };

        let full_path = full_path_in(store.as_ref(), &original_storage_path)?;
        let path = self.available_name(&clean_path(&full_path)).await?;

        let data = RecordData::new(path.as_str(), original_storage_path)
            .with_proxy_storage_name(self.name.as_str())
            .with_original_storage_name(backend);
        let record = self.meta.create(data).await?;
        tracing::debug!(
            proxy = %self.name,
            %path,
            original_storage_path = %record.original_storage_path,
            backend = ?record.original_storage_name,
            "Saved"
        );

        // The file is saved at this point; a hook failure must not hide `path`.
        if let Some(owner) = &options.owner {
            if let Err(e) = self.notify_saved(&path, owner).await {
                tracing::warn!(proxy = %self.name, %path, error = ?e, "Save hook failed");
            }
        }
        Ok(path)
    }

    /// Save a byte slice with default options.
    pub async fn save_bytes(&self, name: &str, bytes: &[u8]) -> Result<String> {
        let mut reader = std::io::Cursor::new(bytes);
        self.save(name, &mut reader, SaveOptions::default()).await
    }

    /// Register an object already present at `original_storage_path`.
    pub async fn adopt(&self, original_storage_path: &str, options: SaveOptions) -> Result<String> {
        let options = options.adopting(original_storage_path);
        self.save(original_storage_path, &mut tokio::io::empty(), options)
            .await
    }

    /// Open the file at logical path `name`.
    pub async fn open(&self, name: &str) -> Result<ByteReader> {
        let record = self.meta.get(name).await.map_err(|e| match e {
            Error::RecordNotFound(_) => Error::NoSuchObject {
                backend: self.meta.kind(),
                path: name.to_string(),
            },
            e => e,
        })?;
        self.byte_store_for(Some(&record))?
            .open(&record.original_storage_path)
            .await
    }

    /// Read a whole file into memory.
    pub async fn read_bytes(&self, name: &str) -> Result<Vec<u8>> {
        let mut reader = self.open(name).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Delete the content and then the record of `name`.
    ///
    /// A failing content delete leaves the record in place.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let record = self.meta.get(name).await.map_err(|e| match e {
            Error::RecordNotFound(_) => Error::NotFound(name.to_string()),
            e => e,
        })?;

        self.byte_store_for(Some(&record))?
            .delete(&record.original_storage_path)
            .await?;
        self.meta.delete(&record.path).await?;

        tracing::debug!(proxy = %self.name, path = %name, "Deleted");
        Ok(())
    }

    /// Whether a record for `name` exists. The byte store is not consulted.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        self.meta.exists(name).await
    }

    /// Canonical full path of the physical object `path`, or `path` itself
    /// when the store cannot express one.
    pub fn original_storage_full_path(
        &self,
        path: &str,
        record: Option<&MetadataRecord>,
    ) -> Result<String> {
        full_path_in(self.byte_store_for(record)?.as_ref(), path)
    }

    /// The byte store holding `record`'s content, or the current write target.
    pub fn byte_store_for(&self, record: Option<&MetadataRecord>) -> Result<Arc<dyn ByteStore>> {
        self.routing.resolve(record)
    }

    /// The current write target.
    pub fn byte_store(&self) -> Arc<dyn ByteStore> {
        self.routing.current()
    }

    /// Run the save hooks for a file saved at `path` on behalf of `owner`.
    ///
    /// Stops at the first failing hook and returns its error.
    pub async fn notify_saved(&self, path: &str, owner: &Owner) -> Result<()> {
        for hook in &self.hooks {
            hook.after_save(self, path, owner).await?;
        }
        Ok(())
    }

    async fn available_name(&self, name: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            let candidate = self.policy.candidate(name, attempt);
            if !self.meta.exists(&candidate).await? {
                return Ok(candidate);
            }
            attempt += 1;
        }
    }
}

fn full_path_in(store: &dyn ByteStore, path: &str) -> Result<String> {
    match store.path(path) {
        Err(Error::NotImplemented(_)) => Ok(path.to_string()),
        other => other,
    }
}

/// Builder for [`ProxyStore`].
///
/// A proxy needs a metadata backend and either one [`single`](Self::single)
/// store or one or more named [`backend`](Self::backend)s. [`OwnerBinding`]
/// is registered as a save hook by default.
#[derive(Debug)]
pub struct ProxyStoreBuilder {
    name: String,
    meta: Option<Arc<dyn MetadataBackend>>,
    single: Option<Arc<dyn ByteStore>>,
    backends: Vec<(String, Arc<dyn ByteStore>)>,
    fallback: bool,
    policy: Box<dyn NamePolicy>,
    hooks: Vec<Arc<dyn SaveHook>>,
}

impl ProxyStoreBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            meta: None,
            single: None,
            backends: Vec::new(),
            fallback: false,
            policy: Box::new(CounterSuffix),
            hooks: vec![Arc::new(OwnerBinding)],
        }
    }

    pub fn metadata(self, backend: impl MetadataBackend + 'static) -> Self {
        self.shared_metadata(Arc::new(backend))
    }

    pub fn shared_metadata(mut self, backend: Arc<dyn MetadataBackend>) -> Self {
        self.meta = Some(backend);
        self
    }

    /// Use one unnamed byte store.
    pub fn single(self, store: impl ByteStore + 'static) -> Self {
        self.shared_single(Arc::new(store))
    }

    pub fn shared_single(mut self, store: Arc<dyn ByteStore>) -> Self {
        self.single = Some(store);
        self
    }

    /// Add a named byte store. The first one added is the initial default.
    pub fn backend(self, name: impl Into<String>, store: impl ByteStore + 'static) -> Self {
        self.shared_backend(name, Arc::new(store))
    }

    pub fn shared_backend(mut self, name: impl Into<String>, store: Arc<dyn ByteStore>) -> Self {
        self.backends.push((name.into(), store));
        self
    }

    /// Fall back across named stores on errors they declare transient.
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback = enabled;
        self
    }

    pub fn name_policy(mut self, policy: impl NamePolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn hook(mut self, hook: impl SaveHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Remove all save hooks, including the default [`OwnerBinding`].
    pub fn clear_hooks(mut self) -> Self {
        self.hooks.clear();
        self
    }

    pub fn build(self) -> Result<ProxyStore> {
        if self.name.is_empty() {
            return Err(Error::Config("proxy name cannot be empty".into()));
        }
        let meta = self.meta.ok_or_else(|| {
            Error::Config(format!("proxy {} has no metadata backend", self.name))
        })?;

        let routing = match (self.single, self.backends.is_empty()) {
            (Some(_), false) => {
                return Err(Error::Config(format!(
                    "proxy {} mixes a single store with named stores",
                    self.name
                )));
            }
            (Some(_), true) if self.fallback => {
                return Err(Error::Config(format!(
                    "proxy {} needs named stores to fall back across",
                    self.name
                )));
            }
            (Some(store), true) => Routing::Single(store),
            (None, true) => {
                return Err(Error::Config(format!(
                    "proxy {} has no byte store",
                    self.name
                )));
            }
            (None, false) => {
                let router = MultiBackendRouter::new(self.backends)?;
                if self.fallback {
                    Routing::Fallback(FallbackRouter::new(router))
                } else {
                    Routing::Multi(router)
                }
            }
        };

        Ok(ProxyStore {
            name: self.name,
            meta,
            routing,
            policy: self.policy,
            hooks: self.hooks,
        })
    }
}
