//! A storage proxy that keeps files addressable by a stable logical path while
//! their bytes live in one of several pluggable byte stores.
//!
//! Every proxied file has a [`MetadataRecord`] in a [`MetadataBackend`] linking
//! its logical path to the physical path inside a [`ByteStore`]. The
//! [`ProxyStore`] is the only writer of that metadata: it writes content before
//! creating the matching record and deletes content before removing it.
//!
//! ```
//! # #[cfg(all(feature = "memory", feature = "document"))]
//! # async fn example() -> proxy_storage::Result<()> {
//! use proxy_storage::{MemoryStore, ProxyStore};
//! use proxy_storage::meta::DocumentMetadataBackend;
//!
//! let store = ProxyStore::builder("media")
//!     .metadata(DocumentMetadataBackend::in_memory("proxy_records")?)
//!     .single(MemoryStore::new())
//!     .build()?;
//!
//! let path = store.save_bytes("hello.txt", b"hello").await?;
//! assert_eq!(path, "/hello.txt");
//! assert_eq!(store.read_bytes(&path).await?, b"hello");
//! # Ok(())
//! # }
//! ```

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

#[cfg(feature = "local")]
pub use adapters::local::LocalStore;
#[cfg(feature = "memory")]
pub use adapters::memory::MemoryStore;

pub use adapters::multi;
pub use adapters::multi::{FallbackOn, FallbackRouter, MultiBackendRouter};
pub use config::ProxyStorageSettings;
pub use meta::MetadataBackend;
pub use path::{CounterSuffix, NamePolicy, clean_path};
pub use proxy::{OwnerBinding, ProxyStore, ProxyStoreBuilder, Routing, SaveHook, SaveOptions};
pub use record::{Attributes, MetadataRecord, Owner, RecordData, RecordId, RecordUpdate};
pub use registry::{ProxyRegistry, ProxyRegistryBuilder};

pub mod config;
pub mod meta;
pub mod path;
pub mod proxy;
pub mod record;
pub mod registry;

/// A specialized Result type for proxy storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A boxed reader over the content of one stored object.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// A unified Error type for proxy, byte store and metadata operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("No such {backend} object with path: {path}")]
    NoSuchObject { backend: &'static str, path: String },

    #[error("{0}")]
    RecordNotFound(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Storage backend connection error")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("IO Error")]
    Io(#[from] std::io::Error),

    #[error("Metadata backend error")]
    Metadata(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Record serialization error")]
    Serialization(#[from] serde_json::Error),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Generic storage error: {0}")]
    Generic(String),
}

impl Error {
    /// The category of this error, used to match fallback declarations.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) | Error::NoSuchObject { .. } => ErrorKind::NotFound,
            Error::RecordNotFound(_) => ErrorKind::RecordNotFound,
            Error::DuplicateKey(_) => ErrorKind::DuplicateKey,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::Connection(_) => ErrorKind::Connection,
            Error::Io(_) => ErrorKind::Io,
            Error::Metadata(_) => ErrorKind::Metadata,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::NotImplemented(_) => ErrorKind::NotImplemented,
            Error::Config(_) => ErrorKind::Config,
            Error::Generic(_) => ErrorKind::Generic,
        }
    }
}

/// Fieldless mirror of [`Error`] variants.
///
/// Byte stores declare which kinds are transient through [`FallbackErrors`];
/// settings files name them in `snake_case` (`"io"`, `"connection"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    RecordNotFound,
    DuplicateKey,
    PermissionDenied,
    Connection,
    Io,
    Metadata,
    Serialization,
    NotImplemented,
    Config,
    Generic,
}

/// Adapter modules, gated behind Cargo features.
pub mod adapters {
    #[cfg(feature = "local")]
    pub mod local;
    #[cfg(feature = "memory")]
    pub mod memory;
    pub mod multi;
}

/// Optional capability: the error kinds after which a write may be retried on
/// the next configured byte store.
pub trait FallbackErrors: Send + Sync {
    /// Kinds that are safe to fall back from.
    fn fallback_error_kinds(&self) -> &[ErrorKind];

    /// Whether `err` is one of the declared kinds.
    fn is_fallback_error(&self, err: &Error) -> bool {
        self.fallback_error_kinds().contains(&err.kind())
    }
}

/// The byte storage capability a proxy delegates content I/O to.
///
/// Objects are addressed by a physical path chosen by the store itself:
/// [`save`](Self::save) may rename to avoid overwriting existing content and
/// returns the path it actually used.
#[async_trait::async_trait]
pub trait ByteStore: Send + Sync + Debug {
    /// Open the object at `path` for reading.
    async fn open(&self, path: &str) -> Result<ByteReader>;

    /// Store `content` under `name` or an available variant of it.
    async fn save(&self, name: &str, content: &mut (dyn AsyncRead + Send + Unpin))
    -> Result<String>;

    /// Delete an object. Idempotent (returns `Ok(())` if already deleted).
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if an object exists.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Canonical full path of `path`, for stores that can express one.
    fn path(&self, path: &str) -> Result<String> {
        Err(Error::NotImplemented(format!(
            "this store does not expose full paths (requested {path})"
        )))
    }

    /// The fallback capability, if this store declares one.
    fn fallback_errors(&self) -> Option<&dyn FallbackErrors> {
        None
    }
}

/// Convenience methods built on [`ByteStore`].
pub trait ByteStoreExt: ByteStore {
    /// Save a byte slice and return the physical path used.
    fn save_bytes(
        &self,
        name: &str,
        bytes: &[u8],
    ) -> impl std::future::Future<Output = Result<String>> + Send {
        async move {
            let mut reader = std::io::Cursor::new(bytes);
            self.save(name, &mut reader).await
        }
    }

    /// Read a whole object into memory.
    fn read_bytes(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send {
        async move {
            let mut reader = self.open(path).await?;
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await?;
            Ok(buf)
        }
    }
}

impl<T: ByteStore + ?Sized> ByteStoreExt for T {}
