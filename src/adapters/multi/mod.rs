//! Multi-store routing: an ordered set of named byte stores and the logic
//! deciding which one receives a write.
//!
//! # Available Patterns
//!
//! - [`MultiBackendRouter`] - writes go to the current default store, or to a
//!   store named per call with `using`
//! - [`FallbackRouter`] - like the above, but a write failing with an error its
//!   store declares transient is retried on the next store, and the store that
//!   finally succeeds becomes the default
//!
//! Routers are plugged into a [`ProxyStore`](crate::ProxyStore) through
//! [`Routing`](crate::Routing). Records written through a router carry
//! `original_storage_name`, so reads and deletes go to the right store even
//! after the default changes.
//!
//! # Examples
//!
//! ```
//! # #[cfg(all(feature = "memory", feature = "document"))]
//! # async fn example() -> proxy_storage::Result<()> {
//! use proxy_storage::{ErrorKind, FallbackOn, MemoryStore, ProxyStore};
//! use proxy_storage::meta::DocumentMetadataBackend;
//!
//! let store = ProxyStore::builder("media")
//!     .metadata(DocumentMetadataBackend::in_memory("proxy_records")?)
//!     .backend("fast", FallbackOn::new(MemoryStore::new(), [ErrorKind::Io]))
//!     .backend("spare", MemoryStore::new())
//!     .with_fallback(true)
//!     .build()?;
//!
//! let path = store.save_bytes("hello.txt", b"hello").await?;
//! let record = store.metadata().get(&path).await?;
//! assert_eq!(record.original_storage_name.as_deref(), Some("fast"));
//! # Ok(())
//! # }
//! ```

mod fallback;

pub use fallback::{FallbackOn, FallbackRouter};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::AsyncRead;

use crate::record::MetadataRecord;
use crate::{ByteStore, Error, Result};

/// Outcome of a routed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    /// Physical path the store used.
    pub path: String,
    /// Name of the store that took the write, when stores are named.
    pub backend: Option<String>,
}

/// An ordered set of named byte stores with a movable default.
///
/// The first store is the initial default. The default pointer is shared
/// mutable state: [`set_default`](Self::set_default) and fallback promotion
/// change it for every caller of this router. A write naming a store with
/// `using` goes to that store only and leaves the default where it was.
#[derive(Debug)]
pub struct MultiBackendRouter {
    backends: Vec<(String, Arc<dyn ByteStore>)>,
    default: AtomicUsize,
}

impl MultiBackendRouter {
    /// Create a router over `backends`, in priority order.
    ///
    /// Fails if the set is empty or a name repeats.
    pub fn new(backends: Vec<(String, Arc<dyn ByteStore>)>) -> Result<Self> {
        if backends.is_empty() {
            return Err(Error::Config(
                "a multi-backend router needs at least one byte store".into(),
            ));
        }
        for (i, (name, _)) in backends.iter().enumerate() {
            if backends[..i].iter().any(|(other, _)| other == name) {
                return Err(Error::Config(format!("duplicate byte store name: {name}")));
            }
        }
        Ok(Self {
            backends,
            default: AtomicUsize::new(0),
        })
    }

    /// Number of configured stores.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Always false: a router holds at least one store.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Store names in priority order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.backends.iter().map(|(name, _)| name.as_str())
    }

    /// Look up a store by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ByteStore>> {
        self.backends
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, store)| store)
    }

    /// Name of the current default store.
    pub fn default_name(&self) -> &str {
        &self.backends[self.default_index()].0
    }

    /// The current default store.
    pub fn default_store(&self) -> &Arc<dyn ByteStore> {
        &self.backends[self.default_index()].1
    }

    /// Make the store called `name` the default for later writes.
    pub fn set_default(&self, name: &str) -> Result<()> {
        let index = self.index_of(name)?;
        self.promote(index);
        Ok(())
    }

    /// The store holding `record`'s content, or the default without a record.
    ///
    /// Records lacking `original_storage_name` resolve to the default store.
    pub fn resolve(&self, record: Option<&MetadataRecord>) -> Result<&Arc<dyn ByteStore>> {
        match record.and_then(|r| r.original_storage_name.as_deref()) {
            Some(name) => self.get(name).ok_or_else(|| unknown_backend(name)),
            None => Ok(self.default_store()),
        }
    }

    /// The write target: the store named by `using`, or the default.
    pub fn target(&self, using: Option<&str>) -> Result<(&str, &Arc<dyn ByteStore>)> {
        let index = match using {
            Some(name) => self.index_of(name)?,
            None => self.default_index(),
        };
        let (name, store) = &self.backends[index];
        Ok((name.as_str(), store))
    }

    /// Write `content` to the target store. `using` does not move the default.
    pub async fn write(
        &self,
        name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
        using: Option<&str>,
    ) -> Result<Written> {
        let (backend, store) = self.target(using)?;
        let path = store.save(name, content).await?;
        Ok(Written {
            path,
            backend: Some(backend.to_string()),
        })
    }

    pub(crate) fn index_of(&self, name: &str) -> Result<usize> {
        self.backends
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| unknown_backend(name))
    }

    pub(crate) fn entry(&self, index: usize) -> (&str, &Arc<dyn ByteStore>) {
        let (name, store) = &self.backends[index];
        (name.as_str(), store)
    }

    pub(crate) fn promote(&self, index: usize) {
        let previous = self.default.swap(index, Ordering::AcqRel);
        if previous != index {
            tracing::info!(
                from = %self.backends[previous].0,
                to = %self.backends[index].0,
                "Default byte store changed"
            );
        }
    }

    fn default_index(&self) -> usize {
        self.default.load(Ordering::Acquire)
    }
}

fn unknown_backend(name: &str) -> Error {
    Error::Config(format!("unknown byte store: {name}"))
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn router() -> MultiBackendRouter {
        MultiBackendRouter::new(vec![
            ("one".to_string(), Arc::new(MemoryStore::new()) as Arc<dyn ByteStore>),
            ("two".to_string(), Arc::new(MemoryStore::new()) as Arc<dyn ByteStore>),
        ])
        .unwrap()
    }

    #[test]
    fn test_first_store_is_default() {
        let router = router();
        assert_eq!(router.default_name(), "one");
        assert_eq!(router.names().collect::<Vec<_>>(), vec!["one", "two"]);
    }

    #[test]
    fn test_set_default() {
        let router = router();
        router.set_default("two").unwrap();
        assert_eq!(router.default_name(), "two");
        assert!(matches!(router.set_default("three"), Err(Error::Config(_))));
        assert_eq!(router.default_name(), "two");
    }

    #[test]
    fn test_target_does_not_move_default() {
        let router = router();
        let (name, _) = router.target(Some("two")).unwrap();
        assert_eq!(name, "two");
        assert_eq!(router.default_name(), "one");
    }

    #[test]
    fn test_rejects_empty_and_duplicates() {
        assert!(matches!(MultiBackendRouter::new(vec![]), Err(Error::Config(_))));
        let store: Arc<dyn ByteStore> = Arc::new(MemoryStore::new());
        let result = MultiBackendRouter::new(vec![
            ("a".to_string(), store.clone()),
            ("a".to_string(), store),
        ]);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
