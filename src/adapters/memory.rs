use crate::path::suffixed;
use crate::{ByteReader, ByteStore, Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::sync::{Arc, RwLock};
use tokio::io::{AsyncRead, AsyncReadExt};

/// A simple in-memory [`ByteStore`].
///
/// - Physical paths are the names given to [`save`](ByteStore::save); a taken
///   name gets a `_N` suffix instead of being overwritten.
/// - Cannot report full paths, so a proxy uses the physical path verbatim
///   when deriving logical names.
/// - Intended for tests, local development, and ephemeral usage.
///
/// Clones share the same contents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory store from an existing map.
    pub fn from_map(map: HashMap<String, Vec<u8>>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Returns the number of stored objects.
    pub fn len(&self) -> usize {
        self.inner.read().expect("poisoned lock").len()
    }

    /// Returns true if there are no stored objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all objects.
    pub fn clear(&self) {
        self.inner.write().expect("poisoned lock").clear();
    }

    /// Get a copy of the bytes at `path` (useful for tests).
    pub fn get(&self, path: &str) -> Result<Vec<u8>> {
        let map = self.inner.read().expect("poisoned lock");
        map.get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    /// Sorted list of stored paths.
    pub fn paths(&self) -> Vec<String> {
        let map = self.inner.read().expect("poisoned lock");
        let mut paths: Vec<String> = map.keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Avoid dumping potentially large in-memory contents.
        f.debug_struct("MemoryStore")
            .field("len", &self.len())
            .finish()
    }
}

#[async_trait::async_trait]
impl ByteStore for MemoryStore {
    async fn open(&self, path: &str) -> Result<ByteReader> {
        let bytes = self.get(path)?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    async fn save(
        &self,
        name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<String> {
        if name.is_empty() {
            return Err(Error::Generic("name cannot be empty".into()));
        }

        let mut buf = Vec::new();
        content.read_to_end(&mut buf).await?;

        let mut map = self.inner.write().expect("poisoned lock");
        let mut attempt = 0;
        let path = loop {
            let candidate = suffixed(name, attempt);
            if !map.contains_key(&candidate) {
                break candidate;
            }
            attempt += 1;
        };
        map.insert(path.clone(), buf);
        Ok(path)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut map = self.inner.write().expect("poisoned lock");
        map.remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let map = self.inner.read().expect("poisoned lock");
        Ok(map.contains_key(path))
    }
}
