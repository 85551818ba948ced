use super::{MultiBackendRouter, Written};
use crate::{ByteReader, ByteStore, Error, ErrorKind, FallbackErrors, Result};
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A [`MultiBackendRouter`] that survives failing stores on write.
///
/// Stores are tried in priority order. A failure whose kind the store declares
/// through [`FallbackErrors`] moves on to the next store; any other failure,
/// or any failure of a store that declares nothing, is returned as is. When
/// every store fails with a declared error, the error of the last attempt is
/// returned. The store that accepts the write becomes the default.
///
/// Naming a store with `using` pins the write to it: no fallback happens and
/// the default does not move, even when the write succeeds. Use
/// [`MultiBackendRouter::set_default`] to switch the default explicitly.
///
/// Content is read into memory once so every attempt starts from the
/// beginning.
#[derive(Debug)]
pub struct FallbackRouter {
    inner: MultiBackendRouter,
}

impl FallbackRouter {
    pub fn new(inner: MultiBackendRouter) -> Self {
        Self { inner }
    }

    /// The underlying ordered store set.
    pub fn router(&self) -> &MultiBackendRouter {
        &self.inner
    }

    /// Write `content`, falling back across stores as described above.
    pub async fn write(
        &self,
        name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
        using: Option<&str>,
    ) -> Result<Written> {
        if using.is_some() {
            return self.inner.write(name, content, using).await;
        }

        let mut buffer = Vec::new();
        content.read_to_end(&mut buffer).await?;

        let mut latest: Option<Error> = None;
        for index in 0..self.inner.len() {
            let (backend, store) = self.inner.entry(index);
            let mut reader = Cursor::new(buffer.as_slice());

            match store.save(name, &mut reader).await {
                Ok(path) => {
                    self.inner.promote(index);
                    return Ok(Written {
                        path,
                        backend: Some(backend.to_string()),
                    });
                }
                Err(e) if is_fallback_error(store.as_ref(), &e) => {
                    tracing::warn!(
                        %name,
                        backend,
                        error = ?e,
                        "Write failed with a fallback error, trying next byte store"
                    );
                    latest = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let err = latest.unwrap_or_else(|| Error::Config("no byte stores configured".into()));
        tracing::warn!(%name, error = ?err, "Every byte store rejected the write");
        Err(err)
    }
}

fn is_fallback_error(store: &dyn ByteStore, err: &Error) -> bool {
    store
        .fallback_errors()
        .is_some_and(|declared| declared.is_fallback_error(err))
}

/// Wraps any byte store and declares which of its error kinds are transient.
///
/// ```
/// # #[cfg(feature = "memory")]
/// # {
/// use proxy_storage::{ByteStore, ErrorKind, FallbackOn, MemoryStore};
///
/// let store = FallbackOn::new(MemoryStore::new(), [ErrorKind::Io, ErrorKind::Connection]);
/// assert!(store.fallback_errors().is_some());
/// # }
/// ```
#[derive(Debug)]
pub struct FallbackOn<S: ByteStore> {
    inner: S,
    kinds: Vec<ErrorKind>,
}

impl<S: ByteStore> FallbackOn<S> {
    /// Declare `kinds` as fallback-eligible errors of `store`.
    pub fn new(store: S, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self {
            inner: store,
            kinds: kinds.into_iter().collect(),
        }
    }

    /// Get a reference to the inner store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwrap and return the inner store.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: ByteStore> FallbackErrors for FallbackOn<S> {
    fn fallback_error_kinds(&self) -> &[ErrorKind] {
        &self.kinds
    }
}

#[async_trait::async_trait]
impl<S: ByteStore> ByteStore for FallbackOn<S> {
    async fn open(&self, path: &str) -> Result<ByteReader> {
        self.inner.open(path).await
    }

    async fn save(
        &self,
        name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<String> {
        self.inner.save(name, content).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.inner.delete(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(path).await
    }

    fn path(&self, path: &str) -> Result<String> {
        self.inner.path(path)
    }

    fn fallback_errors(&self) -> Option<&dyn FallbackErrors> {
        Some(self)
    }
}
