use crate::path::suffixed;
use crate::{ByteReader, ByteStore, Error, Result};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt};

/// A local filesystem [`ByteStore`].
///
/// - Physical paths are *relative* object paths (e.g. `"foo/bar.txt"`) under a
///   configured root directory.
/// - Paths are validated to prevent directory traversal (`..`) and absolute paths.
/// - [`save`](ByteStore::save) never overwrites: a taken name gets a `_N`
///   suffix, claimed atomically with `create_new`.
/// - [`path`](ByteStore::path) reports the absolute filesystem path, so a
///   proxy's logical names mirror the on-disk layout.
#[derive(Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStore")
            .field("root", &self.root)
            .finish()
    }
}

impl LocalStore {
    /// Create a new local store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Return the configured root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn validate_id(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::Generic("id cannot be empty".into()));
        }

        let p = Path::new(id);

        if p.is_absolute() {
            return Err(Error::PermissionDenied(format!(
                "absolute paths are not allowed: {id}"
            )));
        }

        // Disallow traversal and tricky prefixes.
        for c in p.components() {
            match c {
                Component::ParentDir => {
                    return Err(Error::PermissionDenied(format!(
                        "parent dir components ('..') are not allowed: {id}"
                    )));
                }
                Component::Prefix(_) => {
                    // Windows drive prefixes like C:\
                    return Err(Error::PermissionDenied(format!(
                        "path prefixes are not allowed: {id}"
                    )));
                }
                Component::RootDir => {
                    return Err(Error::PermissionDenied(format!(
                        "root dir component is not allowed: {id}"
                    )));
                }
                Component::CurDir | Component::Normal(_) => {}
            }
        }

        Ok(())
    }

    fn path_for_id(&self, id: &str) -> Result<PathBuf> {
        Self::validate_id(id)?;
        Ok(self.root.join(id))
    }

    async fn ensure_parent_dir(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Claim the first free variant of `name`, returning its id and handle.
    async fn create_available(&self, name: &str) -> Result<(String, PathBuf, tokio::fs::File)> {
        let mut attempt = 0;
        loop {
            let id = suffixed(name, attempt);
            let path = self.path_for_id(&id)?;
            Self::ensure_parent_dir(&path).await?;

            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((id, path, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait::async_trait]
impl ByteStore for LocalStore {
    async fn open(&self, path: &str) -> Result<ByteReader> {
        let full = self.path_for_id(path)?;
        match tokio::fs::File::open(&full).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(
        &self,
        name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<String> {
        let (id, path, mut file) = self.create_available(name).await?;

        let written = async {
            tokio::io::copy(content, &mut file).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            // Do not leave a truncated object behind.
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }

        tracing::trace!(root = ?self.root, %id, "Wrote object");
        Ok(id)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.path_for_id(path)?;
        match tokio::fs::remove_file(full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.path_for_id(path)?;
        match tokio::fs::metadata(full).await {
            Ok(md) => Ok(md.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn path(&self, path: &str) -> Result<String> {
        let full = std::path::absolute(self.path_for_id(path)?)?;
        let s = full
            .to_str()
            .ok_or_else(|| Error::Generic("non-utf8 path under root".into()))?;
        Ok(s.replace('\\', "/"))
    }
}
