//! Metadata backends: where records linking logical paths to physical
//! locations are persisted.
//!
//! Two implementations share the [`MetadataBackend`] contract:
//!
//! - [`RelationalMetadataBackend`] - one SQLite row per record (feature `relational`)
//! - [`DocumentMetadataBackend`] - one JSON document per record in an embedded
//!   redb collection (feature `document`)
//!
//! Both report a missing record as [`Error::RecordNotFound`], a non-unique
//! path as [`Error::DuplicateKey`], and treat `update` and `delete` of an
//! unknown path as no-ops.
//!
//! [`Error::RecordNotFound`]: crate::Error::RecordNotFound
//! [`Error::DuplicateKey`]: crate::Error::DuplicateKey

use std::fmt::Debug;

use crate::Result;
use crate::record::{MetadataRecord, RecordData, RecordUpdate};

#[cfg(feature = "document")]
mod document;
#[cfg(feature = "relational")]
mod relational;

#[cfg(feature = "document")]
pub use document::DocumentMetadataBackend;
#[cfg(feature = "relational")]
pub use relational::RelationalMetadataBackend;

/// Persistent store of [`MetadataRecord`]s keyed by their unique logical path.
#[async_trait::async_trait]
pub trait MetadataBackend: Send + Sync + Debug {
    /// Backend type name, used in user-facing error messages.
    fn kind(&self) -> &'static str;

    /// Persist a new record. Fails with `DuplicateKey` if `data.path` is taken.
    async fn create(&self, data: RecordData) -> Result<MetadataRecord>;

    /// Fetch the record for `path`. Fails with `RecordNotFound` if absent.
    async fn get(&self, path: &str) -> Result<MetadataRecord>;

    /// Replace the named attributes of the record for `path`.
    ///
    /// A no-op if no record has that path. Renaming onto a taken path fails
    /// with `DuplicateKey` and leaves the record unchanged.
    async fn update(&self, path: &str, update: RecordUpdate) -> Result<()>;

    /// Remove the record for `path`, if any.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Whether a record for `path` exists.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Number of stored records.
    async fn count(&self) -> Result<u64>;
}
