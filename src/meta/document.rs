use std::fmt;
use std::path::Path;

use redb::backends::InMemoryBackend;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::MetadataBackend;
use crate::record::{MetadataRecord, RecordData, RecordId, RecordUpdate};
use crate::{Error, Result};

impl From<redb::DatabaseError> for Error {
    fn from(e: redb::DatabaseError) -> Self {
        Error::Metadata(Box::new(e))
    }
}

impl From<redb::TransactionError> for Error {
    fn from(e: redb::TransactionError) -> Self {
        Error::Metadata(Box::new(e))
    }
}

impl From<redb::TableError> for Error {
    fn from(e: redb::TableError) -> Self {
        Error::Metadata(Box::new(e))
    }
}

impl From<redb::StorageError> for Error {
    fn from(e: redb::StorageError) -> Self {
        Error::Metadata(Box::new(e))
    }
}

impl From<redb::CommitError> for Error {
    fn from(e: redb::CommitError) -> Self {
        Error::Metadata(Box::new(e))
    }
}

/// The stored form of a record: its data plus the document id.
#[derive(Serialize, Deserialize)]
struct Document {
    #[serde(rename = "_id")]
    id: String,
    #[serde(flatten)]
    data: RecordData,
}

impl Document {
    fn into_record(self) -> MetadataRecord {
        MetadataRecord::from_data(RecordId::Document(self.id), self.data)
    }
}

/// Metadata backend storing one JSON document per record in a named
/// collection of an embedded redb database.
///
/// Documents are keyed by a generated `_id`. Uniqueness of `path` is enforced
/// by a path index table, created on the first `create`; until then the
/// collection reads as empty.
///
/// Each operation runs in a single redb transaction, so the index and the
/// documents never disagree.
pub struct DocumentMetadataBackend {
    db: Database,
    collection: String,
    index: String,
}

impl fmt::Debug for DocumentMetadataBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentMetadataBackend")
            .field("collection", &self.collection)
            .finish()
    }
}

impl DocumentMetadataBackend {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>, collection: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_database(Database::create(path)?, collection.into())
    }

    /// A private in-memory database.
    pub fn in_memory(collection: impl Into<String>) -> Result<Self> {
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::with_database(db, collection.into())
    }

    fn with_database(db: Database, collection: String) -> Result<Self> {
        if collection.is_empty() {
            return Err(Error::Config("collection name cannot be empty".into()));
        }
        let index = format!("{collection}.path_index");
        Ok(Self {
            db,
            collection,
            index,
        })
    }

    /// Name of the collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn documents(&self) -> TableDefinition<'_, &'static str, &'static [u8]> {
        TableDefinition::new(&self.collection)
    }

    fn path_index(&self) -> TableDefinition<'_, &'static str, &'static str> {
        TableDefinition::new(&self.index)
    }

    fn not_found(&self) -> Error {
        Error::RecordNotFound(format!(
            "Could not find document in \"{}\"",
            self.collection
        ))
    }

    fn duplicate(&self, path: &str) -> Error {
        Error::DuplicateKey(format!(
            "path {path} already exists in collection \"{}\"",
            self.collection
        ))
    }

    fn find(&self, path: &str) -> Result<Option<Document>> {
        let read_txn = self.db.begin_read()?;
        let index = match read_txn.open_table(self.path_index()) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let Some(id) = index.get(path)?.map(|guard| guard.value().to_string()) else {
            return Ok(None);
        };

        let documents = read_txn.open_table(self.documents())?;
        let bytes = documents
            .get(id.as_str())?
            .map(|guard| guard.value().to_vec())
            .ok_or_else(|| {
                Error::Generic(format!(
                    "path index of \"{}\" points at missing document {id}",
                    self.collection
                ))
            })?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

#[async_trait::async_trait]
impl MetadataBackend for DocumentMetadataBackend {
    fn kind(&self) -> &'static str {
        "DocumentMetadataBackend"
    }

    async fn create(&self, data: RecordData) -> Result<MetadataRecord> {
        let document = Document {
            id: Uuid::new_v4().simple().to_string(),
            data,
        };
        let bytes = serde_json::to_vec(&document)?;

        let write_txn = self.db.begin_write()?;
        let inserted = {
            // Opening the index for writing creates it on first use.
            let mut index = write_txn.open_table(self.path_index())?;
            let taken = index.get(document.data.path.as_str())?.is_some();
            if taken {
                false
            } else {
                let mut documents = write_txn.open_table(self.documents())?;
                documents.insert(document.id.as_str(), bytes.as_slice())?;
                index.insert(document.data.path.as_str(), document.id.as_str())?;
                true
            }
        };

        if !inserted {
            write_txn.abort()?;
            return Err(self.duplicate(&document.data.path));
        }
        write_txn.commit()?;

        tracing::trace!(collection = %self.collection, id = %document.id, "Inserted document");
        Ok(document.into_record())
    }

    async fn get(&self, path: &str) -> Result<MetadataRecord> {
        self.find(path)?
            .map(Document::into_record)
            .ok_or_else(|| self.not_found())
    }

    async fn update(&self, path: &str, update: RecordUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        // A missing path aborts, so no table is created by an update.
        let write_txn = self.db.begin_write()?;
        let outcome = (|| -> Result<bool> {
            let mut index = write_txn.open_table(self.path_index())?;
            let mut documents = write_txn.open_table(self.documents())?;

            let Some(id) = index.get(path)?.map(|guard| guard.value().to_string()) else {
                return Ok(false);
            };
            let Some(bytes) = documents
                .get(id.as_str())?
                .map(|guard| guard.value().to_vec())
            else {
                return Ok(false);
            };

            let mut document: Document = serde_json::from_slice(&bytes)?;
            update.apply_to(&mut document.data);

            if document.data.path != path {
                if index.get(document.data.path.as_str())?.is_some() {
                    return Err(self.duplicate(&document.data.path));
                }
                index.remove(path)?;
                index.insert(document.data.path.as_str(), id.as_str())?;
            }

            let bytes = serde_json::to_vec(&document)?;
            documents.insert(id.as_str(), bytes.as_slice())?;
            Ok(true)
        })();

        match outcome {
            Ok(true) => write_txn.commit()?,
            Ok(false) => write_txn.abort()?,
            Err(e) => {
                write_txn.abort()?;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut index = write_txn.open_table(self.path_index())?;
            let removed = index.remove(path)?.map(|guard| guard.value().to_string());
            if let Some(id) = &removed {
                let mut documents = write_txn.open_table(self.documents())?;
                documents.remove(id.as_str())?;
            }
            removed
        };

        if removed.is_some() {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let read_txn = self.db.begin_read()?;
        let index = match read_txn.open_table(self.path_index()) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        Ok(index.get(path)?.is_some())
    }

    async fn count(&self) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        match read_txn.open_table(self.documents()) {
            Ok(table) => Ok(table.len()?),
            Err(TableError::TableDoesNotExist(_)) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}
