use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};

use super::MetadataBackend;
use crate::record::{MetadataRecord, RecordData, RecordId, RecordUpdate};
use crate::{Error, Result};

const COLUMNS: &str =
    "id, path, original_storage_path, proxy_storage_name, original_storage_name, attributes";

/// Metadata backend storing one SQLite row per record.
///
/// `path` carries a `UNIQUE` constraint; violations surface as
/// [`Error::DuplicateKey`]. Extension attributes are kept as a JSON text
/// column so any set of them round-trips.
///
/// ```
/// # async fn example() -> proxy_storage::Result<()> {
/// use proxy_storage::meta::RelationalMetadataBackend;
/// use proxy_storage::{MetadataBackend, RecordData};
///
/// let backend = RelationalMetadataBackend::in_memory("proxy_records").await?;
/// backend.create(RecordData::new("/hello.txt", "hello.txt")).await?;
/// assert!(backend.exists("/hello.txt").await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RelationalMetadataBackend {
    pool: Pool<Sqlite>,
    table: String,
}

impl RelationalMetadataBackend {
    /// Connect to the database at `url` (e.g. `sqlite://meta.db`) and make
    /// sure `table` exists.
    pub async fn connect(url: &str, table: impl Into<String>) -> Result<Self> {
        let table = validate_table_name(table.into())?;

        let opts = SqliteConnectOptions::from_str(url)
            .map_err(db_error)?
            .create_if_missing(true);

        // A single long-lived connection: SQLite serialises writers anyway,
        // and `:memory:` databases exist per connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(db_error)?;

        let backend = Self { pool, table };
        backend.migrate().await?;
        Ok(backend)
    }

    /// A private in-memory database.
    pub async fn in_memory(table: impl Into<String>) -> Result<Self> {
        Self::connect("sqlite::memory:", table).await
    }

    /// Use an existing pool. Call [`migrate`](Self::migrate) before first use.
    pub fn from_pool(pool: Pool<Sqlite>, table: impl Into<String>) -> Result<Self> {
        Ok(Self {
            pool,
            table: validate_table_name(table.into())?,
        })
    }

    /// Create the records table if it does not exist.
    pub async fn migrate(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL UNIQUE,
                original_storage_path TEXT NOT NULL DEFAULT '',
                proxy_storage_name TEXT NOT NULL DEFAULT '',
                original_storage_name TEXT,
                attributes TEXT NOT NULL DEFAULT '{{}}'
            )",
            self.table
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    /// Name of the records table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    fn not_found(&self) -> Error {
        Error::RecordNotFound(format!("{} matching query does not exist.", self.table))
    }

    fn write_error(&self, err: sqlx::Error, path: &str) -> Error {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return Error::DuplicateKey(format!(
                    "path {path} already exists in {}",
                    self.table
                ));
            }
        }
        db_error(err)
    }
}

#[async_trait::async_trait]
impl MetadataBackend for RelationalMetadataBackend {
    fn kind(&self) -> &'static str {
        "RelationalMetadataBackend"
    }

    async fn create(&self, data: RecordData) -> Result<MetadataRecord> {
        let attributes = serde_json::to_string(&data.attributes)?;
        let sql = format!(
            "INSERT INTO {} (path, original_storage_path, proxy_storage_name, original_storage_name, attributes)
             VALUES (?, ?, ?, ?, ?)",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(&data.path)
            .bind(&data.original_storage_path)
            .bind(&data.proxy_storage_name)
            .bind(data.original_storage_name.as_deref())
            .bind(&attributes)
            .execute(&self.pool)
            .await
            .map_err(|e| self.write_error(e, &data.path))?;

        Ok(MetadataRecord::from_data(
            RecordId::Row(result.last_insert_rowid()),
            data,
        ))
    }

    async fn get(&self, path: &str) -> Result<MetadataRecord> {
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE path = ?", self.table);
        let row = sqlx::query(&sql)
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        match row {
            Some(row) => record_from_row(&row),
            None => Err(self.not_found()),
        }
    }

    async fn update(&self, path: &str, update: RecordUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        let select = format!("SELECT {COLUMNS} FROM {} WHERE path = ?", self.table);
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let Some(row) = sqlx::query(&select)
            .bind(path)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
        else {
            tx.rollback().await.map_err(db_error)?;
            return Ok(());
        };

        let id: i64 = row.try_get("id").map_err(db_error)?;
        let mut data = record_from_row(&row)?.into_data();
        update.apply_to(&mut data);

        let attributes = serde_json::to_string(&data.attributes)?;
        let sql = format!(
            "UPDATE {} SET path = ?, original_storage_path = ?, proxy_storage_name = ?,
                 original_storage_name = ?, attributes = ?
             WHERE id = ?",
            self.table
        );
        sqlx::query(&sql)
            .bind(&data.path)
            .bind(&data.original_storage_path)
            .bind(&data.proxy_storage_name)
            .bind(data.original_storage_name.as_deref())
            .bind(&attributes)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| self.write_error(e, &data.path))?;

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE path = ?", self.table);
        sqlx::query(&sql)
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE path = ?", self.table);
        let n: i64 = sqlx::query_scalar(&sql)
            .bind(path)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(n > 0)
    }

    async fn count(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let n: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(n as u64)
    }
}

fn db_error(err: sqlx::Error) -> Error {
    Error::Metadata(Box::new(err))
}

fn record_from_row(row: &SqliteRow) -> Result<MetadataRecord> {
    let attributes: String = row.try_get("attributes").map_err(db_error)?;
    Ok(MetadataRecord {
        id: RecordId::Row(row.try_get("id").map_err(db_error)?),
        path: row.try_get("path").map_err(db_error)?,
        original_storage_path: row.try_get("original_storage_path").map_err(db_error)?,
        proxy_storage_name: row.try_get("proxy_storage_name").map_err(db_error)?,
        original_storage_name: row.try_get("original_storage_name").map_err(db_error)?,
        attributes: serde_json::from_str(&attributes)?,
    })
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_table_name(table: String) -> Result<String> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(table)
    } else {
        Err(Error::Config(format!("invalid table name: {table:?}")))
    }
}
