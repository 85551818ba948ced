//! Common test utilities and reusable test suites.
//!
//! - `metadata_backend_suite!` generates the shared contract tests for a
//!   [`MetadataBackend`] implementation.
//! - `proxy_store_suite!` generates the save/open/delete protocol tests for a
//!   [`ProxyStore`] over a single in-memory byte store.
//!
//! Both take a name for the generated module and an async `setup` expression.

#![allow(dead_code, unused_macros)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use proxy_storage::{
    ByteReader, ByteStore, ByteStoreExt, Error, MemoryStore, MetadataBackend, Owner, ProxyStore,
    RecordData, RecordUpdate, Result, SaveOptions,
};
use serde_json::json;
use tokio::io::AsyncRead;

/// Macro to generate the [`MetadataBackend`] contract tests.
///
/// # Usage
///
/// ```ignore
/// metadata_backend_suite!(
///     relational,
///     setup = async { RelationalMetadataBackend::in_memory("proxy_records").await.unwrap() }
/// );
/// ```
macro_rules! metadata_backend_suite {
    ($name:ident, setup = $setup:expr) => {
        mod $name {
            use super::*;

            #[tokio::test]
            async fn test_create_and_get() {
                let backend = $setup.await;
                test_common::run_create_and_get(&backend).await;
            }

            #[tokio::test]
            async fn test_duplicate_path_rejected() {
                let backend = $setup.await;
                test_common::run_duplicate_path_rejected(&backend).await;
            }

            #[tokio::test]
            async fn test_get_missing() {
                let backend = $setup.await;
                test_common::run_get_missing(&backend).await;
            }

            #[tokio::test]
            async fn test_update_replaces_named_attributes() {
                let backend = $setup.await;
                test_common::run_update_replaces_named_attributes(&backend).await;
            }

            #[tokio::test]
            async fn test_update_missing_is_noop() {
                let backend = $setup.await;
                test_common::run_update_missing_is_noop(&backend).await;
            }

            #[tokio::test]
            async fn test_update_renames() {
                let backend = $setup.await;
                test_common::run_update_renames(&backend).await;
            }

            #[tokio::test]
            async fn test_rename_onto_taken_path() {
                let backend = $setup.await;
                test_common::run_rename_onto_taken_path(&backend).await;
            }

            #[tokio::test]
            async fn test_delete_and_exists() {
                let backend = $setup.await;
                test_common::run_delete_and_exists(&backend).await;
            }

            #[tokio::test]
            async fn test_records_are_independent() {
                let backend = $setup.await;
                test_common::run_records_are_independent(&backend).await;
            }

            #[tokio::test]
            async fn test_original_storage_name_round_trips() {
                let backend = $setup.await;
                test_common::run_original_storage_name_round_trips(&backend).await;
            }
        }
    };
}

/// Macro to generate the [`ProxyStore`] protocol tests.
///
/// The setup expression must produce a proxy over a single empty byte store.
macro_rules! proxy_store_suite {
    ($name:ident, setup = $setup:expr) => {
        mod $name {
            use super::*;

            #[tokio::test]
            async fn test_round_trip() {
                let store = $setup.await;
                test_common::run_round_trip(&store).await;
            }

            #[tokio::test]
            async fn test_empty_content() {
                let store = $setup.await;
                test_common::run_empty_content(&store).await;
            }

            #[tokio::test]
            async fn test_collision_naming() {
                let store = $setup.await;
                test_common::run_collision_naming(&store).await;
            }

            #[tokio::test]
            async fn test_adoption_collision_naming() {
                let store = $setup.await;
                test_common::run_adoption_collision_naming(&store).await;
            }

            #[tokio::test]
            async fn test_uniqueness() {
                let store = $setup.await;
                test_common::run_uniqueness(&store).await;
            }

            #[tokio::test]
            async fn test_record_fields() {
                let store = $setup.await;
                test_common::run_record_fields(&store).await;
            }

            #[tokio::test]
            async fn test_open_missing() {
                let store = $setup.await;
                test_common::run_open_missing(&store).await;
            }

            #[tokio::test]
            async fn test_delete_missing() {
                let store = $setup.await;
                test_common::run_delete_missing(&store).await;
            }

            #[tokio::test]
            async fn test_delete_removes_content_and_record() {
                let store = $setup.await;
                test_common::run_delete_removes_content_and_record(&store).await;
            }

            #[tokio::test]
            async fn test_exists_is_metadata_authoritative() {
                let store = $setup.await;
                test_common::run_exists_is_metadata_authoritative(&store).await;
            }

            #[tokio::test]
            async fn test_rename_then_open() {
                let store = $setup.await;
                test_common::run_rename_then_open(&store).await;
            }

            #[tokio::test]
            async fn test_owner_binding() {
                let store = $setup.await;
                test_common::run_owner_binding(&store).await;
            }
        }
    };
}

/// Install a subscriber honouring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Metadata backend contract

fn sample(path: &str) -> RecordData {
    RecordData::new(path, "world.txt")
        .with_proxy_storage_name("media")
        .with_attribute("some_attr", "some attr value")
        .with_attribute("nested", json!({"a": 1, "b": [1, 2]}))
}

pub async fn run_create_and_get(backend: &dyn MetadataBackend) {
    let created = backend.create(sample("/hello/world.txt")).await.unwrap();
    let fetched = backend.get("/hello/world.txt").await.unwrap();

    assert_eq!(fetched, created);
    assert_eq!(fetched.path, "/hello/world.txt");
    assert_eq!(fetched.original_storage_path, "world.txt");
    assert_eq!(fetched.proxy_storage_name, "media");
    assert_eq!(fetched.original_storage_name, None);
    assert_eq!(fetched.attribute("some_attr"), Some(&json!("some attr value")));
    assert_eq!(fetched.attribute("nested"), Some(&json!({"a": 1, "b": [1, 2]})));
    assert_eq!(backend.count().await.unwrap(), 1);
}

pub async fn run_duplicate_path_rejected(backend: &dyn MetadataBackend) {
    backend.create(sample("/a.txt")).await.unwrap();
    let err = backend.create(sample("/a.txt")).await.unwrap_err();

    assert!(matches!(err, Error::DuplicateKey(_)), "got {err:?}");
    assert_eq!(backend.count().await.unwrap(), 1);
}

pub async fn run_get_missing(backend: &dyn MetadataBackend) {
    let err = backend.get("/some/not/existing/path").await.unwrap_err();
    assert!(matches!(err, Error::RecordNotFound(_)), "got {err:?}");
}

pub async fn run_update_replaces_named_attributes(backend: &dyn MetadataBackend) {
    backend.create(sample("/a.txt")).await.unwrap();
    backend
        .update(
            "/a.txt",
            RecordUpdate::new()
                .attribute("some_attr", "updated")
                .attribute("extra", 7),
        )
        .await
        .unwrap();

    let record = backend.get("/a.txt").await.unwrap();
    assert_eq!(record.attribute("some_attr"), Some(&json!("updated")));
    assert_eq!(record.attribute("extra"), Some(&json!(7)));
    assert_eq!(record.attribute("nested"), Some(&json!({"a": 1, "b": [1, 2]})));
    assert_eq!(record.original_storage_path, "world.txt");
    assert_eq!(record.proxy_storage_name, "media");
}

pub async fn run_update_missing_is_noop(backend: &dyn MetadataBackend) {
    backend
        .update("/missing.txt", RecordUpdate::new().attribute("some_attr", "x"))
        .await
        .unwrap();

    assert!(!backend.exists("/missing.txt").await.unwrap());
    assert_eq!(backend.count().await.unwrap(), 0);
}

pub async fn run_update_renames(backend: &dyn MetadataBackend) {
    let created = backend.create(sample("/old.txt")).await.unwrap();
    backend
        .update("/old.txt", RecordUpdate::new().path("/new.txt"))
        .await
        .unwrap();

    assert!(!backend.exists("/old.txt").await.unwrap());
    let renamed = backend.get("/new.txt").await.unwrap();
    assert_eq!(renamed.id, created.id);
    assert_eq!(renamed.original_storage_path, "world.txt");

    // The old path is free again.
    backend.create(sample("/old.txt")).await.unwrap();
    assert_eq!(backend.count().await.unwrap(), 2);
}

pub async fn run_rename_onto_taken_path(backend: &dyn MetadataBackend) {
    backend.create(sample("/a.txt")).await.unwrap();
    backend.create(sample("/b.txt")).await.unwrap();

    let err = backend
        .update("/a.txt", RecordUpdate::new().path("/b.txt").attribute("x", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateKey(_)), "got {err:?}");

    let a = backend.get("/a.txt").await.unwrap();
    assert_eq!(a.attribute("x"), None);
    assert!(backend.exists("/b.txt").await.unwrap());
}

pub async fn run_delete_and_exists(backend: &dyn MetadataBackend) {
    backend.create(sample("/a.txt")).await.unwrap();
    assert!(backend.exists("/a.txt").await.unwrap());

    backend.delete("/a.txt").await.unwrap();
    assert!(!backend.exists("/a.txt").await.unwrap());
    assert!(!backend.exists("/a.txt").await.unwrap());

    // Nothing matches any more; still fine.
    backend.delete("/a.txt").await.unwrap();
    assert_eq!(backend.count().await.unwrap(), 0);
}

pub async fn run_records_are_independent(backend: &dyn MetadataBackend) {
    backend.create(sample("/a.txt")).await.unwrap();
    backend.create(sample("/b.txt")).await.unwrap();

    backend
        .update("/a.txt", RecordUpdate::new().attribute("some_attr", "changed"))
        .await
        .unwrap();
    let b = backend.get("/b.txt").await.unwrap();
    assert_eq!(b.attribute("some_attr"), Some(&json!("some attr value")));

    backend.delete("/a.txt").await.unwrap();
    assert!(backend.exists("/b.txt").await.unwrap());
    assert_eq!(backend.count().await.unwrap(), 1);
}

pub async fn run_original_storage_name_round_trips(backend: &dyn MetadataBackend) {
    backend
        .create(sample("/named.txt").with_original_storage_name(Some("spare".into())))
        .await
        .unwrap();
    let named = backend.get("/named.txt").await.unwrap();
    assert_eq!(named.original_storage_name.as_deref(), Some("spare"));

    backend
        .update("/named.txt", RecordUpdate::new().original_storage_name("main"))
        .await
        .unwrap();
    let moved = backend.get("/named.txt").await.unwrap();
    assert_eq!(moved.original_storage_name.as_deref(), Some("main"));
}

// Proxy store protocol

pub async fn run_round_trip(store: &ProxyStore) {
    let data: Vec<u8> = (0..=255).cycle().take(10_000).collect();
    let path = store.save_bytes("blob.bin", &data).await.unwrap();

    assert_eq!(path, "/blob.bin");
    assert_eq!(store.read_bytes(&path).await.unwrap(), data);
}

pub async fn run_empty_content(store: &ProxyStore) {
    let path = store.save_bytes("empty.txt", b"").await.unwrap();
    assert!(store.exists(&path).await.unwrap());
    assert_eq!(store.read_bytes(&path).await.unwrap(), b"");
}

pub async fn run_collision_naming(store: &ProxyStore) {
    let first = store.save_bytes("file/hello.txt", b"one").await.unwrap();
    let second = store.save_bytes("file/hello.txt", b"two").await.unwrap();
    let third = store.save_bytes("file/hello.txt", b"three").await.unwrap();

    assert_eq!(first, "/file/hello.txt");
    assert_eq!(second, "/file/hello_1.txt");
    assert_eq!(third, "/file/hello_2.txt");
    assert_eq!(store.read_bytes(&first).await.unwrap(), b"one");
    assert_eq!(store.read_bytes(&second).await.unwrap(), b"two");
    assert_eq!(store.read_bytes(&third).await.unwrap(), b"three");
}

pub async fn run_adoption_collision_naming(store: &ProxyStore) {
    store
        .byte_store()
        .save_bytes("shared.txt", b"shared")
        .await
        .unwrap();

    let first = store.adopt("shared.txt", SaveOptions::new()).await.unwrap();
    let second = store.adopt("shared.txt", SaveOptions::new()).await.unwrap();

    assert_eq!(first, "/shared.txt");
    assert_eq!(second, "/shared_1.txt");
    for path in [&first, &second] {
        let record = store.metadata().get(path).await.unwrap();
        assert_eq!(record.original_storage_path, "shared.txt");
        assert_eq!(store.read_bytes(path).await.unwrap(), b"shared");
    }
}

pub async fn run_uniqueness(store: &ProxyStore) {
    let mut paths = Vec::new();
    for i in 0..10 {
        let name = if i % 2 == 0 { "a/same.txt" } else { "/a//same.txt" };
        paths.push(store.save_bytes(name, b"x").await.unwrap());
    }

    let mut unique = paths.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), paths.len(), "paths: {paths:?}");
    assert_eq!(store.metadata().count().await.unwrap(), 10);
}

pub async fn run_record_fields(store: &ProxyStore) {
    let path = store.save_bytes("docs/report.pdf", b"%PDF").await.unwrap();
    let record = store.metadata().get(&path).await.unwrap();

    assert_eq!(record.path, path);
    assert_eq!(record.proxy_storage_name, store.name());
    assert_eq!(record.original_storage_name, None);
    assert!(store.byte_store().exists(&record.original_storage_path).await.unwrap());
}

pub async fn run_open_missing(store: &ProxyStore) {
    let err = match store.open("/nope.txt").await {
        Ok(_) => panic!("opened a file that was never saved"),
        Err(e) => e,
    };
    assert!(matches!(err, Error::NoSuchObject { .. }), "got {err:?}");
    assert_eq!(
        err.to_string(),
        format!(
            "No such {} object with path: /nope.txt",
            store.metadata().kind()
        )
    );
}

pub async fn run_delete_missing(store: &ProxyStore) {
    let err = store.delete("/nope.txt").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
    assert_eq!(err.to_string(), "File not found: /nope.txt");

    assert!(!store.exists("/nope.txt").await.unwrap());
    assert!(!store.exists("/nope.txt").await.unwrap());
}

pub async fn run_delete_removes_content_and_record(store: &ProxyStore) {
    let path = store.save_bytes("gone.txt", b"bye").await.unwrap();
    let record = store.metadata().get(&path).await.unwrap();

    store.delete(&path).await.unwrap();

    assert!(!store.exists(&path).await.unwrap());
    assert!(!store.byte_store().exists(&record.original_storage_path).await.unwrap());
    assert!(matches!(store.delete(&path).await, Err(Error::NotFound(_))));
}

pub async fn run_exists_is_metadata_authoritative(store: &ProxyStore) {
    store
        .metadata()
        .create(RecordData::new("/ghost.txt", "ghost.txt").with_proxy_storage_name(store.name()))
        .await
        .unwrap();

    assert!(store.exists("/ghost.txt").await.unwrap());
    assert!(matches!(
        store.read_bytes("/ghost.txt").await,
        Err(Error::NotFound(_))
    ));
}

pub async fn run_rename_then_open(store: &ProxyStore) {
    let path = store.save_bytes("before.txt", b"content").await.unwrap();
    store
        .metadata()
        .update(&path, RecordUpdate::new().path("/after.txt"))
        .await
        .unwrap();

    assert!(!store.exists(&path).await.unwrap());
    assert_eq!(store.read_bytes("/after.txt").await.unwrap(), b"content");
}

pub async fn run_owner_binding(store: &ProxyStore) {
    let owner = Owner::new(3, 42, "resume");
    let mut content = std::io::Cursor::new(b"cv".to_vec());
    let path = store
        .save("cv.txt", &mut content, SaveOptions::new().owned_by(owner.clone()))
        .await
        .unwrap();

    let record = store.metadata().get(&path).await.unwrap();
    assert_eq!(record.attribute("content_type_id"), Some(&json!(3)));
    assert_eq!(record.attribute("object_id"), Some(&json!(42)));
    assert_eq!(record.attribute("field"), Some(&json!("resume")));

    // Same owner again changes nothing.
    store.notify_saved(&path, &owner).await.unwrap();
    assert_eq!(store.metadata().get(&path).await.unwrap(), record);

    // A different owner takes over.
    store
        .notify_saved(&path, &Owner::new(3, 43, "photo"))
        .await
        .unwrap();
    let rebound = store.metadata().get(&path).await.unwrap();
    assert_eq!(rebound.attribute("object_id"), Some(&json!(43)));
    assert_eq!(rebound.attribute("field"), Some(&json!("photo")));
}

// Byte store doubles

/// A [`MemoryStore`] whose writes fail with a fixed error.
///
/// Clones share the attempt counter and the remaining failure budget.
#[derive(Debug, Clone)]
pub struct FlakyStore {
    inner: MemoryStore,
    error: fn() -> Error,
    failures_left: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl FlakyStore {
    /// Every write fails.
    pub fn broken(error: fn() -> Error) -> Self {
        Self::failing(usize::MAX, error)
    }

    /// The first `times` writes fail.
    pub fn failing(times: usize, error: fn() -> Error) -> Self {
        Self {
            inner: MemoryStore::new(),
            error,
            failures_left: Arc::new(AtomicUsize::new(times)),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of writes attempted so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Objects that were actually written.
    pub fn contents(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait::async_trait]
impl ByteStore for FlakyStore {
    async fn open(&self, path: &str) -> Result<ByteReader> {
        self.inner.open(path).await
    }

    async fn save(
        &self,
        name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err((self.error)());
        }
        self.inner.save(name, content).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.inner.delete(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(path).await
    }
}

pub fn io_error() -> Error {
    Error::Io(std::io::Error::other("disk full"))
}

pub fn connection_error() -> Error {
    Error::Connection("upstream unreachable".into())
}

pub fn permission_error() -> Error {
    Error::PermissionDenied("read-only bucket".into())
}
