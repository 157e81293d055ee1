//! Storage test utilities.

use async_trait::async_trait;
use bytes::Bytes;
use sitemaps_storage::{
    FilesystemBackend, ObjectMeta, ObjectStore, PutOptions, StorageError, StorageResult,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::sync::Notify;

/// A test storage wrapper that cleans up on drop.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestStorage {
    pub backend: Arc<dyn ObjectStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestStorage {
    /// Create a new test storage with a temporary directory.
    pub async fn new() -> StorageResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let backend = FilesystemBackend::new(temp_dir.path()).await?;

        Ok(Self {
            backend: Arc::new(backend),
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.backend.clone()
    }
}

/// Object store that fails every call and counts how often it was touched.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct UnreachableStore {
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl UnreachableStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self, op: &str, key: &str) -> StorageResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Io(std::io::Error::other(format!(
            "unexpected {op} of {key}"
        ))))
    }
}

#[async_trait]
impl ObjectStore for UnreachableStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.fail("exists", key)
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.fail("head", key)
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.fail("get", key)
    }

    async fn put(&self, key: &str, _data: Bytes, _options: &PutOptions) -> StorageResult<()> {
        self.fail("put", key)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.fail("delete", key)
    }

    fn backend_name(&self) -> &'static str {
        "unreachable"
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.fail("health_check", "")
    }
}

/// Filesystem store whose writes to one key wait until the test opens the
/// gate. Every other call passes straight through.
#[allow(dead_code)]
pub struct GatedStore {
    inner: TestStorage,
    key: String,
    entered: Notify,
    release: Notify,
}

#[allow(dead_code)]
impl GatedStore {
    pub async fn new(key: &str) -> StorageResult<Self> {
        Ok(Self {
            inner: TestStorage::new().await?,
            key: key.to_string(),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }

    /// Resolves once a write to the gated key is waiting.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn open(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl ObjectStore for GatedStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.backend.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.backend.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.backend.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes, options: &PutOptions) -> StorageResult<()> {
        if key == self.key {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.backend.put(key, data, options).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.backend.delete(key).await
    }

    fn backend_name(&self) -> &'static str {
        "gated"
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.backend.health_check().await
    }
}
