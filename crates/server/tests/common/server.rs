//! Server test utilities.

use sitemaps_core::config::{AppConfig, MetadataConfig, StorageConfig};
use sitemaps_metadata::{MetadataStore, SqliteStore};
use sitemaps_server::notify::{NoopNotifier, Notifier};
use sitemaps_server::{AppState, create_router};
use sitemaps_storage::{FilesystemBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;

/// Public origin used by every test configuration.
pub const FRONTEND: &str = "https://www.example.com";

/// Test configuration with small files so boundaries are cheap to reach.
#[allow(dead_code)]
pub fn test_config(temp_dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::for_testing();
    config.storage = StorageConfig::Filesystem {
        path: temp_dir.path().join("storage"),
    };
    config.metadata = MetadataConfig::Sqlite {
        path: temp_dir.path().join("metadata.db"),
    };
    config.sitemaps.frontend_domain = FRONTEND.to_string();
    config.sitemaps.location_base_url = Some("https://bucket.example.com".to_string());
    config.sitemaps.max_entries_per_file = 3;
    config.sitemaps.max_entries_per_index_file = 2;
    config
}

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Filesystem storage, file-backed SQLite and no crawler pings.
    pub async fn new() -> Self {
        Self::build(|_| {}, None, Arc::new(NoopNotifier)).await
    }

    /// Like [`TestServer::new`] with a tweaked configuration.
    pub async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        Self::build(tweak, None, Arc::new(NoopNotifier)).await
    }

    /// Use `storage` instead of a temporary filesystem backend.
    pub async fn with_storage(storage: Arc<dyn ObjectStore>) -> Self {
        Self::build(|_| {}, Some(storage), Arc::new(NoopNotifier)).await
    }

    pub async fn with_notifier(notifier: Arc<dyn Notifier>) -> Self {
        Self::build(|_| {}, None, notifier).await
    }

    async fn build(
        tweak: impl FnOnce(&mut AppConfig),
        storage: Option<Arc<dyn ObjectStore>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = test_config(&temp_dir);
        tweak(&mut config);

        let storage = match storage {
            Some(storage) => storage,
            None => Arc::new(
                FilesystemBackend::new(temp_dir.path().join("storage"))
                    .await
                    .expect("Failed to create storage backend"),
            ),
        };
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(temp_dir.path().join("metadata.db"))
                .await
                .expect("Failed to create metadata store"),
        );

        let state = AppState::new(config, storage, metadata, notifier);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    pub fn storage(&self) -> Arc<dyn ObjectStore> {
        self.state.storage.clone()
    }

    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }
}
