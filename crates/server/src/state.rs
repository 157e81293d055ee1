//! Application state shared across handlers and the scheduler.

use crate::assembler::FileAssembler;
use crate::ingest::Ingestor;
use crate::linker::IndexLinker;
use crate::lock::LockManager;
use crate::notify::Notifier;
use crate::scheduler::Scheduler;
use sitemaps_core::config::AppConfig;
use sitemaps_metadata::MetadataStore;
use sitemaps_storage::ObjectStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    pub locks: LockManager,
    pub linker: Arc<IndexLinker>,
    pub assembler: Arc<FileAssembler>,
    pub scheduler: Arc<Scheduler>,
    pub ingestor: Arc<Ingestor>,
}

impl AppState {
    /// Wire the pipeline together.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        if let Err(error) = config.validate() {
            panic!("Invalid configuration: {}", error);
        }

        let config = Arc::new(config);
        let locks = LockManager::new(metadata.clone(), config.sitemaps.lock_lease());
        let linker = Arc::new(IndexLinker::new(
            metadata.clone(),
            storage.clone(),
            locks.clone(),
            config.clone(),
        ));
        let assembler = Arc::new(FileAssembler::new(
            metadata.clone(),
            storage.clone(),
            locks.clone(),
            linker.clone(),
            notifier,
            config.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            metadata.clone(),
            assembler.clone(),
            linker.clone(),
            config.clone(),
        ));
        let ingestor = Arc::new(Ingestor::new(
            metadata.clone(),
            config.sitemaps.partition_base,
        ));

        Self {
            config,
            storage,
            metadata,
            locks,
            linker,
            assembler,
            scheduler,
            ingestor,
        }
    }
}
