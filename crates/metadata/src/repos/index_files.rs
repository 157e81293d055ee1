//! Sitemap index file repository.

use crate::error::MetadataResult;
use crate::models::IndexFileRow;
use async_trait::async_trait;
use sitemaps_core::IndexFileLifecycle;
use time::OffsetDateTime;

#[async_trait]
pub trait IndexFileRepo: Send + Sync {
    async fn get_index_file(&self, file_name: &str) -> MetadataResult<Option<IndexFileRow>>;

    /// Fails with `AlreadyExists` on a duplicate name.
    async fn create_index_file(&self, file: &IndexFileRow) -> MetadataResult<()>;

    /// Index files of every kind in `lifecycle`, oldest first.
    async fn find_index_files_by_lifecycle(
        &self,
        lifecycle: IndexFileLifecycle,
        limit: u32,
    ) -> MetadataResult<Vec<IndexFileRow>>;

    async fn set_index_files_lifecycle(
        &self,
        file_names: &[String],
        target: IndexFileLifecycle,
        now: OffsetDateTime,
    ) -> MetadataResult<u64>;
}
