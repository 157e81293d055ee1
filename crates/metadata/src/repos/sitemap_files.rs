//! Leaf sitemap file repository.

use crate::error::MetadataResult;
use crate::models::{LinkChange, SitemapFileRow};
use async_trait::async_trait;
use sitemaps_core::{EntityKind, SitemapFileLifecycle};
use time::OffsetDateTime;

#[async_trait]
pub trait SitemapFileRepo: Send + Sync {
    async fn get_sitemap_file(&self, file_name: &str) -> MetadataResult<Option<SitemapFileRow>>;

    /// Create the file row and stamp `link_ids` with its name in one
    /// transaction. Fails with `AlreadyExists` if the file row exists.
    async fn create_sitemap_file_with_links(
        &self,
        file: &SitemapFileRow,
        link_ids: &[i64],
    ) -> MetadataResult<()>;

    /// Apply `change` to `link_ids` and record that the file content
    /// changed, in one transaction. A file already linked to its index is
    /// moved to `marked_for_lastmod_update`; a file still `uploaded` only
    /// gets a fresh `updated_at`.
    async fn commit_sitemap_file_changes(
        &self,
        file_name: &str,
        kind: EntityKind,
        link_ids: &[i64],
        change: &LinkChange,
        now: OffsetDateTime,
    ) -> MetadataResult<u64>;

    async fn find_sitemap_files_by_lifecycle(
        &self,
        kind: EntityKind,
        lifecycle: SitemapFileLifecycle,
        limit: u32,
    ) -> MetadataResult<Vec<SitemapFileRow>>;

    /// Move files to `target`, skipping any whose current lifecycle is not
    /// a legal source. Returns the number of rows moved.
    async fn set_sitemap_files_lifecycle(
        &self,
        file_names: &[String],
        target: SitemapFileLifecycle,
        now: OffsetDateTime,
    ) -> MetadataResult<u64>;
}
