//! Leaf record repository.

use crate::error::MetadataResult;
use crate::models::{LinkChange, LinkPatch, LinkRow, NewLink};
use async_trait::async_trait;
use sitemaps_core::EntityKind;
use time::OffsetDateTime;

/// Repository for links awaiting or holding a place in a leaf sitemap.
#[async_trait]
pub trait LinkRepo: Send + Sync {
    /// Create a link, assigning the next counter of its partition in the
    /// same transaction. A duplicate `(kind, link_id)` fails with
    /// `AlreadyExists` and leaves the counter untouched.
    async fn create_link(&self, link: &NewLink) -> MetadataResult<LinkRow>;

    async fn get_link(&self, kind: EntityKind, link_id: i64) -> MetadataResult<Option<LinkRow>>;

    /// Flag a link as deleted upstream. Ignored links go straight to
    /// `deleted`; others become `marked_for_deletion`. Returns false when
    /// the link is unknown or already in a deletion cycle.
    async fn mark_link_deleted(
        &self,
        kind: EntityKind,
        link_id: i64,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Apply upstream content changes and flag the link for a rewrite
    /// unless it is ignored or deleted. Returns false when unknown.
    async fn update_link(
        &self,
        kind: EntityKind,
        link_id: i64,
        patch: &LinkPatch,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Pending links of one partition, oldest counter first.
    async fn find_pending_links(
        &self,
        kind: EntityKind,
        partition_base: u32,
        partition_value: u32,
        limit: u32,
    ) -> MetadataResult<Vec<LinkRow>>;

    async fn find_links_marked_for_deletion(
        &self,
        kind: EntityKind,
        limit: u32,
    ) -> MetadataResult<Vec<LinkRow>>;

    /// Links flagged for update that are not deleted.
    async fn find_links_marked_for_update(
        &self,
        kind: EntityKind,
        limit: u32,
    ) -> MetadataResult<Vec<LinkRow>>;

    async fn find_links_by_file(&self, file_name: &str) -> MetadataResult<Vec<LinkRow>>;

    /// Apply `change` to every listed link whose current state allows it.
    /// Returns the number of rows changed.
    async fn bulk_set_link_state(
        &self,
        kind: EntityKind,
        link_ids: &[i64],
        change: &LinkChange,
        now: OffsetDateTime,
    ) -> MetadataResult<u64>;
}
