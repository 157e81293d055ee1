//! Database models mapping to the metadata schema.

use crate::error::MetadataResult;
use sitemaps_core::{
    DeletionCycle, EntityKind, IndexFileLifecycle, LinkState, SitemapFileLifecycle,
};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Locks
// =============================================================================

/// A held lease on an arbitrary key.
#[derive(Debug, Clone, FromRow)]
pub struct LockRow {
    pub lock_key: String,
    /// Random id minted per acquisition.
    pub holder: Uuid,
    pub acquired_at: OffsetDateTime,
}

// =============================================================================
// Leaf records
// =============================================================================

/// Video metadata carried by video links.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoFields {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub player_url: Option<String>,
    pub duration_secs: Option<i64>,
    pub published_at: Option<OffsetDateTime>,
}

/// One link to be listed in a leaf sitemap.
#[derive(Debug, Clone, FromRow)]
pub struct LinkRow {
    pub kind: String,
    pub link_id: i64,
    pub link: String,
    pub partition_base: i64,
    pub partition_value: i64,
    /// Per-partition sequence number assigned at creation.
    pub counter: i64,
    /// Leaf file the link was written to. `None` while pending.
    pub file_name: Option<String>,
    pub is_ignored: bool,
    pub is_deleted: bool,
    pub deletion_cycle: Option<String>,
    pub is_marked_for_update: bool,
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub player_url: Option<String>,
    pub duration_secs: Option<i64>,
    pub published_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl LinkRow {
    pub fn entity_kind(&self) -> MetadataResult<EntityKind> {
        Ok(self.kind.parse()?)
    }

    pub fn deletion_cycle(&self) -> MetadataResult<Option<DeletionCycle>> {
        Ok(self
            .deletion_cycle
            .as_deref()
            .map(str::parse::<DeletionCycle>)
            .transpose()?)
    }

    pub fn state(&self) -> MetadataResult<LinkState> {
        Ok(LinkState::derive(
            self.file_name.is_some(),
            self.is_ignored,
            self.is_deleted,
            self.deletion_cycle()?,
            self.is_marked_for_update,
        ))
    }

    pub fn counter(&self) -> u64 {
        self.counter.max(0) as u64
    }

    pub fn video(&self) -> VideoFields {
        VideoFields {
            title: self.title.clone(),
            description: self.description.clone(),
            thumbnail_url: self.thumbnail_url.clone(),
            player_url: self.player_url.clone(),
            duration_secs: self.duration_secs,
            published_at: self.published_at,
        }
    }
}

/// Input for creating a link. The counter is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewLink {
    pub kind: EntityKind,
    pub link_id: i64,
    pub link: String,
    pub partition_base: u32,
    pub partition_value: u32,
    pub is_ignored: bool,
    pub video: VideoFields,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Content changes from an upstream update event.
#[derive(Debug, Clone)]
pub struct LinkPatch {
    pub link: Option<String>,
    pub is_ignored: bool,
    pub video: VideoFields,
}

/// Bulk state change applied to a set of links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkChange {
    /// Stamp pending links with the leaf file they were written to.
    Assigned(String),
    /// Deletion finished: `marked_for_deletion` becomes `deleted`.
    Deleted,
    /// Update written: clear the update flag.
    UpdateCleared,
}

// =============================================================================
// Leaf and index files
// =============================================================================

/// A leaf sitemap file.
#[derive(Debug, Clone, FromRow)]
pub struct SitemapFileRow {
    pub file_name: String,
    pub kind: String,
    pub index_file_name: String,
    /// Public link crawlers fetch.
    pub link: String,
    /// Direct object location.
    pub location: String,
    pub lifecycle: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl SitemapFileRow {
    pub fn entity_kind(&self) -> MetadataResult<EntityKind> {
        Ok(self.kind.parse()?)
    }

    pub fn lifecycle(&self) -> MetadataResult<SitemapFileLifecycle> {
        Ok(self.lifecycle.parse()?)
    }
}

/// A sitemap index file.
#[derive(Debug, Clone, FromRow)]
pub struct IndexFileRow {
    pub file_name: String,
    pub kind: String,
    pub link: String,
    pub location: String,
    pub lifecycle: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl IndexFileRow {
    pub fn entity_kind(&self) -> MetadataResult<EntityKind> {
        Ok(self.kind.parse()?)
    }

    pub fn lifecycle(&self) -> MetadataResult<IndexFileLifecycle> {
        Ok(self.lifecycle.parse()?)
    }
}
