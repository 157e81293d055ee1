//! Upstream link events.
//!
//! Events arrive at least once and possibly out of order. Creation is
//! idempotent on `(kind, id)`, deletion of an already-deleted link is a
//! no-op, and an update for an unknown link is dropped.

use serde::{Deserialize, Serialize};
use sitemaps_core::EntityKind;
use sitemaps_core::naming::partition_value;
use sitemaps_metadata::models::{LinkPatch, NewLink, VideoFields};
use sitemaps_metadata::{MetadataError, MetadataStore};
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    TextLinkCreated,
    TextLinkDeleted,
    VideoLinkCreated,
    VideoLinkUpdated,
    VideoLinkDeleted,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextLinkCreated => "TEXT_LINK_CREATED",
            Self::TextLinkDeleted => "TEXT_LINK_DELETED",
            Self::VideoLinkCreated => "VIDEO_LINK_CREATED",
            Self::VideoLinkUpdated => "VIDEO_LINK_UPDATED",
            Self::VideoLinkDeleted => "VIDEO_LINK_DELETED",
        }
    }

    pub fn kind(self) -> EntityKind {
        match self {
            Self::TextLinkCreated | Self::TextLinkDeleted => EntityKind::Text,
            Self::VideoLinkCreated | Self::VideoLinkUpdated | Self::VideoLinkDeleted => {
                EntityKind::Video
            }
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text ids are sent as strings by some producers and numbers by others.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LinkId {
    Number(i64),
    Text(String),
}

impl LinkId {
    pub fn parse(&self) -> Result<i64, IngestError> {
        match self {
            Self::Number(id) => Ok(*id),
            Self::Text(raw) => raw
                .trim()
                .parse()
                .map_err(|_| IngestError::InvalidEvent(format!("link id is not an integer: {raw:?}"))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSitemapPayload {
    pub id: LinkId,
    pub url: String,
    #[serde(default)]
    pub is_ignored: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSitemapPayload {
    pub id: LinkId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub start_timestamp: Option<i64>,
    #[serde(default)]
    pub end_timestamp: Option<i64>,
    #[serde(default)]
    pub actual_duration_in_seconds: Option<i64>,
    pub link: String,
    #[serde(rename = "videoURL", default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub is_ignored: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl VideoSitemapPayload {
    fn video_fields(&self) -> VideoFields {
        VideoFields {
            title: self.title.clone(),
            description: self.description.clone(),
            thumbnail_url: self.thumbnail.clone(),
            player_url: self.video_url.clone(),
            duration_secs: self.actual_duration_in_seconds,
            published_at: None,
        }
    }
}

/// `{eventType, eventVersion, textSitemap | videoSitemap}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_type: EventType,
    #[serde(default)]
    pub event_version: Option<String>,
    #[serde(default)]
    pub text_sitemap: Option<TextSitemapPayload>,
    #[serde(default)]
    pub video_sitemap: Option<VideoSitemapPayload>,
}

/// A request body carrying one envelope or many.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum EventBatch {
    Many(Vec<EventEnvelope>),
    One(Box<EventEnvelope>),
}

impl EventBatch {
    pub fn into_vec(self) -> Vec<EventEnvelope> {
        match self {
            Self::Many(events) => events,
            Self::One(event) => vec![*event],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

/// What applying one event did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Created,
    Duplicate,
    MarkedDeleted,
    Updated,
    /// Unknown link, or a deletion already in progress.
    Ignored,
}

impl IngestOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Duplicate => "duplicate",
            Self::MarkedDeleted => "marked_deleted",
            Self::Updated => "updated",
            Self::Ignored => "ignored",
        }
    }
}

pub struct Ingestor {
    metadata: Arc<dyn MetadataStore>,
    partition_base: u32,
}

impl Ingestor {
    pub fn new(metadata: Arc<dyn MetadataStore>, partition_base: u32) -> Self {
        Self {
            metadata,
            partition_base,
        }
    }

    /// Apply one event and record its outcome.
    pub async fn apply(&self, event: &EventEnvelope) -> Result<IngestOutcome, IngestError> {
        let result = self.dispatch(event).await;
        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(IngestError::InvalidEvent(_)) => "invalid",
            Err(IngestError::Metadata(_)) => "failed",
        };
        crate::metrics::EVENTS_INGESTED
            .with_label_values(&[event.event_type.as_str(), outcome])
            .inc();
        tracing::debug!(event_type = %event.event_type, outcome, "Event applied");
        result
    }

    async fn dispatch(&self, event: &EventEnvelope) -> Result<IngestOutcome, IngestError> {
        let now = OffsetDateTime::now_utc();
        match event.event_type {
            EventType::TextLinkCreated => {
                let text = text_payload(event)?;
                let link_id = text.id.parse()?;
                self.create(NewLink {
                    kind: EntityKind::Text,
                    link_id,
                    link: text.url.clone(),
                    partition_base: self.partition_base,
                    partition_value: partition_value(link_id, self.partition_base),
                    is_ignored: text.is_ignored || text.is_deleted,
                    video: VideoFields::default(),
                    created_at: now,
                    updated_at: now,
                })
                .await
            }
            EventType::VideoLinkCreated => {
                let video = video_payload(event)?;
                let link_id = video.id.parse()?;
                self.create(NewLink {
                    kind: EntityKind::Video,
                    link_id,
                    link: video.link.clone(),
                    partition_base: self.partition_base,
                    partition_value: partition_value(link_id, self.partition_base),
                    is_ignored: video.is_ignored || video.is_deleted,
                    video: video.video_fields(),
                    created_at: now,
                    updated_at: now,
                })
                .await
            }
            EventType::VideoLinkUpdated => {
                let video = video_payload(event)?;
                let patch = LinkPatch {
                    link: Some(video.link.clone()),
                    is_ignored: video.is_ignored,
                    video: video.video_fields(),
                };
                let applied = self
                    .metadata
                    .update_link(EntityKind::Video, video.id.parse()?, &patch, now)
                    .await?;
                Ok(if applied {
                    IngestOutcome::Updated
                } else {
                    IngestOutcome::Ignored
                })
            }
            EventType::TextLinkDeleted => {
                let link_id = text_payload(event)?.id.parse()?;
                self.mark_deleted(EntityKind::Text, link_id, now).await
            }
            EventType::VideoLinkDeleted => {
                let link_id = video_payload(event)?.id.parse()?;
                self.mark_deleted(EntityKind::Video, link_id, now).await
            }
        }
    }

    async fn create(&self, link: NewLink) -> Result<IngestOutcome, IngestError> {
        match self.metadata.create_link(&link).await {
            Ok(row) => {
                tracing::debug!(
                    kind = %link.kind,
                    link_id = link.link_id,
                    partition = row.partition_value,
                    counter = row.counter,
                    "Link created"
                );
                Ok(IngestOutcome::Created)
            }
            Err(e) if e.is_already_exists() => {
                tracing::debug!(kind = %link.kind, link_id = link.link_id, "Duplicate link create");
                Ok(IngestOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_deleted(
        &self,
        kind: EntityKind,
        link_id: i64,
        now: OffsetDateTime,
    ) -> Result<IngestOutcome, IngestError> {
        let marked = self.metadata.mark_link_deleted(kind, link_id, now).await?;
        Ok(if marked {
            IngestOutcome::MarkedDeleted
        } else {
            IngestOutcome::Ignored
        })
    }
}

fn text_payload(event: &EventEnvelope) -> Result<&TextSitemapPayload, IngestError> {
    event.text_sitemap.as_ref().ok_or_else(|| {
        IngestError::InvalidEvent(format!("{} without textSitemap", event.event_type))
    })
}

fn video_payload(event: &EventEnvelope) -> Result<&VideoSitemapPayload, IngestError> {
    event.video_sitemap.as_ref().ok_or_else(|| {
        IngestError::InvalidEvent(format!("{} without videoSitemap", event.event_type))
    })
}
