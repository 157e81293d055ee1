//! Mapping between link records and sitemap entries.

use sitemaps_core::sitemap::absolute_url;
use sitemaps_core::{ChangeFreq, EntityKind, UrlEntry, VideoEntry};
use sitemaps_metadata::models::LinkRow;
use time::OffsetDateTime;

const VIDEO_PLATFORMS: &str = "web mobile tv";

/// Absolute URL a record is listed under.
pub fn entry_loc(frontend_domain: &str, row: &LinkRow) -> String {
    absolute_url(frontend_domain, &row.link)
}

/// Video block for a video record.
pub fn video_entry(row: &LinkRow) -> VideoEntry {
    VideoEntry {
        thumbnail_loc: row.thumbnail_url.clone(),
        title: row.title.clone(),
        description: row.description.clone(),
        content_loc: None,
        player_loc: row.player_url.clone(),
        allow_embed: Some(true),
        duration_secs: row.duration_secs.and_then(|d| u64::try_from(d).ok()),
        publication_date: row.published_at.or(Some(row.created_at)),
        family_friendly: Some(true),
        live: Some(false),
        platform: Some(VIDEO_PLATFORMS.to_string()),
        requires_subscription: Some(false),
    }
}

/// Fresh listing entry for a newly written record.
pub fn url_entry(kind: EntityKind, frontend_domain: &str, row: &LinkRow) -> UrlEntry {
    let profile = kind.profile();
    let mut entry = UrlEntry::new(entry_loc(frontend_domain, row));
    entry.lastmod = Some(row.created_at);
    entry.changefreq = Some(profile.initial_changefreq);
    if profile.has_video {
        entry.videos.push(video_entry(row));
    }
    entry
}

/// Rewrite an existing entry from an updated record.
pub fn apply_update(kind: EntityKind, entry: &mut UrlEntry, row: &LinkRow, now: OffsetDateTime) {
    if kind.profile().has_video {
        entry.videos = vec![video_entry(row)];
    }
    entry.changefreq = Some(ChangeFreq::Hourly);
    entry.lastmod = Some(now);
}
