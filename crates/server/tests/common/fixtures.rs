//! Test fixtures for events and stored payloads.

use serde_json::{Value, json};
use sitemaps_core::naming::storage_key;
use sitemaps_core::{EntityKind, SitemapIndex, UrlSet};
use sitemaps_server::Ingestor;
use sitemaps_server::compression::gunzip_to_string;
use sitemaps_server::ingest::EventEnvelope;
use sitemaps_storage::ObjectStore;

/// `TEXT_LINK_CREATED` for `/news/{id}`.
#[allow(dead_code)]
pub fn text_created(id: i64) -> Value {
    json!({
        "eventType": "TEXT_LINK_CREATED",
        "eventVersion": "1",
        "textSitemap": {
            "id": id.to_string(),
            "url": format!("/news/{id}"),
            "isIgnored": false,
            "isDeleted": false,
            "createdAt": 1714550400000i64,
            "updatedAt": 1714550400000i64
        }
    })
}

#[allow(dead_code)]
pub fn text_deleted(id: i64) -> Value {
    json!({
        "eventType": "TEXT_LINK_DELETED",
        "eventVersion": "1",
        "textSitemap": {
            "id": id.to_string(),
            "url": format!("/news/{id}"),
            "isIgnored": false,
            "isDeleted": true
        }
    })
}

fn video_payload(id: i64, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "description": format!("{title} description"),
        "thumbnail": format!("https://cdn.example.com/{id}.jpg"),
        "startTimestamp": 1714550400000i64,
        "endTimestamp": 1714550495000i64,
        "actualDurationInSeconds": 95,
        "link": format!("/videos/{id}"),
        "videoURL": format!("https://cdn.example.com/{id}.mp4"),
        "isIgnored": false,
        "isDeleted": false
    })
}

#[allow(dead_code)]
pub fn video_created(id: i64, title: &str) -> Value {
    json!({
        "eventType": "VIDEO_LINK_CREATED",
        "eventVersion": "1",
        "videoSitemap": video_payload(id, title)
    })
}

#[allow(dead_code)]
pub fn video_updated(id: i64, title: &str) -> Value {
    json!({
        "eventType": "VIDEO_LINK_UPDATED",
        "eventVersion": "1",
        "videoSitemap": video_payload(id, title)
    })
}

#[allow(dead_code)]
pub fn video_deleted(id: i64) -> Value {
    json!({
        "eventType": "VIDEO_LINK_DELETED",
        "eventVersion": "1",
        "videoSitemap": video_payload(id, "gone")
    })
}

/// Apply events directly through the ingestor.
#[allow(dead_code)]
pub async fn ingest(ingestor: &Ingestor, events: impl IntoIterator<Item = Value>) {
    for event in events {
        let envelope: EventEnvelope = serde_json::from_value(event).expect("valid envelope");
        ingestor.apply(&envelope).await.expect("event applied");
    }
}

/// Download and parse a leaf file.
#[allow(dead_code)]
pub async fn read_leaf(storage: &dyn ObjectStore, kind: EntityKind, file_name: &str) -> UrlSet {
    let raw = storage
        .get(&storage_key(kind, file_name))
        .await
        .expect("leaf object exists");
    let xml = gunzip_to_string(&raw).await.expect("leaf is gzip");
    UrlSet::parse(&xml).expect("leaf parses")
}

/// Download and parse an index file.
#[allow(dead_code)]
pub async fn read_index(
    storage: &dyn ObjectStore,
    kind: EntityKind,
    file_name: &str,
) -> SitemapIndex {
    let raw = storage
        .get(&storage_key(kind, file_name))
        .await
        .expect("index object exists");
    let xml = gunzip_to_string(&raw).await.expect("index is gzip");
    SitemapIndex::parse(&xml).expect("index parses")
}

/// Locations listed in a leaf, in document order.
#[allow(dead_code)]
pub fn locs(listing: &UrlSet) -> Vec<String> {
    listing.entries.iter().map(|e| e.loc.clone()).collect()
}
