//! End-to-end sweeps over SQLite and filesystem storage.

mod common;

use common::{
    FRONTEND, GatedStore, TestServer, UnreachableStore, ingest, locs, read_index, read_leaf,
    text_created, text_deleted, video_created, video_updated,
};
use sitemaps_core::naming::ROBOTS_FILE;
use sitemaps_core::{ChangeFreq, EntityKind, IndexFileLifecycle, LinkState, SitemapFileLifecycle};
use sitemaps_server::bootstrap::seed_storage;
use std::sync::Arc;
use std::time::Duration;

fn news(id: i64) -> String {
    format!("{FRONTEND}/news/{id}")
}

async fn leaf_lifecycle(server: &TestServer, file_name: &str) -> SitemapFileLifecycle {
    server
        .metadata()
        .get_sitemap_file(file_name)
        .await
        .unwrap()
        .unwrap()
        .lifecycle()
        .unwrap()
}

#[tokio::test]
async fn appended_batches_list_exactly_all_records() {
    let server = TestServer::new().await;
    let scheduler = &server.state.scheduler;

    ingest(&server.state.ingestor, [text_created(1), text_created(11)]).await;
    let stats = scheduler.sweep_new_links(EntityKind::Text, 1).await.unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.records, 2);

    ingest(&server.state.ingestor, [text_created(21)]).await;
    scheduler.sweep_new_links(EntityKind::Text, 1).await.unwrap();

    let listing = read_leaf(server.storage().as_ref(), EntityKind::Text, "text-sitemap-10-1-1").await;
    assert_eq!(locs(&listing), vec![news(1), news(11), news(21)]);
    for entry in &listing.entries {
        assert_eq!(entry.changefreq, Some(ChangeFreq::Hourly));
        assert!(entry.lastmod.is_some());
        assert!(entry.videos.is_empty());
    }

    for id in [1, 11, 21] {
        let row = server.metadata().get_link(EntityKind::Text, id).await.unwrap().unwrap();
        assert_eq!(row.file_name.as_deref(), Some("text-sitemap-10-1-1"));
        assert_eq!(row.state().unwrap(), LinkState::Assigned);
    }

    // Nothing left to do.
    let stats = scheduler.sweep_new_links(EntityKind::Text, 1).await.unwrap();
    assert_eq!(stats.groups, 0);
}

#[tokio::test]
async fn record_101_lands_in_first_file_of_partition_one() {
    let server = TestServer::new().await;
    ingest(&server.state.ingestor, [text_created(101)]).await;

    let row = server.metadata().get_link(EntityKind::Text, 101).await.unwrap().unwrap();
    assert_eq!(row.partition_base, 10);
    assert_eq!(row.partition_value, 1);

    server
        .state
        .scheduler
        .sweep_new_links(EntityKind::Text, 1)
        .await
        .unwrap();

    let file = server
        .metadata()
        .get_sitemap_file("text-sitemap-10-1-1")
        .await
        .unwrap()
        .expect("leaf row");
    assert_eq!(file.index_file_name, "text-sitemaps-index-1");
    assert_eq!(
        file.link,
        "https://www.example.com/sitemaps/sitemap/text-sitemap-10-1-1"
    );
    assert_eq!(
        file.location,
        "https://bucket.example.com/text-sitemaps/text-sitemap-10-1-1"
    );
    assert_eq!(file.lifecycle().unwrap(), SitemapFileLifecycle::Uploaded);

    let index = server
        .metadata()
        .get_index_file("text-sitemaps-index-1")
        .await
        .unwrap()
        .expect("index row");
    assert_eq!(index.lifecycle().unwrap(), IndexFileLifecycle::Uploaded);
    let listing = read_index(server.storage().as_ref(), EntityKind::Text, "text-sitemaps-index-1").await;
    assert!(listing.entries.is_empty());
}

#[tokio::test]
async fn file_increment_advances_exactly_at_the_limit() {
    // Three entries per leaf, two leaves per index.
    let server = TestServer::new().await;
    let ids: Vec<i64> = (0..7).map(|n| n * 10 + 1).collect();
    ingest(&server.state.ingestor, ids.iter().map(|&id| text_created(id))).await;

    let stats = server
        .state
        .scheduler
        .sweep_new_links(EntityKind::Text, 1)
        .await
        .unwrap();
    assert_eq!(stats.succeeded, 3);
    assert_eq!(stats.records, 7);

    let storage = server.storage();
    let first = read_leaf(storage.as_ref(), EntityKind::Text, "text-sitemap-10-1-1").await;
    let second = read_leaf(storage.as_ref(), EntityKind::Text, "text-sitemap-10-1-2").await;
    let third = read_leaf(storage.as_ref(), EntityKind::Text, "text-sitemap-10-1-3").await;
    assert_eq!(locs(&first), vec![news(1), news(11), news(21)]);
    assert_eq!(locs(&second), vec![news(31), news(41), news(51)]);
    assert_eq!(locs(&third), vec![news(61)]);

    let metadata = server.metadata();
    for (file, index) in [
        ("text-sitemap-10-1-1", "text-sitemaps-index-1"),
        ("text-sitemap-10-1-2", "text-sitemaps-index-1"),
        ("text-sitemap-10-1-3", "text-sitemaps-index-2"),
    ] {
        let row = metadata.get_sitemap_file(file).await.unwrap().unwrap();
        assert_eq!(row.index_file_name, index, "{file}");
    }
    assert!(metadata.get_index_file("text-sitemaps-index-2").await.unwrap().is_some());
}

#[tokio::test]
async fn index_linking_and_robots_promotion() {
    let server = TestServer::new().await;
    let storage = server.storage();
    seed_storage(storage.as_ref(), &server.state.config.sitemaps)
        .await
        .unwrap();

    ingest(
        &server.state.ingestor,
        [text_created(1), text_created(2), video_created(3, "Launch")],
    )
    .await;
    let stats = server.state.scheduler.run_all().await;
    assert_eq!(stats.failed, 0);

    let text_index = read_index(storage.as_ref(), EntityKind::Text, "text-sitemaps-index-1").await;
    let linked: Vec<&str> = text_index.entries.iter().map(|e| e.loc.as_str()).collect();
    assert_eq!(
        linked,
        vec![
            "https://www.example.com/sitemaps/sitemap/text-sitemap-10-1-1",
            "https://www.example.com/sitemaps/sitemap/text-sitemap-10-2-1",
        ]
    );
    assert!(text_index.entries.iter().all(|e| e.lastmod.is_some()));
    assert_eq!(
        leaf_lifecycle(&server, "text-sitemap-10-1-1").await,
        SitemapFileLifecycle::LinkedToIndex
    );

    let robots = String::from_utf8(storage.get(ROBOTS_FILE).await.unwrap().to_vec()).unwrap();
    assert!(robots.starts_with("User-agent: *"));
    assert!(robots.contains("Sitemap: https://www.example.com/sitemaps/index/text-sitemaps-index-1"));
    assert!(robots.contains("Sitemap: https://www.example.com/sitemaps/index/video-sitemaps-index-1"));

    let index = server
        .metadata()
        .get_index_file("video-sitemaps-index-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(index.lifecycle().unwrap(), IndexFileLifecycle::LinkedToRobots);

    // A second full run changes nothing.
    server.state.scheduler.run_all().await;
    let again = String::from_utf8(storage.get(ROBOTS_FILE).await.unwrap().to_vec()).unwrap();
    assert_eq!(robots, again);
}

#[tokio::test]
async fn leaf_lifecycle_never_skips_linked_to_index() {
    let server = TestServer::new().await;
    let scheduler = &server.state.scheduler;
    let file = "text-sitemap-10-1-1";

    ingest(&server.state.ingestor, [text_created(1)]).await;
    scheduler.sweep_new_links(EntityKind::Text, 1).await.unwrap();
    assert_eq!(leaf_lifecycle(&server, file).await, SitemapFileLifecycle::Uploaded);

    // Extending an unlinked file keeps it uploaded.
    ingest(&server.state.ingestor, [text_created(11)]).await;
    scheduler.sweep_new_links(EntityKind::Text, 1).await.unwrap();
    assert_eq!(leaf_lifecycle(&server, file).await, SitemapFileLifecycle::Uploaded);

    let stats = scheduler.sweep_lastmod(EntityKind::Text).await.unwrap();
    assert_eq!(stats.groups, 0);

    scheduler.sweep_index_links(EntityKind::Text).await.unwrap();
    assert_eq!(leaf_lifecycle(&server, file).await, SitemapFileLifecycle::LinkedToIndex);

    // A later edit asks for a lastmod refresh.
    ingest(&server.state.ingestor, [text_deleted(1)]).await;
    scheduler.sweep_deletions(EntityKind::Text).await.unwrap();
    assert_eq!(
        leaf_lifecycle(&server, file).await,
        SitemapFileLifecycle::MarkedForLastmodUpdate
    );

    let stats = scheduler.sweep_lastmod(EntityKind::Text).await.unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(leaf_lifecycle(&server, file).await, SitemapFileLifecycle::LinkedToIndex);

    let index = read_index(server.storage().as_ref(), EntityKind::Text, "text-sitemaps-index-1").await;
    assert_eq!(index.entries.len(), 1);
}

#[tokio::test]
async fn deletion_retires_entry_and_repeats_are_noops() {
    let server = TestServer::new().await;
    let scheduler = &server.state.scheduler;
    let storage = server.storage();

    ingest(&server.state.ingestor, [text_created(1), text_created(11)]).await;
    scheduler.sweep_new_links(EntityKind::Text, 1).await.unwrap();

    ingest(&server.state.ingestor, [text_deleted(1)]).await;
    let stats = scheduler.sweep_deletions(EntityKind::Text).await.unwrap();
    assert_eq!(stats.succeeded, 1);

    let listing = read_leaf(storage.as_ref(), EntityKind::Text, "text-sitemap-10-1-1").await;
    let retired = &listing.entries[0];
    assert_eq!(retired.loc, news(1));
    assert_eq!(retired.changefreq, Some(ChangeFreq::Never));
    assert_eq!(listing.entries[1].changefreq, Some(ChangeFreq::Hourly));

    let row = server.metadata().get_link(EntityKind::Text, 1).await.unwrap().unwrap();
    assert_eq!(row.state().unwrap(), LinkState::Deleted);

    let before = storage.get("text-sitemaps/text-sitemap-10-1-1").await.unwrap();
    ingest(&server.state.ingestor, [text_deleted(1)]).await;
    let stats = scheduler.sweep_deletions(EntityKind::Text).await.unwrap();
    assert_eq!(stats.groups, 0);
    let after = storage.get("text-sitemaps/text-sitemap-10-1-1").await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn unassigned_deletion_never_touches_storage() {
    let storage = Arc::new(UnreachableStore::default());
    let server = TestServer::with_storage(storage.clone()).await;

    ingest(&server.state.ingestor, [text_created(5), text_deleted(5)]).await;
    let row = server.metadata().get_link(EntityKind::Text, 5).await.unwrap().unwrap();
    assert_eq!(row.state().unwrap(), LinkState::MarkedForDeletion);

    let stats = server
        .state
        .scheduler
        .sweep_deletions(EntityKind::Text)
        .await
        .unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 0);

    let row = server.metadata().get_link(EntityKind::Text, 5).await.unwrap().unwrap();
    assert_eq!(row.state().unwrap(), LinkState::Deleted);
    assert_eq!(storage.calls(), 0);

    // Deleted records never become pending again.
    let stats = server
        .state
        .scheduler
        .sweep_new_links(EntityKind::Text, 5)
        .await
        .unwrap();
    assert_eq!(stats.groups, 0);
    assert_eq!(storage.calls(), 0);
}

#[tokio::test]
async fn video_update_replaces_block() {
    let server = TestServer::new().await;
    let scheduler = &server.state.scheduler;

    ingest(&server.state.ingestor, [video_created(7, "Launch")]).await;
    scheduler.sweep_new_links(EntityKind::Video, 7).await.unwrap();

    let listing = read_leaf(server.storage().as_ref(), EntityKind::Video, "video-sitemap-10-7-1").await;
    let entry = &listing.entries[0];
    assert_eq!(entry.loc, format!("{FRONTEND}/videos/7"));
    assert_eq!(entry.changefreq, Some(ChangeFreq::Weekly));
    assert_eq!(entry.videos.len(), 1);
    assert_eq!(entry.videos[0].title.as_deref(), Some("Launch"));
    assert_eq!(entry.videos[0].duration_secs, Some(95));

    ingest(&server.state.ingestor, [video_updated(7, "Launch (extended)")]).await;
    let row = server.metadata().get_link(EntityKind::Video, 7).await.unwrap().unwrap();
    assert_eq!(row.state().unwrap(), LinkState::MarkedForUpdate);

    let stats = scheduler.sweep_updates(EntityKind::Video).await.unwrap();
    assert_eq!(stats.succeeded, 1);

    let listing = read_leaf(server.storage().as_ref(), EntityKind::Video, "video-sitemap-10-7-1").await;
    let entry = &listing.entries[0];
    assert_eq!(entry.changefreq, Some(ChangeFreq::Hourly));
    assert_eq!(entry.videos.len(), 1);
    assert_eq!(entry.videos[0].title.as_deref(), Some("Launch (extended)"));

    let row = server.metadata().get_link(EntityKind::Video, 7).await.unwrap().unwrap();
    assert_eq!(row.state().unwrap(), LinkState::Assigned);
}

#[tokio::test]
async fn locked_file_is_skipped_until_released() {
    let server = TestServer::new().await;
    let scheduler = &server.state.scheduler;
    ingest(&server.state.ingestor, [text_created(3)]).await;

    let guard = server.state.locks.acquire("text-sitemap-10-3-1").await.unwrap();
    let stats = scheduler.sweep_new_links(EntityKind::Text, 3).await.unwrap();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.succeeded, 0);

    let row = server.metadata().get_link(EntityKind::Text, 3).await.unwrap().unwrap();
    assert_eq!(row.state().unwrap(), LinkState::Pending);

    guard.release().await;
    let stats = scheduler.sweep_new_links(EntityKind::Text, 3).await.unwrap();
    assert_eq!(stats.succeeded, 1);
    let row = server.metadata().get_link(EntityKind::Text, 3).await.unwrap().unwrap();
    assert_eq!(row.state().unwrap(), LinkState::Assigned);
}

#[tokio::test]
async fn missing_leaf_object_is_rebuilt_on_append() {
    let server = TestServer::new().await;
    let scheduler = &server.state.scheduler;
    let storage = server.storage();

    ingest(&server.state.ingestor, [text_created(1)]).await;
    scheduler.sweep_new_links(EntityKind::Text, 1).await.unwrap();
    storage.delete("text-sitemaps/text-sitemap-10-1-1").await.unwrap();

    ingest(&server.state.ingestor, [text_created(11)]).await;
    scheduler.sweep_new_links(EntityKind::Text, 1).await.unwrap();

    let listing = read_leaf(storage.as_ref(), EntityKind::Text, "text-sitemap-10-1-1").await;
    assert_eq!(locs(&listing), vec![news(1), news(11)]);
}

#[tokio::test]
async fn new_links_sweep_takes_one_batch_per_run() {
    let server = TestServer::with_config(|c| c.sitemaps.batch_size = 2).await;
    let scheduler = &server.state.scheduler;
    ingest(&server.state.ingestor, [1, 11, 21, 31, 41].map(text_created)).await;

    let stats = scheduler.sweep_new_links(EntityKind::Text, 1).await.unwrap();
    assert_eq!((stats.groups, stats.records), (1, 2));

    // Counters 3 and 4 straddle the boundary between the first two files.
    let stats = scheduler.sweep_new_links(EntityKind::Text, 1).await.unwrap();
    assert_eq!((stats.groups, stats.records), (2, 2));

    let stats = scheduler.sweep_new_links(EntityKind::Text, 1).await.unwrap();
    assert_eq!((stats.groups, stats.records), (1, 1));

    let stats = scheduler.sweep_new_links(EntityKind::Text, 1).await.unwrap();
    assert_eq!(stats.groups, 0);

    let second = read_leaf(server.storage().as_ref(), EntityKind::Text, "text-sitemap-10-1-2").await;
    assert_eq!(locs(&second), vec![news(31), news(41)]);
}

#[tokio::test]
async fn blocked_file_does_not_hold_back_its_siblings() {
    let gate = Arc::new(
        GatedStore::new("text-sitemaps/text-sitemap-10-1-1")
            .await
            .unwrap(),
    );
    let server = TestServer::with_storage(gate.clone()).await;
    let metadata = server.metadata();
    ingest(&server.state.ingestor, [1, 11, 21, 31, 41].map(text_created)).await;

    let sweep = server.state.scheduler.sweep_new_links(EntityKind::Text, 1);
    let observe = async {
        gate.entered().await;
        tokio::time::timeout(Duration::from_secs(10), async {
            while metadata
                .get_sitemap_file("text-sitemap-10-1-2")
                .await
                .unwrap()
                .is_none()
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("second file was not written while the first was blocked");
        assert!(
            metadata
                .get_sitemap_file("text-sitemap-10-1-1")
                .await
                .unwrap()
                .is_none()
        );
        gate.open();
    };

    let (stats, ()) = tokio::join!(sweep, observe);
    let stats = stats.unwrap();
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.records, 5);

    let first = read_leaf(server.storage().as_ref(), EntityKind::Text, "text-sitemap-10-1-1").await;
    assert_eq!(locs(&first), vec![news(1), news(11), news(21)]);
}

#[tokio::test]
async fn repeated_deletion_leaves_file_row_alone() {
    let server = TestServer::new().await;
    let scheduler = &server.state.scheduler;
    let file = "text-sitemap-10-1-1";

    ingest(&server.state.ingestor, [text_created(1), text_created(11)]).await;
    scheduler.sweep_new_links(EntityKind::Text, 1).await.unwrap();
    scheduler.sweep_index_links(EntityKind::Text).await.unwrap();
    ingest(&server.state.ingestor, [text_deleted(1)]).await;
    scheduler.sweep_deletions(EntityKind::Text).await.unwrap();
    scheduler.sweep_lastmod(EntityKind::Text).await.unwrap();

    let before = server.metadata().get_sitemap_file(file).await.unwrap().unwrap();
    assert_eq!(before.lifecycle().unwrap(), SitemapFileLifecycle::LinkedToIndex);
    let object = server.storage().get("text-sitemaps/text-sitemap-10-1-1").await.unwrap();

    // The entry is already retired, so there is nothing to rewrite.
    let row = server.metadata().get_link(EntityKind::Text, 1).await.unwrap().unwrap();
    let outcome = server
        .state
        .assembler
        .process_deletions(EntityKind::Text, file, &[row])
        .await
        .unwrap();
    assert_eq!(outcome.changed, 0);

    let after = server.metadata().get_sitemap_file(file).await.unwrap().unwrap();
    assert_eq!(after.lifecycle().unwrap(), SitemapFileLifecycle::LinkedToIndex);
    assert_eq!(after.updated_at, before.updated_at);
    assert_eq!(
        server.storage().get("text-sitemaps/text-sitemap-10-1-1").await.unwrap(),
        object
    );
    assert_eq!(scheduler.sweep_lastmod(EntityKind::Text).await.unwrap().groups, 0);
}

#[tokio::test]
async fn leaf_rewritten_during_lastmod_refresh_stays_marked() {
    let server = TestServer::new().await;
    let scheduler = &server.state.scheduler;
    let file = "text-sitemap-10-1-1";

    ingest(&server.state.ingestor, [text_created(1)]).await;
    scheduler.sweep_new_links(EntityKind::Text, 1).await.unwrap();
    scheduler.sweep_index_links(EntityKind::Text).await.unwrap();

    ingest(&server.state.ingestor, [text_created(11)]).await;
    scheduler.sweep_new_links(EntityKind::Text, 1).await.unwrap();
    let selected = server
        .metadata()
        .find_sitemap_files_by_lifecycle(EntityKind::Text, SitemapFileLifecycle::MarkedForLastmodUpdate, 10)
        .await
        .unwrap();
    assert_eq!(selected.len(), 1);

    // Another append lands after the refresh picked the leaf up.
    tokio::time::sleep(Duration::from_millis(5)).await;
    ingest(&server.state.ingestor, [text_created(21)]).await;
    scheduler.sweep_new_links(EntityKind::Text, 1).await.unwrap();

    server
        .state
        .linker
        .refresh_last_mod_in_index(EntityKind::Text, "text-sitemaps-index-1", &selected)
        .await
        .unwrap();
    assert_eq!(
        leaf_lifecycle(&server, file).await,
        SitemapFileLifecycle::MarkedForLastmodUpdate
    );

    let stats = scheduler.sweep_lastmod(EntityKind::Text).await.unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(leaf_lifecycle(&server, file).await, SitemapFileLifecycle::LinkedToIndex);
}
