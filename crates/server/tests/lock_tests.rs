//! Lease lock contention against both metadata backends.

mod common;

use common::run_metadata_test_both;
use sitemaps_metadata::models::LockRow;
use sitemaps_server::lock::LockGuard;
use sitemaps_server::{LockError, LockManager};
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

const LEASE: Duration = Duration::from_secs(900);

/// Start `contenders` acquisitions of `key` at once. Returns the guards that
/// won and how many were turned away.
async fn race(locks: &LockManager, key: &str, contenders: usize) -> (Vec<LockGuard>, usize) {
    let handles: Vec<_> = (0..contenders)
        .map(|_| {
            let locks = locks.clone();
            let key = key.to_string();
            tokio::spawn(async move { locks.acquire(&key).await })
        })
        .collect();

    let mut winners = Vec::new();
    let mut held = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(guard) => winners.push(guard),
            Err(LockError::Held(k)) => {
                assert_eq!(k, key);
                held += 1;
            }
            Err(e) => panic!("unexpected lock error: {e}"),
        }
    }
    (winners, held)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquires_have_one_winner() {
    run_metadata_test_both(|store| async move {
        let locks = LockManager::new(store, LEASE);

        for key in ["text-sitemap-10-1-1", "text-sitemaps-index-1", "robots.txt"] {
            let (mut winners, held) = race(&locks, key, 4).await;
            assert_eq!(winners.len(), 1, "{key}");
            assert_eq!(held, 3, "{key}");

            winners.pop().unwrap().release().await;
            let again = locks.acquire(key).await.unwrap();
            again.release().await;
        }
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn expired_lease_goes_to_one_contender() {
    run_metadata_test_both(|store| async move {
        let stale = LockRow {
            lock_key: "text-sitemap-10-2-1".to_string(),
            holder: Uuid::new_v4(),
            acquired_at: OffsetDateTime::now_utc() - time::Duration::minutes(16),
        };
        store.insert_lock(&stale).await.unwrap();
        let locks = LockManager::new(store.clone(), LEASE);

        let (mut winners, held) = race(&locks, &stale.lock_key, 4).await;
        assert_eq!(winners.len(), 1);
        assert_eq!(held, 3);

        let winner = winners.pop().unwrap();
        assert_ne!(winner.holder(), stale.holder);
        let current = store.get_lock(&stale.lock_key).await.unwrap().unwrap();
        assert_eq!(current.holder, winner.holder());
        winner.release().await;
    })
    .await;
}

#[tokio::test]
async fn force_release_drops_any_holder() {
    run_metadata_test_both(|store| async move {
        let locks = LockManager::new(store.clone(), LEASE);

        assert!(!locks.force_release("text-sitemap-10-3-1").await.unwrap());

        let guard = locks.acquire("text-sitemap-10-3-1").await.unwrap();
        assert!(locks.force_release("text-sitemap-10-3-1").await.unwrap());
        assert!(store.get_lock("text-sitemap-10-3-1").await.unwrap().is_none());

        let next = locks.acquire("text-sitemap-10-3-1").await.unwrap();
        // The evicted guard must not remove its successor.
        guard.release().await;
        let current = store.get_lock("text-sitemap-10-3-1").await.unwrap().unwrap();
        assert_eq!(current.holder, next.holder());
        next.release().await;
    })
    .await;
}
