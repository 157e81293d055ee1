//! Lease locks keyed by file name.
//!
//! A lock is a row in the metadata store. Rows older than the lease are
//! considered abandoned and may be taken over; release only removes the row
//! if it still belongs to the caller.

use sitemaps_metadata::models::LockRow;
use sitemaps_metadata::{MetadataError, MetadataStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Insert attempts before giving up on a contended key.
pub const MAX_ACQUIRE_ATTEMPTS: usize = 3;

/// Lock acquisition errors.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock held: {0}")]
    Held(String),

    #[error("lock store error: {0}")]
    Store(#[from] MetadataError),
}

/// Hands out lease locks backed by the metadata store.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn MetadataStore>,
    lease: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn MetadataStore>, lease: Duration) -> Self {
        Self { store, lease }
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Acquire `key`, taking over an expired lease if one is in the way.
    pub async fn acquire(&self, key: &str) -> Result<LockGuard, LockError> {
        for attempt in 1..=MAX_ACQUIRE_ATTEMPTS {
            let row = LockRow {
                lock_key: key.to_string(),
                holder: Uuid::new_v4(),
                acquired_at: OffsetDateTime::now_utc(),
            };

            match self.store.insert_lock(&row).await {
                Ok(()) => {
                    tracing::debug!(lock_key = %key, holder = %row.holder, "Lock acquired");
                    return Ok(LockGuard {
                        store: self.store.clone(),
                        key: row.lock_key,
                        holder: row.holder,
                        released: false,
                    });
                }
                Err(e) if e.is_already_exists() => {}
                Err(e) => return Err(e.into()),
            }

            let Some(current) = self.store.get_lock(key).await? else {
                // Released between our insert and the lookup.
                continue;
            };

            if !self.is_expired(&current) {
                crate::metrics::LOCK_CONTENTION.inc();
                return Err(LockError::Held(key.to_string()));
            }

            let age = OffsetDateTime::now_utc() - current.acquired_at;
            tracing::warn!(
                lock_key = %key,
                stale_holder = %current.holder,
                age_secs = age.whole_seconds(),
                attempt,
                "Taking over expired lock"
            );
            self.store.delete_lock_if_held(key, current.holder).await?;
        }

        crate::metrics::LOCK_CONTENTION.inc();
        Err(LockError::Held(key.to_string()))
    }

    /// Run `work` while holding `key`. The lock is released on every exit path.
    pub async fn with_lock<T, E, Fut>(&self, key: &str, work: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let guard = self.acquire(key).await?;
        let result = work.await;
        guard.release().await;
        result
    }

    /// Drop a lock regardless of holder. Missing locks are not an error.
    pub async fn force_release(&self, key: &str) -> Result<bool, LockError> {
        Ok(self.store.delete_lock(key).await?)
    }

    fn is_expired(&self, lock: &LockRow) -> bool {
        let age = OffsetDateTime::now_utc() - lock.acquired_at;
        age >= self.lease
    }
}

/// A held lock. Release explicitly with [`LockGuard::release`]; dropping the
/// guard schedules a best-effort release on the current runtime.
pub struct LockGuard {
    store: Arc<dyn MetadataStore>,
    key: String,
    holder: Uuid,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn holder(&self) -> Uuid {
        self.holder
    }

    pub async fn release(mut self) {
        self.released = true;
        release_quietly(self.store.as_ref(), &self.key, self.holder).await;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(lock_key = %self.key, "Lock guard dropped outside runtime; lease will expire");
            return;
        };
        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let holder = self.holder;
        handle.spawn(async move {
            release_quietly(store.as_ref(), &key, holder).await;
        });
    }
}

async fn release_quietly(store: &dyn MetadataStore, key: &str, holder: Uuid) {
    match store.delete_lock_if_held(key, holder).await {
        Ok(true) => tracing::debug!(lock_key = %key, "Lock released"),
        Ok(false) => {
            tracing::warn!(lock_key = %key, holder = %holder, "Lock was taken over before release")
        }
        Err(e) => tracing::error!(lock_key = %key, error = %e, "Failed to release lock"),
    }
}
