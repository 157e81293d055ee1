//! Lock table repository.

use crate::error::MetadataResult;
use crate::models::LockRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository backing the distributed lock manager.
#[async_trait]
pub trait LockRepo: Send + Sync {
    /// Insert a lock row. Fails with `AlreadyExists` if the key is held.
    async fn insert_lock(&self, lock: &LockRow) -> MetadataResult<()>;

    async fn get_lock(&self, key: &str) -> MetadataResult<Option<LockRow>>;

    /// Delete the lock for `key` whoever holds it. Returns whether a row was removed.
    async fn delete_lock(&self, key: &str) -> MetadataResult<bool>;

    /// Delete the lock only if `holder` still owns it.
    async fn delete_lock_if_held(&self, key: &str, holder: Uuid) -> MetadataResult<bool>;
}
