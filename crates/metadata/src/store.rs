//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult, is_sqlite_unique_violation};
use crate::repos::{IndexFileRepo, LinkRepo, LockRepo, SitemapFileRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqliteConnection};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    LockRepo + LinkRepo + SitemapFileRepo + IndexFileRepo + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) a SQLite database at `path`. `":memory:"`
    /// gives a private in-memory database.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();
        let in_memory = path.as_os_str() == ":memory:";

        let opts = (if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        })
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single connection serializes writers and keeps an in-memory
            // database alive for the life of the pool.
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::info!(
            path = %path.display(),
            "SQLite metadata store ready; use PostgreSQL when several nodes share the lock table"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// SQLite has a limit of ~999 bound parameters per statement.
const IN_BATCH_SIZE: usize = 900;

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Static lifecycle names rendered as a SQL list literal.
fn state_list<T: Copy>(states: &[T], name: impl Fn(T) -> &'static str) -> String {
    states
        .iter()
        .map(|s| format!("'{}'", name(*s)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Apply a bulk link change on an open connection (usually a transaction).
async fn apply_link_change(
    conn: &mut SqliteConnection,
    kind: sitemaps_core::EntityKind,
    link_ids: &[i64],
    change: &crate::models::LinkChange,
    now: time::OffsetDateTime,
) -> MetadataResult<u64> {
    use crate::models::LinkChange;

    let (set_clause, guard) = match change {
        LinkChange::Assigned(_) => ("file_name = ?", "file_name IS NULL"),
        LinkChange::Deleted => (
            "deletion_cycle = 'deleted'",
            "deletion_cycle = 'marked_for_deletion'",
        ),
        LinkChange::UpdateCleared => ("is_marked_for_update = 0", "is_marked_for_update = 1"),
    };

    let mut changed = 0u64;
    for batch in link_ids.chunks(IN_BATCH_SIZE) {
        let sql = format!(
            "UPDATE sitemap_links SET {set_clause}, updated_at = ? \
             WHERE kind = ? AND {guard} AND link_id IN ({})",
            placeholders(batch.len())
        );
        let mut query = sqlx::query(&sql);
        if let LinkChange::Assigned(file_name) = change {
            query = query.bind(file_name);
        }
        query = query.bind(now).bind(kind.as_str());
        for id in batch {
            query = query.bind(id);
        }
        changed += query.execute(&mut *conn).await?.rows_affected();
    }
    Ok(changed)
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use sitemaps_core::{EntityKind, IndexFileLifecycle, SitemapFileLifecycle};
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl LockRepo for SqliteStore {
        async fn insert_lock(&self, lock: &LockRow) -> MetadataResult<()> {
            let result =
                sqlx::query("INSERT INTO job_locks (lock_key, holder, acquired_at) VALUES (?, ?, ?)")
                    .bind(&lock.lock_key)
                    .bind(lock.holder)
                    .bind(lock.acquired_at)
                    .execute(&self.pool)
                    .await;

            match result {
                Ok(_) => Ok(()),
                Err(e) if is_sqlite_unique_violation(&e) => Err(MetadataError::AlreadyExists(
                    format!("lock '{}' is held", lock.lock_key),
                )),
                Err(e) => Err(e.into()),
            }
        }

        async fn get_lock(&self, key: &str) -> MetadataResult<Option<LockRow>> {
            let row = sqlx::query_as::<_, LockRow>("SELECT * FROM job_locks WHERE lock_key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn delete_lock(&self, key: &str) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM job_locks WHERE lock_key = ?")
                .bind(key)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn delete_lock_if_held(&self, key: &str, holder: Uuid) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM job_locks WHERE lock_key = ? AND holder = ?")
                .bind(key)
                .bind(holder)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }
    }

    #[async_trait]
    impl LinkRepo for SqliteStore {
        async fn create_link(&self, link: &NewLink) -> MetadataResult<LinkRow> {
            let mut tx = self.pool.begin().await?;

            let counter: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO partition_counters (kind, partition_base, partition_value, counter)
                VALUES (?, ?, ?, 1)
                ON CONFLICT(kind, partition_base, partition_value)
                DO UPDATE SET counter = partition_counters.counter + 1
                RETURNING counter
                "#,
            )
            .bind(link.kind.as_str())
            .bind(i64::from(link.partition_base))
            .bind(i64::from(link.partition_value))
            .fetch_one(&mut *tx)
            .await?;

            let inserted = sqlx::query_as::<_, LinkRow>(
                r#"
                INSERT INTO sitemap_links (
                    kind, link_id, link, partition_base, partition_value, counter,
                    file_name, is_ignored, is_deleted, deletion_cycle, is_marked_for_update,
                    title, description, thumbnail_url, player_url, duration_secs, published_at,
                    created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, NULL, ?, 0, NULL, 0, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(link.kind.as_str())
            .bind(link.link_id)
            .bind(&link.link)
            .bind(i64::from(link.partition_base))
            .bind(i64::from(link.partition_value))
            .bind(counter)
            .bind(link.is_ignored)
            .bind(&link.video.title)
            .bind(&link.video.description)
            .bind(&link.video.thumbnail_url)
            .bind(&link.video.player_url)
            .bind(link.video.duration_secs)
            .bind(link.video.published_at)
            .bind(link.created_at)
            .bind(link.updated_at)
            .fetch_one(&mut *tx)
            .await;

            let row = match inserted {
                Ok(row) => row,
                // Dropping the transaction rolls the counter back.
                Err(e) if is_sqlite_unique_violation(&e) => {
                    return Err(MetadataError::AlreadyExists(format!(
                        "{} link {}",
                        link.kind, link.link_id
                    )));
                }
                Err(e) => return Err(e.into()),
            };

            tx.commit().await?;
            Ok(row)
        }

        async fn get_link(&self, kind: EntityKind, link_id: i64) -> MetadataResult<Option<LinkRow>> {
            let row = sqlx::query_as::<_, LinkRow>(
                "SELECT * FROM sitemap_links WHERE kind = ? AND link_id = ?",
            )
            .bind(kind.as_str())
            .bind(link_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn mark_link_deleted(
            &self,
            kind: EntityKind,
            link_id: i64,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE sitemap_links
                SET is_deleted = 1,
                    deletion_cycle = CASE WHEN is_ignored = 1 THEN 'deleted' ELSE 'marked_for_deletion' END,
                    updated_at = ?
                WHERE kind = ? AND link_id = ? AND deletion_cycle IS NULL
                "#,
            )
            .bind(now)
            .bind(kind.as_str())
            .bind(link_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn update_link(
            &self,
            kind: EntityKind,
            link_id: i64,
            patch: &LinkPatch,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE sitemap_links
                SET link = CASE WHEN file_name IS NULL THEN COALESCE(?, link) ELSE link END,
                    is_ignored = ?,
                    title = ?,
                    description = ?,
                    thumbnail_url = ?,
                    player_url = ?,
                    duration_secs = ?,
                    published_at = ?,
                    is_marked_for_update = CASE WHEN ? = 1 OR is_deleted = 1 THEN 0 ELSE 1 END,
                    updated_at = ?
                WHERE kind = ? AND link_id = ?
                "#,
            )
            .bind(&patch.link)
            .bind(patch.is_ignored)
            .bind(&patch.video.title)
            .bind(&patch.video.description)
            .bind(&patch.video.thumbnail_url)
            .bind(&patch.video.player_url)
            .bind(patch.video.duration_secs)
            .bind(patch.video.published_at)
            .bind(patch.is_ignored)
            .bind(now)
            .bind(kind.as_str())
            .bind(link_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn find_pending_links(
            &self,
            kind: EntityKind,
            partition_base: u32,
            partition_value: u32,
            limit: u32,
        ) -> MetadataResult<Vec<LinkRow>> {
            let rows = sqlx::query_as::<_, LinkRow>(
                r#"
                SELECT * FROM sitemap_links
                WHERE kind = ? AND partition_base = ? AND partition_value = ?
                  AND file_name IS NULL AND is_deleted = 0 AND is_ignored = 0
                ORDER BY counter ASC
                LIMIT ?
                "#,
            )
            .bind(kind.as_str())
            .bind(i64::from(partition_base))
            .bind(i64::from(partition_value))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn find_links_marked_for_deletion(
            &self,
            kind: EntityKind,
            limit: u32,
        ) -> MetadataResult<Vec<LinkRow>> {
            let rows = sqlx::query_as::<_, LinkRow>(
                r#"
                SELECT * FROM sitemap_links
                WHERE kind = ? AND deletion_cycle = 'marked_for_deletion'
                ORDER BY counter ASC
                LIMIT ?
                "#,
            )
            .bind(kind.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn find_links_marked_for_update(
            &self,
            kind: EntityKind,
            limit: u32,
        ) -> MetadataResult<Vec<LinkRow>> {
            let rows = sqlx::query_as::<_, LinkRow>(
                r#"
                SELECT * FROM sitemap_links
                WHERE kind = ? AND is_marked_for_update = 1
                  AND is_deleted = 0 AND deletion_cycle IS NULL
                ORDER BY counter ASC
                LIMIT ?
                "#,
            )
            .bind(kind.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn find_links_by_file(&self, file_name: &str) -> MetadataResult<Vec<LinkRow>> {
            let rows = sqlx::query_as::<_, LinkRow>(
                "SELECT * FROM sitemap_links WHERE file_name = ? ORDER BY counter ASC",
            )
            .bind(file_name)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn bulk_set_link_state(
            &self,
            kind: EntityKind,
            link_ids: &[i64],
            change: &LinkChange,
            now: OffsetDateTime,
        ) -> MetadataResult<u64> {
            if link_ids.is_empty() {
                return Ok(0);
            }
            let mut tx = self.pool.begin().await?;
            let changed = apply_link_change(&mut tx, kind, link_ids, change, now).await?;
            tx.commit().await?;
            Ok(changed)
        }
    }

    #[async_trait]
    impl SitemapFileRepo for SqliteStore {
        async fn get_sitemap_file(&self, file_name: &str) -> MetadataResult<Option<SitemapFileRow>> {
            let row = sqlx::query_as::<_, SitemapFileRow>(
                "SELECT * FROM sitemap_files WHERE file_name = ?",
            )
            .bind(file_name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn create_sitemap_file_with_links(
            &self,
            file: &SitemapFileRow,
            link_ids: &[i64],
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;

            let inserted = sqlx::query(
                r#"
                INSERT INTO sitemap_files (
                    file_name, kind, index_file_name, link, location, lifecycle, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&file.file_name)
            .bind(&file.kind)
            .bind(&file.index_file_name)
            .bind(&file.link)
            .bind(&file.location)
            .bind(&file.lifecycle)
            .bind(file.created_at)
            .bind(file.updated_at)
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => {}
                Err(e) if is_sqlite_unique_violation(&e) => {
                    return Err(MetadataError::AlreadyExists(format!(
                        "sitemap file '{}'",
                        file.file_name
                    )));
                }
                Err(e) => return Err(e.into()),
            }

            let kind = file.entity_kind()?;
            apply_link_change(
                &mut tx,
                kind,
                link_ids,
                &LinkChange::Assigned(file.file_name.clone()),
                file.created_at,
            )
            .await?;

            tx.commit().await?;
            Ok(())
        }

        async fn commit_sitemap_file_changes(
            &self,
            file_name: &str,
            kind: EntityKind,
            link_ids: &[i64],
            change: &LinkChange,
            now: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let mut tx = self.pool.begin().await?;

            let changed = apply_link_change(&mut tx, kind, link_ids, change, now).await?;

            let sources = state_list(
                SitemapFileLifecycle::sources_for(SitemapFileLifecycle::MarkedForLastmodUpdate),
                SitemapFileLifecycle::as_str,
            );
            let sql = format!(
                "UPDATE sitemap_files \
                 SET lifecycle = CASE WHEN lifecycle IN ({sources}) \
                     THEN 'marked_for_lastmod_update' ELSE lifecycle END, \
                     updated_at = ? \
                 WHERE file_name = ?"
            );
            let result = sqlx::query(&sql)
                .bind(now)
                .bind(file_name)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("sitemap file '{file_name}'")));
            }

            tx.commit().await?;
            Ok(changed)
        }

        async fn find_sitemap_files_by_lifecycle(
            &self,
            kind: EntityKind,
            lifecycle: SitemapFileLifecycle,
            limit: u32,
        ) -> MetadataResult<Vec<SitemapFileRow>> {
            let rows = sqlx::query_as::<_, SitemapFileRow>(
                r#"
                SELECT * FROM sitemap_files
                WHERE kind = ? AND lifecycle = ?
                ORDER BY created_at ASC, file_name ASC
                LIMIT ?
                "#,
            )
            .bind(kind.as_str())
            .bind(lifecycle.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn set_sitemap_files_lifecycle(
            &self,
            file_names: &[String],
            target: SitemapFileLifecycle,
            now: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let sources = SitemapFileLifecycle::sources_for(target);
            if file_names.is_empty() || sources.is_empty() {
                return Ok(0);
            }
            let sources = state_list(sources, SitemapFileLifecycle::as_str);

            let mut changed = 0u64;
            for batch in file_names.chunks(IN_BATCH_SIZE) {
                let sql = format!(
                    "UPDATE sitemap_files SET lifecycle = ?, updated_at = ? \
                     WHERE lifecycle IN ({sources}) AND file_name IN ({})",
                    placeholders(batch.len())
                );
                let mut query = sqlx::query(&sql).bind(target.as_str()).bind(now);
                for name in batch {
                    query = query.bind(name);
                }
                changed += query.execute(&self.pool).await?.rows_affected();
            }
            Ok(changed)
        }
    }

    #[async_trait]
    impl IndexFileRepo for SqliteStore {
        async fn get_index_file(&self, file_name: &str) -> MetadataResult<Option<IndexFileRow>> {
            let row = sqlx::query_as::<_, IndexFileRow>(
                "SELECT * FROM sitemap_index_files WHERE file_name = ?",
            )
            .bind(file_name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn create_index_file(&self, file: &IndexFileRow) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                INSERT INTO sitemap_index_files (
                    file_name, kind, link, location, lifecycle, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&file.file_name)
            .bind(&file.kind)
            .bind(&file.link)
            .bind(&file.location)
            .bind(&file.lifecycle)
            .bind(file.created_at)
            .bind(file.updated_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(e) if is_sqlite_unique_violation(&e) => Err(MetadataError::AlreadyExists(
                    format!("index file '{}'", file.file_name),
                )),
                Err(e) => Err(e.into()),
            }
        }

        async fn find_index_files_by_lifecycle(
            &self,
            lifecycle: IndexFileLifecycle,
            limit: u32,
        ) -> MetadataResult<Vec<IndexFileRow>> {
            let rows = sqlx::query_as::<_, IndexFileRow>(
                r#"
                SELECT * FROM sitemap_index_files
                WHERE lifecycle = ?
                ORDER BY created_at ASC, file_name ASC
                LIMIT ?
                "#,
            )
            .bind(lifecycle.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn set_index_files_lifecycle(
            &self,
            file_names: &[String],
            target: IndexFileLifecycle,
            now: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let sources = IndexFileLifecycle::sources_for(target);
            if file_names.is_empty() || sources.is_empty() {
                return Ok(0);
            }
            let sources = state_list(sources, IndexFileLifecycle::as_str);

            let mut changed = 0u64;
            for batch in file_names.chunks(IN_BATCH_SIZE) {
                let sql = format!(
                    "UPDATE sitemap_index_files SET lifecycle = ?, updated_at = ? \
                     WHERE lifecycle IN ({sources}) AND file_name IN ({})",
                    placeholders(batch.len())
                );
                let mut query = sqlx::query(&sql).bind(target.as_str()).bind(now);
                for name in batch {
                    query = query.bind(name);
                }
                changed += query.execute(&self.pool).await?.rows_affected();
            }
            Ok(changed)
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Leases for the distributed lock manager
CREATE TABLE IF NOT EXISTS job_locks (
    lock_key TEXT PRIMARY KEY,
    holder BLOB NOT NULL,
    acquired_at TEXT NOT NULL
);

-- Per-partition sequence counters
CREATE TABLE IF NOT EXISTS partition_counters (
    kind TEXT NOT NULL,
    partition_base INTEGER NOT NULL,
    partition_value INTEGER NOT NULL,
    counter INTEGER NOT NULL,
    PRIMARY KEY (kind, partition_base, partition_value)
);

-- Links listed (or waiting to be listed) in leaf sitemaps
CREATE TABLE IF NOT EXISTS sitemap_links (
    kind TEXT NOT NULL,
    link_id INTEGER NOT NULL,
    link TEXT NOT NULL,
    partition_base INTEGER NOT NULL,
    partition_value INTEGER NOT NULL,
    counter INTEGER NOT NULL,
    file_name TEXT,
    is_ignored INTEGER NOT NULL DEFAULT 0,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    deletion_cycle TEXT,
    is_marked_for_update INTEGER NOT NULL DEFAULT 0,
    title TEXT,
    description TEXT,
    thumbnail_url TEXT,
    player_url TEXT,
    duration_secs INTEGER,
    published_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (kind, link_id)
);
CREATE INDEX IF NOT EXISTS idx_sitemap_links_pending
    ON sitemap_links(kind, partition_base, partition_value, counter) WHERE file_name IS NULL;
CREATE INDEX IF NOT EXISTS idx_sitemap_links_file ON sitemap_links(file_name);
CREATE INDEX IF NOT EXISTS idx_sitemap_links_deletion ON sitemap_links(kind, deletion_cycle);
CREATE INDEX IF NOT EXISTS idx_sitemap_links_update
    ON sitemap_links(kind, is_marked_for_update) WHERE is_marked_for_update = 1;

-- Leaf sitemap files
CREATE TABLE IF NOT EXISTS sitemap_files (
    file_name TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    index_file_name TEXT NOT NULL,
    link TEXT NOT NULL,
    location TEXT NOT NULL,
    lifecycle TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sitemap_files_lifecycle ON sitemap_files(kind, lifecycle);
CREATE INDEX IF NOT EXISTS idx_sitemap_files_index ON sitemap_files(index_file_name);

-- Sitemap index files
CREATE TABLE IF NOT EXISTS sitemap_index_files (
    file_name TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    link TEXT NOT NULL,
    location TEXT NOT NULL,
    lifecycle TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sitemap_index_files_lifecycle ON sitemap_index_files(lifecycle);
"#;
