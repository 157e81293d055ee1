//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult, is_pg_unique_violation};
use crate::models::*;
use crate::repos::{IndexFileRepo, LinkRepo, LockRepo, SitemapFileRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use sitemaps_core::config::PgSslMode;
use sitemaps_core::{EntityKind, IndexFileLifecycle, SitemapFileLifecycle};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{PgConnection, Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

fn state_names<T: Copy>(states: &[T], name: impl Fn(T) -> &'static str) -> Vec<String> {
    states.iter().map(|s| name(*s).to_string()).collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(url: &str, max_connections: u32) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections).await
    }

    /// Create a new PostgreSQL store from individual connection parameters,
    /// so the password can come from its own environment variable.
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections).await
    }

    async fn connect(opts: PgConnectOptions, max_connections: u32) -> MetadataResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // Prepared statements cannot hold several commands.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

async fn apply_link_change(
    conn: &mut PgConnection,
    kind: EntityKind,
    link_ids: &[i64],
    change: &LinkChange,
    now: OffsetDateTime,
) -> MetadataResult<u64> {
    if link_ids.is_empty() {
        return Ok(0);
    }
    let result = match change {
        LinkChange::Assigned(file_name) => {
            sqlx::query(
                r#"
                UPDATE sitemap_links SET file_name = $1, updated_at = $2
                WHERE kind = $3 AND file_name IS NULL AND link_id = ANY($4)
                "#,
            )
            .bind(file_name)
            .bind(now)
            .bind(kind.as_str())
            .bind(link_ids)
            .execute(&mut *conn)
            .await?
        }
        LinkChange::Deleted => {
            sqlx::query(
                r#"
                UPDATE sitemap_links SET deletion_cycle = 'deleted', updated_at = $1
                WHERE kind = $2 AND deletion_cycle = 'marked_for_deletion' AND link_id = ANY($3)
                "#,
            )
            .bind(now)
            .bind(kind.as_str())
            .bind(link_ids)
            .execute(&mut *conn)
            .await?
        }
        LinkChange::UpdateCleared => {
            sqlx::query(
                r#"
                UPDATE sitemap_links SET is_marked_for_update = FALSE, updated_at = $1
                WHERE kind = $2 AND is_marked_for_update AND link_id = ANY($3)
                "#,
            )
            .bind(now)
            .bind(kind.as_str())
            .bind(link_ids)
            .execute(&mut *conn)
            .await?
        }
    };
    Ok(result.rows_affected())
}

#[async_trait]
impl LockRepo for PostgresStore {
    async fn insert_lock(&self, lock: &LockRow) -> MetadataResult<()> {
        let result =
            sqlx::query("INSERT INTO job_locks (lock_key, holder, acquired_at) VALUES ($1, $2, $3)")
                .bind(&lock.lock_key)
                .bind(lock.holder)
                .bind(lock.acquired_at)
                .execute(&self.pool)
                .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_pg_unique_violation(&e) => Err(MetadataError::AlreadyExists(format!(
                "lock '{}' is held",
                lock.lock_key
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_lock(&self, key: &str) -> MetadataResult<Option<LockRow>> {
        let row = sqlx::query_as::<_, LockRow>("SELECT * FROM job_locks WHERE lock_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn delete_lock(&self, key: &str) -> MetadataResult<bool> {
        let result = sqlx::query("DELETE FROM job_locks WHERE lock_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_lock_if_held(&self, key: &str, holder: Uuid) -> MetadataResult<bool> {
        let result = sqlx::query("DELETE FROM job_locks WHERE lock_key = $1 AND holder = $2")
            .bind(key)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl LinkRepo for PostgresStore {
    async fn create_link(&self, link: &NewLink) -> MetadataResult<LinkRow> {
        let mut tx = self.pool.begin().await?;

        let counter: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO partition_counters (kind, partition_base, partition_value, counter)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (kind, partition_base, partition_value)
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
            VALUES ($1, $2, $3, $4, $5, $6, NULL, $7, FALSE, NULL, FALSE,
                    $8, $9, $10, $11, $12, $13, $14, $15)
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
            Err(e) if is_pg_unique_violation(&e) => {
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
            "SELECT * FROM sitemap_links WHERE kind = $1 AND link_id = $2",
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
            SET is_deleted = TRUE,
                deletion_cycle = CASE WHEN is_ignored THEN 'deleted' ELSE 'marked_for_deletion' END,
                updated_at = $1
            WHERE kind = $2 AND link_id = $3 AND deletion_cycle IS NULL
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
            SET link = CASE WHEN file_name IS NULL THEN COALESCE($1, link) ELSE link END,
                is_ignored = $2,
                title = $3,
                description = $4,
                thumbnail_url = $5,
                player_url = $6,
                duration_secs = $7,
                published_at = $8,
                is_marked_for_update = NOT ($2 OR is_deleted),
                updated_at = $9
            WHERE kind = $10 AND link_id = $11
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
            WHERE kind = $1 AND partition_base = $2 AND partition_value = $3
              AND file_name IS NULL AND NOT is_deleted AND NOT is_ignored
            ORDER BY counter ASC
            LIMIT $4
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
            WHERE kind = $1 AND deletion_cycle = 'marked_for_deletion'
            ORDER BY counter ASC
            LIMIT $2
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
            WHERE kind = $1 AND is_marked_for_update
              AND NOT is_deleted AND deletion_cycle IS NULL
            ORDER BY counter ASC
            LIMIT $2
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
            "SELECT * FROM sitemap_links WHERE file_name = $1 ORDER BY counter ASC",
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
        let mut tx = self.pool.begin().await?;
        let changed = apply_link_change(&mut tx, kind, link_ids, change, now).await?;
        tx.commit().await?;
        Ok(changed)
    }
}

#[async_trait]
impl SitemapFileRepo for PostgresStore {
    async fn get_sitemap_file(&self, file_name: &str) -> MetadataResult<Option<SitemapFileRow>> {
        let row =
            sqlx::query_as::<_, SitemapFileRow>("SELECT * FROM sitemap_files WHERE file_name = $1")
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
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
            Err(e) if is_pg_unique_violation(&e) => {
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

        let sources = state_names(
            SitemapFileLifecycle::sources_for(SitemapFileLifecycle::MarkedForLastmodUpdate),
            SitemapFileLifecycle::as_str,
        );
        let result = sqlx::query(
            r#"
            UPDATE sitemap_files
            SET lifecycle = CASE WHEN lifecycle = ANY($1) THEN $2 ELSE lifecycle END,
                updated_at = $3
            WHERE file_name = $4
            "#,
        )
        .bind(&sources)
        .bind(SitemapFileLifecycle::MarkedForLastmodUpdate.as_str())
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
            WHERE kind = $1 AND lifecycle = $2
            ORDER BY created_at ASC, file_name ASC
            LIMIT $3
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
        let result = sqlx::query(
            r#"
            UPDATE sitemap_files SET lifecycle = $1, updated_at = $2
            WHERE lifecycle = ANY($3) AND file_name = ANY($4)
            "#,
        )
        .bind(target.as_str())
        .bind(now)
        .bind(state_names(sources, SitemapFileLifecycle::as_str))
        .bind(file_names)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl IndexFileRepo for PostgresStore {
    async fn get_index_file(&self, file_name: &str) -> MetadataResult<Option<IndexFileRow>> {
        let row = sqlx::query_as::<_, IndexFileRow>(
            "SELECT * FROM sitemap_index_files WHERE file_name = $1",
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
            VALUES ($1, $2, $3, $4, $5, $6, $7)
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
            Err(e) if is_pg_unique_violation(&e) => Err(MetadataError::AlreadyExists(format!(
                "index file '{}'",
                file.file_name
            ))),
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
            WHERE lifecycle = $1
            ORDER BY created_at ASC, file_name ASC
            LIMIT $2
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
        let result = sqlx::query(
            r#"
            UPDATE sitemap_index_files SET lifecycle = $1, updated_at = $2
            WHERE lifecycle = ANY($3) AND file_name = ANY($4)
            "#,
        )
        .bind(target.as_str())
        .bind(now)
        .bind(state_names(sources, IndexFileLifecycle::as_str))
        .bind(file_names)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::postgres_schema_statements;

    #[test]
    fn test_schema_statements_skip_comment_only_chunks() {
        let statements = postgres_schema_statements(super::POSTGRES_SCHEMA);
        assert!(!statements.is_empty());
        assert!(statements.iter().all(|s| !s.trim().is_empty()));
        assert!(statements.iter().any(|s| s.contains("CREATE TABLE IF NOT EXISTS job_locks")));
    }

    #[test]
    fn test_schema_statements_ignore_trailing_comment() {
        let schema = "CREATE TABLE a (id int);\n-- trailing note\n";
        assert_eq!(postgres_schema_statements(schema), vec!["CREATE TABLE a (id int)"]);
    }
}
