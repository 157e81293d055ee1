//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Hard protocol limit on entries per sitemap or sitemap index.
pub const PROTOCOL_MAX_ENTRIES: u64 = 50_000;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// Falls back to the default AWS credential chain when unset.
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        /// Force path-style URLs. Required for MinIO.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ),
            },
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }

    /// Base URL objects are reachable under, used when no explicit
    /// `sitemaps.location_base_url` is configured.
    pub fn default_location_base_url(&self) -> String {
        match self {
            StorageConfig::S3 {
                bucket,
                endpoint: Some(endpoint),
                force_path_style: true,
                ..
            } => format!("{}/{bucket}", endpoint.trim_end_matches('/')),
            StorageConfig::S3 { bucket, .. } => format!("https://{bucket}.s3.amazonaws.com"),
            StorageConfig::Filesystem { path } => format!("file://{}", path.display()),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (testing and single-node deployments).
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
    /// PostgreSQL database. Required when several nodes share the lock table.
    Postgres {
        /// Connection URL. Takes precedence over individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// Prefer SITEMAPS_METADATA__PASSWORD over storing this in a file.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) | (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => Err(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ),
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

/// Sitemap layout and assembly settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SitemapsConfig {
    /// Public origin crawlers reach the sitemaps on (e.g. "https://example.com").
    #[serde(default = "default_frontend_domain")]
    pub frontend_domain: String,
    /// Base URL stored as each file's object location. Derived from the
    /// storage backend when unset.
    #[serde(default)]
    pub location_base_url: Option<String>,
    /// Entries per leaf sitemap before the next file increment.
    #[serde(default = "default_max_entries_per_file")]
    pub max_entries_per_file: u64,
    /// Leaf files per index file.
    #[serde(default = "default_max_entries_per_index_file")]
    pub max_entries_per_index_file: u64,
    /// Number of partitions records are sharded into.
    #[serde(default = "default_partition_base")]
    pub partition_base: u32,
    /// Pending records pulled per partition run.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Upper bound on rows fetched by the deletion, update and linking sweeps.
    #[serde(default = "default_sweep_limit")]
    pub sweep_limit: u32,
    /// Lock lease in seconds. Locks older than this may be taken over.
    #[serde(default = "default_lock_lease_secs")]
    pub lock_lease_secs: u64,
    /// Storage key of the empty sitemap index template.
    #[serde(default = "default_index_template_key")]
    pub index_template_key: String,
}

fn default_frontend_domain() -> String {
    "http://localhost:8080".to_string()
}

fn default_max_entries_per_file() -> u64 {
    45_000
}

fn default_max_entries_per_index_file() -> u64 {
    20_000
}

fn default_partition_base() -> u32 {
    10
}

fn default_batch_size() -> u32 {
    50
}

fn default_sweep_limit() -> u32 {
    1_000
}

fn default_lock_lease_secs() -> u64 {
    900 // 15 minutes
}

fn default_index_template_key() -> String {
    "sitemap-index-empty-template.xml".to_string()
}

impl Default for SitemapsConfig {
    fn default() -> Self {
        Self {
            frontend_domain: default_frontend_domain(),
            location_base_url: None,
            max_entries_per_file: default_max_entries_per_file(),
            max_entries_per_index_file: default_max_entries_per_index_file(),
            partition_base: default_partition_base(),
            batch_size: default_batch_size(),
            sweep_limit: default_sweep_limit(),
            lock_lease_secs: default_lock_lease_secs(),
            index_template_key: default_index_template_key(),
        }
    }
}

impl SitemapsConfig {
    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("max_entries_per_file", self.max_entries_per_file),
            ("max_entries_per_index_file", self.max_entries_per_index_file),
        ] {
            if value == 0 || value > PROTOCOL_MAX_ENTRIES {
                return Err(format!(
                    "sitemaps.{name} must be between 1 and {PROTOCOL_MAX_ENTRIES}, got {value}"
                ));
            }
        }
        if self.partition_base == 0 {
            return Err("sitemaps.partition_base cannot be 0".to_string());
        }
        if self.batch_size == 0 {
            return Err("sitemaps.batch_size cannot be 0".to_string());
        }
        if self.lock_lease_secs == 0 {
            return Err("sitemaps.lock_lease_secs cannot be 0".to_string());
        }
        if !self.frontend_domain.starts_with("http://") && !self.frontend_domain.starts_with("https://")
        {
            return Err(format!(
                "sitemaps.frontend_domain must be an absolute http(s) origin, got {:?}",
                self.frontend_domain
            ));
        }
        Ok(())
    }
}

/// Time-triggered sweep schedule.
///
/// Every job fires once per `interval_secs`, at its offset into the
/// interval. Offsets are staggered so sweeps touching the same files rarely
/// overlap.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Offset of partition 0's new-links run; partition p runs at
    /// `new_links_offset_secs + p * new_links_stride_secs`.
    #[serde(default)]
    pub new_links_offset_secs: u64,
    #[serde(default = "default_new_links_stride_secs")]
    pub new_links_stride_secs: u64,
    #[serde(default = "default_text_deletions_offset_secs")]
    pub text_deletions_offset_secs: u64,
    #[serde(default = "default_text_updates_offset_secs")]
    pub text_updates_offset_secs: u64,
    #[serde(default = "default_video_deletions_offset_secs")]
    pub video_deletions_offset_secs: u64,
    #[serde(default = "default_video_updates_offset_secs")]
    pub video_updates_offset_secs: u64,
    #[serde(default = "default_text_index_link_offset_secs")]
    pub text_index_link_offset_secs: u64,
    #[serde(default = "default_video_index_link_offset_secs")]
    pub video_index_link_offset_secs: u64,
    #[serde(default = "default_text_lastmod_offset_secs")]
    pub text_lastmod_offset_secs: u64,
    #[serde(default = "default_video_lastmod_offset_secs")]
    pub video_lastmod_offset_secs: u64,
    #[serde(default = "default_robots_link_offset_secs")]
    pub robots_link_offset_secs: u64,
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_new_links_stride_secs() -> u64 {
    300
}

fn default_text_deletions_offset_secs() -> u64 {
    50 * 60
}

fn default_text_updates_offset_secs() -> u64 {
    55 * 60
}

fn default_video_deletions_offset_secs() -> u64 {
    25 * 60
}

fn default_video_updates_offset_secs() -> u64 {
    35 * 60
}

fn default_text_index_link_offset_secs() -> u64 {
    10 * 60
}

fn default_video_index_link_offset_secs() -> u64 {
    15 * 60
}

fn default_text_lastmod_offset_secs() -> u64 {
    20 * 60
}

fn default_video_lastmod_offset_secs() -> u64 {
    30 * 60
}

fn default_robots_link_offset_secs() -> u64 {
    45 * 60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            interval_secs: default_interval_secs(),
            new_links_offset_secs: 0,
            new_links_stride_secs: default_new_links_stride_secs(),
            text_deletions_offset_secs: default_text_deletions_offset_secs(),
            text_updates_offset_secs: default_text_updates_offset_secs(),
            video_deletions_offset_secs: default_video_deletions_offset_secs(),
            video_updates_offset_secs: default_video_updates_offset_secs(),
            text_index_link_offset_secs: default_text_index_link_offset_secs(),
            video_index_link_offset_secs: default_video_index_link_offset_secs(),
            text_lastmod_offset_secs: default_text_lastmod_offset_secs(),
            video_lastmod_offset_secs: default_video_lastmod_offset_secs(),
            robots_link_offset_secs: default_robots_link_offset_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        // next-fire arithmetic is modulo the interval
        if self.interval_secs == 0 {
            return Err("scheduler.interval_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Crawler notification after a leaf file changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Ping endpoint; the sitemap link is appended URL-encoded.
    #[serde(default = "default_ping_url")]
    pub ping_url: String,
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ping_url() -> String {
    "https://www.google.com/ping?sitemap=".to_string()
}

fn default_notify_timeout_secs() -> u64 {
    10
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ping_url: default_ping_url(),
            timeout_secs: default_notify_timeout_secs(),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub sitemaps: SitemapsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Filesystem storage, SQLite metadata, no
    /// background scheduler and no crawler pings.
    pub fn for_testing() -> Self {
        Self {
            scheduler: SchedulerConfig {
                enabled: false,
                ..SchedulerConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate every section. The first failure is returned.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.metadata.validate()?;
        self.sitemaps.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }

    /// Location base URL, explicit or derived from storage.
    pub fn location_base_url(&self) -> String {
        self.sitemaps
            .location_base_url
            .clone()
            .unwrap_or_else(|| self.storage.default_location_base_url())
    }
}
