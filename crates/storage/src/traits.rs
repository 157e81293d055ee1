//! Object storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;

/// Metadata about a stored object.
#[derive(Clone, Debug, Default)]
pub struct ObjectMeta {
    pub size: u64,
    pub last_modified: Option<OffsetDateTime>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
}

/// Headers attached to an object on write.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
}

impl PutOptions {
    /// Gzip-compressed sitemap XML.
    pub fn gzip_xml() -> Self {
        Self {
            content_type: Some("application/xml".to_string()),
            content_encoding: Some("gzip".to_string()),
        }
    }

    /// Uncompressed plain text (robots.txt).
    pub fn plain_text() -> Self {
        Self {
            content_type: Some("text/plain".to_string()),
            content_encoding: None,
        }
    }
}

/// Object storage abstraction.
///
/// Keys are relative, `/`-separated paths such as `text-sitemaps/text-sitemap-10-1-1`.
/// Writes replace the whole object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get object metadata.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get the full object contents.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Put an object, overwriting any existing one.
    async fn put(&self, key: &str, data: Bytes, options: &PutOptions) -> StorageResult<()>;

    /// Delete an object. Returns `NotFound` if it does not exist.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Name of the backend, used in logs and health output.
    fn backend_name(&self) -> &'static str;

    /// Check connectivity and access to the backend.
    async fn health_check(&self) -> StorageResult<()>;
}
