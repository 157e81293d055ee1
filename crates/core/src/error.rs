//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown entity kind: {0}")]
    InvalidKind(String),

    #[error("invalid lifecycle value: {0}")]
    InvalidLifecycle(String),

    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    #[error("sitemap parse error: {0}")]
    SitemapParse(String),

    #[error("sitemap write error: {0}")]
    SitemapWrite(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
