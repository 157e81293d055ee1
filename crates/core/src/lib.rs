//! Core domain types for the sharded sitemap service.
//!
//! - Entity kinds and their static properties
//! - Deterministic file naming and partitioning
//! - Lifecycle states for records, leaf files and index files
//! - Sitemap and sitemap index documents
//! - robots.txt merging

pub mod config;
pub mod error;
pub mod kind;
pub mod lifecycle;
pub mod naming;
pub mod robots;
pub mod sitemap;

pub use error::{Error, Result};
pub use kind::EntityKind;
pub use lifecycle::{DeletionCycle, IndexFileLifecycle, LinkState, SitemapFileLifecycle};
pub use naming::{FileTarget, Layout};
pub use sitemap::{ChangeFreq, IndexEntry, SitemapIndex, UrlEntry, UrlSet, VideoEntry};
