//! Storage seeding at startup.

use crate::payload::{load_text, store_text, store_xml};
use anyhow::{Context, Result};
use sitemaps_core::config::SitemapsConfig;
use sitemaps_core::naming::ROBOTS_FILE;
use sitemaps_core::{SitemapIndex, robots};
use sitemaps_storage::ObjectStore;

/// What [`seed_storage`] wrote.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub template_created: bool,
    pub robots_created: bool,
}

/// Seed the empty index template and an initial robots.txt when absent.
/// Existing objects are never overwritten.
pub async fn seed_storage(storage: &dyn ObjectStore, config: &SitemapsConfig) -> Result<SeedReport> {
    let mut report = SeedReport::default();

    let template_key = &config.index_template_key;
    if !storage
        .exists(template_key)
        .await
        .context("failed to check index template")?
    {
        let xml = SitemapIndex::default()
            .to_xml()
            .context("failed to render index template")?;
        store_xml(storage, template_key, &xml)
            .await
            .context("failed to upload index template")?;
        report.template_created = true;
        tracing::info!(key = %template_key, "Index template seeded");
    }

    if load_text(storage, ROBOTS_FILE)
        .await
        .context("failed to read robots.txt")?
        .is_none()
    {
        store_text(storage, ROBOTS_FILE, robots::default_robots())
            .await
            .context("failed to upload robots.txt")?;
        report.robots_created = true;
        tracing::info!("Initial robots.txt seeded");
    }

    Ok(report)
}
