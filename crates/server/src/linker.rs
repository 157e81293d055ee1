//! Index files and the root discovery file.
//!
//! Leaf files are linked into their index file once uploaded, and their
//! `lastmod` is refreshed there whenever they change. Index files are in
//! turn listed in `robots.txt`.

use crate::error::AssembleResult;
use crate::lock::LockManager;
use crate::payload::{load_text, load_xml, store_text, store_xml};
use sitemaps_core::config::AppConfig;
use sitemaps_core::naming::{ROBOTS_FILE, index_link, object_location, storage_key};
use sitemaps_core::{
    EntityKind, IndexEntry, IndexFileLifecycle, SitemapFileLifecycle, SitemapIndex, robots,
};
use sitemaps_metadata::MetadataStore;
use sitemaps_metadata::models::{IndexFileRow, SitemapFileRow};
use sitemaps_storage::ObjectStore;
use std::sync::Arc;
use time::OffsetDateTime;

pub struct IndexLinker {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn ObjectStore>,
    locks: LockManager,
    config: Arc<AppConfig>,
}

impl IndexLinker {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
        locks: LockManager,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            metadata,
            storage,
            locks,
            config,
        }
    }

    /// Make sure `index_file_name` exists, creating it from the empty
    /// template if needed.
    pub async fn ensure_index_file_existence(
        &self,
        kind: EntityKind,
        index_file_name: &str,
    ) -> AssembleResult<()> {
        if self.metadata.get_index_file(index_file_name).await?.is_some() {
            return Ok(());
        }
        self.locks
            .with_lock(index_file_name, self.create_index_file(kind, index_file_name))
            .await
    }

    async fn create_index_file(&self, kind: EntityKind, index_file_name: &str) -> AssembleResult<()> {
        if self.metadata.get_index_file(index_file_name).await?.is_some() {
            return Ok(());
        }

        let template = match load_xml(self.storage.as_ref(), &self.config.sitemaps.index_template_key)
            .await?
        {
            Some(xml) => xml,
            None => {
                tracing::warn!(
                    template = %self.config.sitemaps.index_template_key,
                    "Index template missing from storage, rendering empty index"
                );
                SitemapIndex::default().to_xml()?
            }
        };

        let key = storage_key(kind, index_file_name);
        store_xml(self.storage.as_ref(), &key, &template).await?;

        let now = OffsetDateTime::now_utc();
        let row = IndexFileRow {
            file_name: index_file_name.to_string(),
            kind: kind.as_str().to_string(),
            link: index_link(&self.config.sitemaps.frontend_domain, index_file_name),
            location: object_location(&self.config.location_base_url(), &key),
            lifecycle: IndexFileLifecycle::Uploaded.as_str().to_string(),
            created_at: now,
            updated_at: now,
        };
        match self.metadata.create_index_file(&row).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        crate::metrics::INDEX_FILES_CREATED
            .with_label_values(&[kind.as_str()])
            .inc();
        tracing::info!(kind = %kind, index_file = %index_file_name, "Index file created");
        Ok(())
    }

    async fn load_index(&self, kind: EntityKind, index_file_name: &str) -> AssembleResult<SitemapIndex> {
        let key = storage_key(kind, index_file_name);
        match load_xml(self.storage.as_ref(), &key).await? {
            Some(xml) => Ok(SitemapIndex::parse(&xml)?),
            None => {
                tracing::warn!(index_file = %index_file_name, "Index object missing, rebuilding");
                Ok(SitemapIndex::default())
            }
        }
    }

    /// List uploaded leaf files in their index file. Returns how many entries
    /// were added.
    pub async fn link_leaf_files_to_index(
        &self,
        kind: EntityKind,
        index_file_name: &str,
        leaves: &[SitemapFileRow],
    ) -> AssembleResult<usize> {
        if leaves.is_empty() {
            return Ok(0);
        }
        self.ensure_index_file_existence(kind, index_file_name).await?;
        self.locks
            .with_lock(index_file_name, self.append_leaves(kind, index_file_name, leaves))
            .await
    }

    async fn append_leaves(
        &self,
        kind: EntityKind,
        index_file_name: &str,
        leaves: &[SitemapFileRow],
    ) -> AssembleResult<usize> {
        let mut index = self.load_index(kind, index_file_name).await?;
        let added = index.append_missing(leaves.iter().map(|leaf| IndexEntry {
            loc: leaf.link.clone(),
            lastmod: Some(leaf.created_at),
        }));
        if added > 0 {
            store_xml(
                self.storage.as_ref(),
                &storage_key(kind, index_file_name),
                &index.to_xml()?,
            )
            .await?;
        }

        let names = file_names(leaves);
        self.metadata
            .set_sitemap_files_lifecycle(
                &names,
                SitemapFileLifecycle::LinkedToIndex,
                OffsetDateTime::now_utc(),
            )
            .await?;

        tracing::info!(
            kind = %kind,
            index_file = %index_file_name,
            leaves = leaves.len(),
            added,
            "Leaf files linked to index"
        );
        Ok(added)
    }

    /// Copy each leaf's `updated_at` into its index entry.
    pub async fn refresh_last_mod_in_index(
        &self,
        kind: EntityKind,
        index_file_name: &str,
        leaves: &[SitemapFileRow],
    ) -> AssembleResult<usize> {
        if leaves.is_empty() {
            return Ok(0);
        }
        self.ensure_index_file_existence(kind, index_file_name).await?;
        self.locks
            .with_lock(index_file_name, self.rewrite_lastmod(kind, index_file_name, leaves))
            .await
    }

    async fn rewrite_lastmod(
        &self,
        kind: EntityKind,
        index_file_name: &str,
        leaves: &[SitemapFileRow],
    ) -> AssembleResult<usize> {
        let mut index = self.load_index(kind, index_file_name).await?;
        for leaf in leaves {
            match index.find_mut(&leaf.link) {
                Some(entry) => entry.lastmod = Some(leaf.updated_at),
                None => index.entries.push(IndexEntry {
                    loc: leaf.link.clone(),
                    lastmod: Some(leaf.updated_at),
                }),
            }
        }
        store_xml(
            self.storage.as_ref(),
            &storage_key(kind, index_file_name),
            &index.to_xml()?,
        )
        .await?;

        // Leaves rewritten since they were selected keep their mark so the
        // next run carries the newer lastmod. A rewrite landing between this
        // read and the reset below is not caught; its lastmod is corrected by
        // the leaf's following change.
        let mut names = Vec::with_capacity(leaves.len());
        for leaf in leaves {
            match self.metadata.get_sitemap_file(&leaf.file_name).await? {
                Some(current) if current.updated_at == leaf.updated_at => {
                    names.push(current.file_name)
                }
                _ => tracing::debug!(
                    index_file = %index_file_name,
                    file = %leaf.file_name,
                    "Leaf changed during lastmod refresh, left marked"
                ),
            }
        }
        self.metadata
            .set_sitemap_files_lifecycle(
                &names,
                SitemapFileLifecycle::LinkedToIndex,
                OffsetDateTime::now_utc(),
            )
            .await?;

        tracing::info!(
            kind = %kind,
            index_file = %index_file_name,
            leaves = leaves.len(),
            reset = names.len(),
            "Index lastmod refreshed"
        );
        Ok(leaves.len())
    }

    /// Append a `Sitemap:` directive to robots.txt for each index file not
    /// already listed. Returns how many were appended.
    pub async fn promote_index_files_to_root(
        &self,
        index_files: &[IndexFileRow],
    ) -> AssembleResult<usize> {
        if index_files.is_empty() {
            return Ok(0);
        }
        self.locks
            .with_lock(ROBOTS_FILE, self.append_to_robots(index_files))
            .await
    }

    async fn append_to_robots(&self, index_files: &[IndexFileRow]) -> AssembleResult<usize> {
        let existing = load_text(self.storage.as_ref(), ROBOTS_FILE)
            .await?
            .unwrap_or_default();
        let links: Vec<String> = index_files.iter().map(|f| f.link.clone()).collect();
        let merged = robots::merge(&existing, &links);

        if !merged.appended.is_empty() {
            store_text(self.storage.as_ref(), ROBOTS_FILE, merged.content).await?;
            crate::metrics::ROBOTS_LINKS_APPENDED.inc_by(merged.appended.len() as u64);
        }

        let names: Vec<String> = index_files.iter().map(|f| f.file_name.clone()).collect();
        self.metadata
            .set_index_files_lifecycle(
                &names,
                IndexFileLifecycle::LinkedToRobots,
                OffsetDateTime::now_utc(),
            )
            .await?;

        tracing::info!(
            index_files = index_files.len(),
            appended = merged.appended.len(),
            "Index files linked to robots.txt"
        );
        Ok(merged.appended.len())
    }
}

fn file_names(leaves: &[SitemapFileRow]) -> Vec<String> {
    leaves.iter().map(|l| l.file_name.clone()).collect()
}

