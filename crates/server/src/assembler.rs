//! Leaf sitemap file assembly.
//!
//! Every write happens under the leaf file's lock and follows the same
//! shape: read the current listing, apply the records, upload the whole
//! file, then stamp the records and the file row in one transaction.
//! Re-running a batch after a crash between upload and commit is safe
//! because entries are matched by URL.

use crate::entries::{apply_update, entry_loc, url_entry};
use crate::error::AssembleResult;
use crate::linker::IndexLinker;
use crate::lock::LockManager;
use crate::notify::{Notifier, notify_best_effort};
use crate::payload::{load_xml, store_xml};
use sitemaps_core::config::AppConfig;
use sitemaps_core::naming::{leaf_link, object_location, storage_key};
use sitemaps_core::{EntityKind, FileTarget, SitemapFileLifecycle, UrlSet};
use sitemaps_metadata::MetadataStore;
use sitemaps_metadata::models::{LinkChange, LinkRow, SitemapFileRow};
use sitemaps_storage::ObjectStore;
use std::sync::Arc;
use time::OffsetDateTime;

/// What a single assembler call did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssembleOutcome {
    /// Whether a new leaf file was created.
    pub created: bool,
    /// Entries added, retired or rewritten in the listing.
    pub changed: usize,
    /// Records stamped in the metadata store.
    pub records: u64,
}

pub struct FileAssembler {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn ObjectStore>,
    locks: LockManager,
    linker: Arc<IndexLinker>,
    notifier: Arc<dyn Notifier>,
    config: Arc<AppConfig>,
}

impl FileAssembler {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
        locks: LockManager,
        linker: Arc<IndexLinker>,
        notifier: Arc<dyn Notifier>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            metadata,
            storage,
            locks,
            linker,
            notifier,
            config,
        }
    }

    fn frontend_domain(&self) -> &str {
        &self.config.sitemaps.frontend_domain
    }

    /// Write pending records into the leaf file `target` names.
    pub async fn process_new_entries(
        &self,
        target: &FileTarget,
        records: &[LinkRow],
    ) -> AssembleResult<AssembleOutcome> {
        if records.is_empty() {
            return Ok(AssembleOutcome::default());
        }
        let outcome = self
            .locks
            .with_lock(&target.file_name, self.write_new_entries(target, records))
            .await?;

        let link = leaf_link(self.frontend_domain(), &target.file_name);
        notify_best_effort(self.notifier.as_ref(), &link).await;
        Ok(outcome)
    }

    async fn write_new_entries(
        &self,
        target: &FileTarget,
        records: &[LinkRow],
    ) -> AssembleResult<AssembleOutcome> {
        let kind = target.kind;
        let key = storage_key(kind, &target.file_name);
        let ids = link_ids(records);
        let entries = records
            .iter()
            .map(|r| url_entry(kind, self.frontend_domain(), r));

        let Some(file) = self.metadata.get_sitemap_file(&target.file_name).await? else {
            self.linker
                .ensure_index_file_existence(kind, &target.index_file_name)
                .await?;

            let listing = UrlSet::new(entries.collect());
            store_xml(self.storage.as_ref(), &key, &listing.to_xml()?).await?;

            let now = OffsetDateTime::now_utc();
            let row = SitemapFileRow {
                file_name: target.file_name.clone(),
                kind: kind.as_str().to_string(),
                index_file_name: target.index_file_name.clone(),
                link: leaf_link(self.frontend_domain(), &target.file_name),
                location: object_location(&self.config.location_base_url(), &key),
                lifecycle: SitemapFileLifecycle::Uploaded.as_str().to_string(),
                created_at: now,
                updated_at: now,
            };
            self.metadata
                .create_sitemap_file_with_links(&row, &ids)
                .await?;

            crate::metrics::SITEMAP_FILES_CREATED
                .with_label_values(&[kind.as_str()])
                .inc();
            tracing::info!(
                kind = %kind,
                file = %target.file_name,
                index_file = %target.index_file_name,
                records = records.len(),
                "Leaf file created"
            );
            return Ok(AssembleOutcome {
                created: true,
                changed: listing.entries.len(),
                records: ids.len() as u64,
            });
        };

        let mut listing = match load_xml(self.storage.as_ref(), &key).await? {
            Some(xml) => UrlSet::parse(&xml)?,
            None => self.rebuild_listing(kind, &file.file_name).await?,
        };
        let changed = listing.append_missing(entries);
        store_xml(self.storage.as_ref(), &key, &listing.to_xml()?).await?;

        let stamped = self
            .metadata
            .commit_sitemap_file_changes(
                &file.file_name,
                kind,
                &ids,
                &LinkChange::Assigned(file.file_name.clone()),
                OffsetDateTime::now_utc(),
            )
            .await?;

        crate::metrics::SITEMAP_FILES_UPDATED
            .with_label_values(&[kind.as_str(), "append"])
            .inc();
        tracing::info!(
            kind = %kind,
            file = %file.file_name,
            appended = changed,
            stamped,
            "Leaf file extended"
        );
        Ok(AssembleOutcome {
            created: false,
            changed,
            records: stamped,
        })
    }

    /// Recreate a listing whose object went missing from the records
    /// already assigned to it.
    async fn rebuild_listing(&self, kind: EntityKind, file_name: &str) -> AssembleResult<UrlSet> {
        tracing::warn!(file = %file_name, "Leaf object missing, rebuilding from records");
        let assigned = self.metadata.find_links_by_file(file_name).await?;
        let mut listing = UrlSet::default();
        listing.append_missing(
            assigned
                .iter()
                .filter(|r| !r.is_deleted)
                .map(|r| url_entry(kind, self.frontend_domain(), r)),
        );
        Ok(listing)
    }

    /// Retire the entries of records marked for deletion in `file_name`.
    pub async fn process_deletions(
        &self,
        kind: EntityKind,
        file_name: &str,
        records: &[LinkRow],
    ) -> AssembleResult<AssembleOutcome> {
        if records.is_empty() {
            return Ok(AssembleOutcome::default());
        }
        let outcome = self
            .locks
            .with_lock(
                file_name,
                self.rewrite_entries(kind, file_name, records, EditMode::Delete),
            )
            .await?;
        if outcome.changed > 0 {
            notify_best_effort(self.notifier.as_ref(), &leaf_link(self.frontend_domain(), file_name))
                .await;
        }
        Ok(outcome)
    }

    /// Rewrite the entries of records marked for update in `file_name`.
    pub async fn process_updates(
        &self,
        kind: EntityKind,
        file_name: &str,
        records: &[LinkRow],
    ) -> AssembleResult<AssembleOutcome> {
        if records.is_empty() {
            return Ok(AssembleOutcome::default());
        }
        let outcome = self
            .locks
            .with_lock(
                file_name,
                self.rewrite_entries(kind, file_name, records, EditMode::Update),
            )
            .await?;
        if outcome.changed > 0 {
            notify_best_effort(self.notifier.as_ref(), &leaf_link(self.frontend_domain(), file_name))
                .await;
        }
        Ok(outcome)
    }

    async fn rewrite_entries(
        &self,
        kind: EntityKind,
        file_name: &str,
        records: &[LinkRow],
        mode: EditMode,
    ) -> AssembleResult<AssembleOutcome> {
        let ids = link_ids(records);
        let change = mode.change();
        let now = OffsetDateTime::now_utc();

        let file = self.metadata.get_sitemap_file(file_name).await?;
        let xml = match &file {
            Some(_) => load_xml(self.storage.as_ref(), &storage_key(kind, file_name)).await?,
            None => None,
        };
        let (Some(file), Some(xml)) = (file, xml) else {
            // Nothing left to edit; settle the records so they stop coming back.
            let settled = self
                .metadata
                .bulk_set_link_state(kind, &ids, &change, now)
                .await?;
            tracing::warn!(
                kind = %kind,
                file = %file_name,
                records = records.len(),
                settled,
                operation = mode.as_str(),
                "Leaf file missing, records settled without rewrite"
            );
            return Ok(AssembleOutcome {
                created: false,
                changed: 0,
                records: settled,
            });
        };

        let mut listing = UrlSet::parse(&xml)?;
        let mut changed = 0;
        for record in records {
            let loc = entry_loc(self.frontend_domain(), record);
            let Some(entry) = listing.find_mut(&loc) else {
                tracing::debug!(file = %file_name, loc = %loc, "Entry not in listing");
                continue;
            };
            match mode {
                EditMode::Delete => {
                    if entry.retire(now) {
                        changed += 1;
                    }
                }
                EditMode::Update => {
                    apply_update(kind, entry, record, now);
                    changed += 1;
                }
            }
        }

        if changed == 0 {
            // Listing already reflects the records; the file row stays as is.
            let settled = self
                .metadata
                .bulk_set_link_state(kind, &ids, &change, now)
                .await?;
            tracing::debug!(
                kind = %kind,
                file = %file_name,
                settled,
                operation = mode.as_str(),
                "Leaf file unchanged, records settled"
            );
            return Ok(AssembleOutcome {
                created: false,
                changed: 0,
                records: settled,
            });
        }

        store_xml(
            self.storage.as_ref(),
            &storage_key(kind, file_name),
            &listing.to_xml()?,
        )
        .await?;
        crate::metrics::SITEMAP_FILES_UPDATED
            .with_label_values(&[kind.as_str(), mode.as_str()])
            .inc();

        let stamped = self
            .metadata
            .commit_sitemap_file_changes(&file.file_name, kind, &ids, &change, now)
            .await?;

        tracing::info!(
            kind = %kind,
            file = %file_name,
            changed,
            stamped,
            operation = mode.as_str(),
            "Leaf file entries rewritten"
        );
        Ok(AssembleOutcome {
            created: false,
            changed,
            records: stamped,
        })
    }
}

#[derive(Clone, Copy, Debug)]
enum EditMode {
    Delete,
    Update,
}

impl EditMode {
    fn change(self) -> LinkChange {
        match self {
            Self::Delete => LinkChange::Deleted,
            Self::Update => LinkChange::UpdateCleared,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Update => "update",
        }
    }
}

fn link_ids(records: &[LinkRow]) -> Vec<i64> {
    records.iter().map(|r| r.link_id).collect()
}
