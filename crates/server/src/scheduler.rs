//! Time-triggered sweeps over the metadata store.
//!
//! Each sweep selects a bounded batch of work, groups it by the file it
//! touches and hands each group to the assembler or linker. Groups whose
//! lock is held elsewhere are skipped and picked up by a later run.

use crate::assembler::FileAssembler;
use crate::error::{AssembleError, AssembleResult};
use crate::linker::IndexLinker;
use futures::future::join_all;
use sitemaps_core::config::AppConfig;
use sitemaps_core::{EntityKind, FileTarget, IndexFileLifecycle, Layout, SitemapFileLifecycle};
use sitemaps_metadata::MetadataStore;
use sitemaps_metadata::models::{LinkChange, LinkRow, SitemapFileRow};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// Summary of one sweep run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub groups: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Records (or files) handled by successful groups.
    pub records: u64,
}

impl SweepStats {
    fn record<T>(&mut self, sweep: &Sweep, group: &str, result: AssembleResult<T>, records: u64) {
        self.groups += 1;
        match result {
            Ok(_) => {
                self.succeeded += 1;
                self.records += records;
                crate::metrics::record_sweep_group(sweep.name(), "succeeded");
            }
            Err(e) if e.is_lock_held() => {
                self.skipped += 1;
                crate::metrics::record_sweep_group(sweep.name(), "skipped");
                tracing::debug!(sweep = %sweep, group = %group, "Group locked elsewhere, skipping");
            }
            Err(e) => {
                self.failed += 1;
                crate::metrics::record_sweep_group(sweep.name(), "failed");
                tracing::error!(sweep = %sweep, group = %group, error = %e, "Sweep group failed");
            }
        }
    }

    fn merge(&mut self, other: SweepStats) {
        self.groups += other.groups;
        self.succeeded += other.succeeded;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.records += other.records;
    }
}

/// A unit of scheduled work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sweep {
    NewLinks { kind: EntityKind, partition: u32 },
    Deletions(EntityKind),
    Updates(EntityKind),
    IndexLinks(EntityKind),
    Lastmod(EntityKind),
    Root,
}

impl Sweep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewLinks { .. } => "new_links",
            Self::Deletions(_) => "deletions",
            Self::Updates(_) => "updates",
            Self::IndexLinks(_) => "index_links",
            Self::Lastmod(_) => "lastmod",
            Self::Root => "root",
        }
    }
}

impl fmt::Display for Sweep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewLinks { kind, partition } => write!(f, "{kind}/new_links/{partition}"),
            Self::Deletions(kind)
            | Self::Updates(kind)
            | Self::IndexLinks(kind)
            | Self::Lastmod(kind) => write!(f, "{kind}/{}", self.name()),
            Self::Root => f.write_str("root"),
        }
    }
}

/// A sweep and its offset within the scheduling interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Job {
    pub sweep: Sweep,
    pub offset: Duration,
}

/// The full job table for `config`.
pub fn jobs(config: &AppConfig) -> Vec<Job> {
    let s = &config.scheduler;
    let interval = s.interval_secs.max(1);
    let at = |secs: u64| Duration::from_secs(secs % interval);

    let mut jobs = Vec::new();
    for kind in EntityKind::ALL {
        for partition in 0..config.sitemaps.partition_base {
            jobs.push(Job {
                sweep: Sweep::NewLinks { kind, partition },
                offset: at(s.new_links_offset_secs + u64::from(partition) * s.new_links_stride_secs),
            });
        }
    }
    jobs.extend([
        Job {
            sweep: Sweep::Deletions(EntityKind::Text),
            offset: at(s.text_deletions_offset_secs),
        },
        Job {
            sweep: Sweep::Updates(EntityKind::Text),
            offset: at(s.text_updates_offset_secs),
        },
        Job {
            sweep: Sweep::Deletions(EntityKind::Video),
            offset: at(s.video_deletions_offset_secs),
        },
        Job {
            sweep: Sweep::Updates(EntityKind::Video),
            offset: at(s.video_updates_offset_secs),
        },
        Job {
            sweep: Sweep::IndexLinks(EntityKind::Text),
            offset: at(s.text_index_link_offset_secs),
        },
        Job {
            sweep: Sweep::IndexLinks(EntityKind::Video),
            offset: at(s.video_index_link_offset_secs),
        },
        Job {
            sweep: Sweep::Lastmod(EntityKind::Text),
            offset: at(s.text_lastmod_offset_secs),
        },
        Job {
            sweep: Sweep::Lastmod(EntityKind::Video),
            offset: at(s.video_lastmod_offset_secs),
        },
        Job {
            sweep: Sweep::Root,
            offset: at(s.robots_link_offset_secs),
        },
    ]);
    jobs
}

/// Time until the next `k * interval + offset` strictly after `now`.
pub fn until_next_fire(now: OffsetDateTime, interval: Duration, offset: Duration) -> Duration {
    let interval_ms = interval.as_millis().max(1) as i128;
    let offset_ms = offset.as_millis() as i128;
    let now_ms = now.unix_timestamp_nanos() / 1_000_000;
    let into_cycle = (now_ms - offset_ms).rem_euclid(interval_ms);
    Duration::from_millis((interval_ms - into_cycle) as u64)
}

pub struct Scheduler {
    metadata: Arc<dyn MetadataStore>,
    assembler: Arc<FileAssembler>,
    linker: Arc<IndexLinker>,
    config: Arc<AppConfig>,
    layout: Layout,
}

impl Scheduler {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        assembler: Arc<FileAssembler>,
        linker: Arc<IndexLinker>,
        config: Arc<AppConfig>,
    ) -> Self {
        let layout = Layout::from(&config.sitemaps);
        Self {
            metadata,
            assembler,
            linker,
            config,
            layout,
        }
    }

    fn batch_size(&self) -> usize {
        self.config.sitemaps.batch_size.max(1) as usize
    }

    /// Pending records pulled per new-links run.
    fn batch_limit(&self) -> u32 {
        self.config.sitemaps.batch_size.max(1)
    }

    fn sweep_limit(&self) -> u32 {
        self.config.sitemaps.sweep_limit
    }

    /// Run one sweep and log its summary.
    pub async fn run(&self, sweep: Sweep) -> SweepStats {
        let timer = crate::metrics::SWEEP_DURATION
            .with_label_values(&[sweep.name()])
            .start_timer();
        let result = match sweep {
            Sweep::NewLinks { kind, partition } => self.sweep_new_links(kind, partition).await,
            Sweep::Deletions(kind) => self.sweep_deletions(kind).await,
            Sweep::Updates(kind) => self.sweep_updates(kind).await,
            Sweep::IndexLinks(kind) => self.sweep_index_links(kind).await,
            Sweep::Lastmod(kind) => self.sweep_lastmod(kind).await,
            Sweep::Root => self.sweep_root().await,
        };
        timer.observe_duration();

        match result {
            Ok(stats) => {
                if stats.groups > 0 {
                    tracing::info!(
                        sweep = %sweep,
                        groups = stats.groups,
                        succeeded = stats.succeeded,
                        skipped = stats.skipped,
                        failed = stats.failed,
                        records = stats.records,
                        "Sweep finished"
                    );
                }
                stats
            }
            Err(e) => {
                tracing::error!(sweep = %sweep, error = %e, "Sweep selection failed");
                SweepStats {
                    failed: 1,
                    ..SweepStats::default()
                }
            }
        }
    }

    /// Run every sweep once, in pipeline order.
    pub async fn run_all(&self) -> SweepStats {
        let mut total = SweepStats::default();
        let mut ordered: Vec<Sweep> = Vec::new();
        for kind in EntityKind::ALL {
            for partition in 0..self.layout.partition_base {
                ordered.push(Sweep::NewLinks { kind, partition });
            }
        }
        for kind in EntityKind::ALL {
            ordered.push(Sweep::Deletions(kind));
            ordered.push(Sweep::Updates(kind));
        }
        for kind in EntityKind::ALL {
            ordered.push(Sweep::IndexLinks(kind));
            ordered.push(Sweep::Lastmod(kind));
        }
        ordered.push(Sweep::Root);

        for sweep in ordered {
            total.merge(self.run(sweep).await);
        }
        total
    }

    /// One batch of pending records of a partition, grouped by target leaf
    /// file. Groups run concurrently; the per-file lock keeps two runs off
    /// the same file.
    pub async fn sweep_new_links(&self, kind: EntityKind, partition: u32) -> AssembleResult<SweepStats> {
        let sweep = Sweep::NewLinks { kind, partition };
        let pending = self
            .metadata
            .find_pending_links(kind, self.layout.partition_base, partition, self.batch_limit())
            .await?;

        let groups = group_by_target(&self.layout, kind, partition, pending);
        self.prepare_index_files(kind, &groups).await;

        let results = join_all(groups.iter().map(|(target, records)| async move {
            let result = self.assembler.process_new_entries(target, records).await;
            (target.file_name.clone(), result, records.len() as u64)
        }))
        .await;

        let mut stats = SweepStats::default();
        for (group, result, records) in results {
            stats.record(&sweep, &group, result, records);
        }
        Ok(stats)
    }

    /// Create the index files a batch will need before its groups start, so
    /// sibling files of one index do not race for the index lock.
    async fn prepare_index_files(&self, kind: EntityKind, groups: &[(FileTarget, Vec<LinkRow>)]) {
        let names: BTreeSet<&str> = groups
            .iter()
            .map(|(target, _)| target.index_file_name.as_str())
            .collect();
        for index_file_name in names {
            if let Err(e) = self
                .linker
                .ensure_index_file_existence(kind, index_file_name)
                .await
            {
                // The group retries on its own and is skipped if still contended.
                tracing::debug!(index_file = %index_file_name, error = %e, "Index file not prepared");
            }
        }
    }

    pub async fn sweep_deletions(&self, kind: EntityKind) -> AssembleResult<SweepStats> {
        let sweep = Sweep::Deletions(kind);
        let marked = self
            .metadata
            .find_links_marked_for_deletion(kind, self.sweep_limit())
            .await?;
        self.edit_by_file(sweep, kind, marked, LinkChange::Deleted).await
    }

    pub async fn sweep_updates(&self, kind: EntityKind) -> AssembleResult<SweepStats> {
        let sweep = Sweep::Updates(kind);
        let marked = self
            .metadata
            .find_links_marked_for_update(kind, self.sweep_limit())
            .await?;
        self.edit_by_file(sweep, kind, marked, LinkChange::UpdateCleared).await
    }

    async fn edit_by_file(
        &self,
        sweep: Sweep,
        kind: EntityKind,
        records: Vec<LinkRow>,
        change: LinkChange,
    ) -> AssembleResult<SweepStats> {
        let mut stats = SweepStats::default();
        let mut by_file: BTreeMap<Option<String>, Vec<LinkRow>> = BTreeMap::new();
        for record in records {
            by_file.entry(record.file_name.clone()).or_default().push(record);
        }

        if let Some(unassigned) = by_file.remove(&None) {
            // Never written to a file: nothing to edit in storage.
            let ids: Vec<i64> = unassigned.iter().map(|r| r.link_id).collect();
            let result = self
                .metadata
                .bulk_set_link_state(kind, &ids, &change, OffsetDateTime::now_utc())
                .await
                .map_err(AssembleError::from);
            stats.record(&sweep, "unassigned", result, ids.len() as u64);
        }

        let change = &change;
        let per_file = join_all(by_file.into_iter().filter_map(|(file_name, records)| {
            let file_name = file_name?;
            Some(async move {
                let mut outcomes = Vec::new();
                for batch in records.chunks(self.batch_size()) {
                    let result = match change {
                        LinkChange::Deleted => {
                            self.assembler.process_deletions(kind, &file_name, batch).await
                        }
                        _ => self.assembler.process_updates(kind, &file_name, batch).await,
                    };
                    let stop = result.is_err();
                    outcomes.push((result, batch.len() as u64));
                    if stop {
                        // Later batches of the same file would only land out of order.
                        break;
                    }
                }
                (file_name, outcomes)
            })
        }))
        .await;

        for (file_name, outcomes) in per_file {
            for (result, records) in outcomes {
                stats.record(&sweep, &file_name, result, records);
            }
        }
        Ok(stats)
    }

    pub async fn sweep_index_links(&self, kind: EntityKind) -> AssembleResult<SweepStats> {
        let sweep = Sweep::IndexLinks(kind);
        let uploaded = self
            .metadata
            .find_sitemap_files_by_lifecycle(kind, SitemapFileLifecycle::Uploaded, self.sweep_limit())
            .await?;

        let groups = group_by_index(uploaded);
        let results = join_all(groups.iter().map(|(index_file_name, leaves)| async move {
            let result = self
                .linker
                .link_leaf_files_to_index(kind, index_file_name, leaves)
                .await;
            (index_file_name, result, leaves.len() as u64)
        }))
        .await;

        let mut stats = SweepStats::default();
        for (group, result, records) in results {
            stats.record(&sweep, group, result, records);
        }
        Ok(stats)
    }

    pub async fn sweep_lastmod(&self, kind: EntityKind) -> AssembleResult<SweepStats> {
        let sweep = Sweep::Lastmod(kind);
        let marked = self
            .metadata
            .find_sitemap_files_by_lifecycle(
                kind,
                SitemapFileLifecycle::MarkedForLastmodUpdate,
                self.sweep_limit(),
            )
            .await?;

        let groups = group_by_index(marked);
        let results = join_all(groups.iter().map(|(index_file_name, leaves)| async move {
            let result = self
                .linker
                .refresh_last_mod_in_index(kind, index_file_name, leaves)
                .await;
            (index_file_name, result, leaves.len() as u64)
        }))
        .await;

        let mut stats = SweepStats::default();
        for (group, result, records) in results {
            stats.record(&sweep, group, result, records);
        }
        Ok(stats)
    }

    pub async fn sweep_root(&self) -> AssembleResult<SweepStats> {
        let uploaded = self
            .metadata
            .find_index_files_by_lifecycle(IndexFileLifecycle::Uploaded, self.sweep_limit())
            .await?;

        let mut stats = SweepStats::default();
        if uploaded.is_empty() {
            return Ok(stats);
        }
        let count = uploaded.len() as u64;
        let result = self.linker.promote_index_files_to_root(&uploaded).await;
        stats.record(&Sweep::Root, sitemaps_core::naming::ROBOTS_FILE, result, count);
        Ok(stats)
    }

    /// Spawn one task per job, each firing on its wall-clock offset.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let interval = self.config.scheduler.interval();
        jobs(&self.config)
            .into_iter()
            .map(|job| {
                let scheduler = self.clone();
                tokio::spawn(async move {
                    loop {
                        let wait = until_next_fire(OffsetDateTime::now_utc(), interval, job.offset);
                        tokio::time::sleep(wait).await;
                        scheduler.run(job.sweep).await;
                    }
                })
            })
            .collect()
    }
}

/// Consecutive runs of records sharing a target file. Input is in counter
/// order, so each file's records stay contiguous.
fn group_by_target(
    layout: &Layout,
    kind: EntityKind,
    partition: u32,
    records: Vec<LinkRow>,
) -> Vec<(FileTarget, Vec<LinkRow>)> {
    let mut groups: Vec<(FileTarget, Vec<LinkRow>)> = Vec::new();
    for record in records {
        let target = layout.target(kind, partition, record.counter());
        match groups.last_mut() {
            Some((current, batch)) if *current == target => batch.push(record),
            _ => groups.push((target, vec![record])),
        }
    }
    groups
}

fn group_by_index(files: Vec<SitemapFileRow>) -> BTreeMap<String, Vec<SitemapFileRow>> {
    let mut groups: BTreeMap<String, Vec<SitemapFileRow>> = BTreeMap::new();
    for file in files {
        groups
            .entry(file.index_file_name.clone())
            .or_default()
            .push(file);
    }
    groups
}
