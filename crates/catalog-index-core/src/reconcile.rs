//! Drift detection and repair between the catalog store and the index.
//!
//! Drift is computed from `(id, freshness)` pairs only, so neither side has
//! to ship full records:
//!
//! | Set | Meaning |
//! |-----|---------|
//! | missing | in the store, not in the index |
//! | extra | in the index, not in the store |
//! | updated | in both, normalized freshness differs |
//!
//! Repair reindexes missing and updated ids in fixed-size batches, deletes
//! extras one at a time, and refreshes the index once at the end. Records
//! that vanish from the store between the drift scan and the fetch are
//! skipped, not retried.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use anyhow::{Context, Result};

use crate::index::{BulkItemError, DeleteOutcome, IndexBackend, IndexClient};
use crate::models::{to_utc_iso, CatalogRecord, Document};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::store::{CatalogStore, IdTimestamp};

/// Normalized value for an absent freshness timestamp. Present values are
/// trimmed and never blank, so no raw timestamp normalizes to it.
pub const NO_TIMESTAMP: &str = "";

/// Ids fetched from the store per repair batch.
pub const DEFAULT_REPAIR_BATCH_SIZE: usize = 1000;

/// Failure attribution key for records with no harvest source.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Normalize a raw freshness timestamp to a comparable string.
pub fn normalize_timestamp(raw: Option<&str>) -> String {
    raw.and_then(to_utc_iso)
        .unwrap_or_else(|| NO_TIMESTAMP.to_string())
}

/// Normalized freshness on each side of an updated id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampPair {
    pub index: String,
    pub store: String,
}

/// Result of [`Reconciler::compute_drift`]. The three id sets are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftReport {
    pub missing: BTreeSet<String>,
    pub extra: BTreeSet<String>,
    pub updated: BTreeMap<String, TimestampPair>,
}

impl DriftReport {
    /// Build a report from both listings.
    pub fn between(store: &[IdTimestamp], index: &[IdTimestamp]) -> Self {
        let store: BTreeMap<&str, String> = store
            .iter()
            .map(|(id, ts)| (id.as_str(), normalize_timestamp(ts.as_deref())))
            .collect();
        let index: BTreeMap<&str, String> = index
            .iter()
            .map(|(id, ts)| (id.as_str(), normalize_timestamp(ts.as_deref())))
            .collect();

        let mut report = DriftReport::default();
        for (id, store_ts) in &store {
            match index.get(id) {
                None => {
                    report.missing.insert(id.to_string());
                }
                Some(index_ts) if index_ts != store_ts => {
                    report.updated.insert(
                        id.to_string(),
                        TimestampPair {
                            index: index_ts.clone(),
                            store: store_ts.clone(),
                        },
                    );
                }
                Some(_) => {}
            }
        }
        report.extra = index
            .keys()
            .filter(|id| !store.contains_key(*id))
            .map(|id| id.to_string())
            .collect();
        report
    }

    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.updated.is_empty()
    }

    /// Missing and updated ids in id order: everything repair must reindex.
    pub fn ids_to_index(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .missing
            .iter()
            .chain(self.updated.keys())
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

/// Outcome of [`Reconciler::repair`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepairSummary {
    /// Documents written successfully.
    pub indexed: u64,
    /// Ids that disappeared from the store before they could be fetched.
    pub skipped: u64,
    /// Up to `sample_size` of the skipped ids.
    pub skipped_sample: Vec<String>,
    /// Extra documents removed from the index.
    pub deleted: u64,
    /// Extra ids whose delete failed, with the reason.
    pub delete_failures: Vec<(String, String)>,
    /// Per-document upsert failures.
    pub failures: Vec<BulkItemError>,
    /// Harvest sources (id → name) owning at least one failed document.
    pub failed_sources: BTreeMap<String, String>,
}

/// Drift detection and repair over a store and an index client.
pub struct Reconciler<'a, S, B> {
    store: &'a S,
    index: &'a IndexClient<B>,
    progress: &'a dyn ProgressReporter,
    batch_size: usize,
}

impl<'a, S: CatalogStore, B: IndexBackend> Reconciler<'a, S, B> {
    pub fn new(store: &'a S, index: &'a IndexClient<B>) -> Self {
        Self {
            store,
            index,
            progress: &NoProgress,
            batch_size: DEFAULT_REPAIR_BATCH_SIZE,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Ids per repair batch. Values below 1 are treated as 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Compare freshness listings from both sides.
    pub async fn compute_drift(&self) -> Result<DriftReport> {
        let store_pairs = self
            .store
            .all_ids_and_timestamps()
            .await
            .context("Failed to list store ids and timestamps")?;
        let index_pairs = self
            .index
            .with_timeout_retry("scan_freshness", || self.index.scan_freshness())
            .await
            .context("Failed to scan index ids and timestamps")?;

        let report = DriftReport::between(&store_pairs, &index_pairs);
        tracing::info!(
            store = store_pairs.len(),
            index = index_pairs.len(),
            missing = report.missing.len(),
            extra = report.extra.len(),
            updated = report.updated.len(),
            "computed drift"
        );
        Ok(report)
    }

    /// Bring the index back in line with the store.
    pub async fn repair(&self, report: &DriftReport, sample_size: usize) -> Result<RepairSummary> {
        let mut summary = RepairSummary::default();

        let ids = report.ids_to_index();
        let total_batches = ids.len().div_ceil(self.batch_size) as u64;
        for (i, chunk) in ids.chunks(self.batch_size).enumerate() {
            let batch = i as u64 + 1;
            let records = self
                .store
                .find_by_ids(chunk)
                .await
                .with_context(|| format!("Failed to fetch repair batch {}", batch))?;

            let found: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
            let mut batch_skipped = 0u64;
            for id in chunk.iter().filter(|id| !found.contains(id.as_str())) {
                tracing::warn!(id = %id, "record vanished from store before repair, skipping");
                batch_skipped += 1;
                if summary.skipped_sample.len() < sample_size {
                    summary.skipped_sample.push(id.clone());
                }
            }
            summary.skipped += batch_skipped;

            let documents: Vec<Document> = records.iter().map(Document::from_record).collect();
            let result = self.index.upsert_batch(&documents).await?;
            summary.indexed += result.succeeded;
            for err in result.errors {
                attribute_failure(&mut summary.failed_sources, &records, &err.document_id);
                summary.failures.push(err);
            }

            self.progress.report(ProgressEvent::RepairBatch {
                batch,
                total_batches,
                indexed: result.succeeded,
                skipped: batch_skipped,
            });
        }

        for id in &report.extra {
            match self.index.delete_by_id(id).await {
                DeleteOutcome::Deleted => summary.deleted += 1,
                DeleteOutcome::Missing => {
                    tracing::debug!(id = %id, "extra document already gone from index");
                }
                DeleteOutcome::Failed(reason) => {
                    tracing::warn!(id = %id, reason = %reason, "failed to delete extra document");
                    summary.delete_failures.push((id.clone(), reason));
                }
            }
        }
        if !report.extra.is_empty() {
            self.progress.report(ProgressEvent::RepairDeleted {
                deleted: summary.deleted,
                failed: summary.delete_failures.len() as u64,
            });
        }

        self.index
            .with_timeout_retry("refresh", || self.index.refresh())
            .await
            .context("Failed to refresh index after repair")?;

        tracing::info!(
            indexed = summary.indexed,
            skipped = summary.skipped,
            deleted = summary.deleted,
            failed = summary.failures.len(),
            "repair finished"
        );
        Ok(summary)
    }
}

fn attribute_failure(
    sources: &mut BTreeMap<String, String>,
    records: &[CatalogRecord],
    document_id: &str,
) {
    let source = records
        .iter()
        .find(|r| r.id == document_id)
        .and_then(|r| r.harvest_source.as_ref());
    match source {
        Some(hs) => {
            sources.insert(hs.id.clone(), hs.name.clone());
        }
        None => {
            sources.insert(UNKNOWN_SOURCE.to_string(), UNKNOWN_SOURCE.to_string());
        }
    }
}

/// First `n` items of an id set, for operator-facing samples.
pub fn sample<'s>(ids: impl IntoIterator<Item = &'s String>, n: usize) -> Vec<&'s str> {
    ids.into_iter().take(n).map(String::as_str).collect()
}
