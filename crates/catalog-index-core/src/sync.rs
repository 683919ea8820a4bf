//! Batch sync from the catalog store into the search index.
//!
//! A full sync is a small state machine:
//!
//! ```text
//! Init ──▶ RecreateSchema ─┐
//!   └────▶ EmptyIndex ─────┴──▶ PageLoop ──▶ Refresh ──▶ Done
//!                                  │
//!                                  └──▶ Failed (retry ceiling or fatal error)
//! ```
//!
//! Pages are processed strictly in order. A page that fails with a
//! retryable error (index timeout, index unavailable, store serialization
//! conflict) is retried after `retry_base_delay * 2^(attempt-1)`; any other
//! error, or running out of retries, aborts the run. Documents the index
//! rejects inside an otherwise successful bulk call are collected in the
//! report and never abort the run.
//!
//! Emptying the index before refilling it leaves a window in which readers
//! see a partial index, and concurrent runs are not serialized against each
//! other. Neither is guarded here.

use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::error::{IndexError, SyncError};
use crate::index::{BulkItemError, BulkSummary, IndexBackend, IndexClient};
use crate::models::{CatalogRecord, Document};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::reconcile::{DriftReport, Reconciler, RepairSummary, DEFAULT_REPAIR_BATCH_SIZE};
use crate::retry::{classify_sync_error, with_retry, Classifier, RetryPolicy};
use crate::store::CatalogStore;

/// Phases of a full sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Init,
    RecreateSchema,
    EmptyIndex,
    PageLoop,
    Refresh,
    Done,
    Failed,
}

/// Tunables for the orchestrator.
#[derive(Clone, Copy)]
pub struct SyncOptions {
    /// Retries per page after the first attempt.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Decides which page failures are worth retrying.
    pub classifier: Classifier,
    pub repair_batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            classifier: classify_sync_error,
            repair_batch_size: DEFAULT_REPAIR_BATCH_SIZE,
        }
    }
}

/// Final statistics of a successful full sync.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub store_count: u64,
    pub index_before: u64,
    pub index_after: u64,
    pub recreated: bool,
    /// `false` if the mapping lacked the exact keyword sub-field after a
    /// recreate. Always `true` when the schema was not recreated.
    pub exact_keyword_field: bool,
    pub pages: u64,
    pub succeeded: u64,
    /// Every document the index rejected, across all pages.
    pub errors: Vec<BulkItemError>,
}

/// Outcome of [`SyncOrchestrator::compare_and_fix`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompareOutcome {
    pub drift: DriftReport,
    pub repair: Option<RepairSummary>,
}

/// Drives full, single-record, and compare runs against one store and one
/// index client.
pub struct SyncOrchestrator<'a, S, B> {
    store: &'a S,
    index: &'a IndexClient<B>,
    progress: &'a dyn ProgressReporter,
    options: SyncOptions,
}

impl<'a, S: CatalogStore, B: IndexBackend> SyncOrchestrator<'a, S, B> {
    pub fn new(store: &'a S, index: &'a IndexClient<B>) -> Self {
        Self {
            store,
            index,
            progress: &NoProgress,
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    fn enter(&self, phase: SyncPhase) {
        tracing::debug!(?phase, "sync phase");
    }

    /// Rebuild the index from the store, starting at `start_page` (1-based).
    pub async fn full_sync(
        &self,
        start_page: u64,
        per_page: u64,
        recreate_schema: bool,
    ) -> Result<SyncReport> {
        if per_page == 0 {
            bail!("per_page must be at least 1");
        }
        let start_page = start_page.max(1);

        self.enter(SyncPhase::Init);
        let mut report = SyncReport {
            recreated: recreate_schema,
            exact_keyword_field: true,
            index_before: self.count_or_zero().await?,
            ..Default::default()
        };

        if recreate_schema {
            self.enter(SyncPhase::RecreateSchema);
            self.index
                .with_timeout_retry("recreate_schema", || self.index.recreate_schema())
                .await
                .context("Failed to recreate index")?;
            report.exact_keyword_field = self
                .index
                .with_timeout_retry("get_mapping", || self.index.has_exact_keyword_field())
                .await?;
            if !report.exact_keyword_field {
                tracing::warn!(
                    "index mapping has no exact keyword sub-field; keyword filters and aggregations will not work"
                );
            }
        } else {
            self.enter(SyncPhase::EmptyIndex);
            self.index
                .with_timeout_retry("ensure_schema", || self.index.ensure_schema())
                .await
                .context("Failed to create index")?;
            self.index
                .with_timeout_retry("delete_all", || self.index.delete_all_documents())
                .await
                .context("Failed to empty index")?;
        }

        report.store_count = self
            .store
            .count_all()
            .await
            .context("Failed to count store records")?;
        let total_pages = report.store_count.div_ceil(per_page);
        self.progress.report(ProgressEvent::SyncStarted {
            total_records: report.store_count,
            total_pages,
        });

        self.enter(SyncPhase::PageLoop);
        let policy = RetryPolicy::new(
            self.options.max_retries,
            self.options.retry_base_delay,
            self.options.classifier,
        );
        for page in start_page..=total_pages {
            let name = format!("sync page {}", page);
            let outcome = with_retry(&policy, self.index.sleeper(), &name, || {
                self.sync_page(page, per_page)
            })
            .await;

            let summary = match outcome {
                Ok(summary) => summary,
                Err(failure) => {
                    self.enter(SyncPhase::Failed);
                    let err = if failure.exhausted {
                        SyncError::RetriesExhausted {
                            page,
                            attempts: failure.attempts,
                            source: failure.error,
                        }
                    } else {
                        SyncError::PageFailed {
                            page,
                            source: failure.error,
                        }
                    };
                    return Err(err.into());
                }
            };

            self.progress.report(ProgressEvent::PageIndexed {
                page,
                total_pages,
                succeeded: summary.succeeded,
                failed: summary.failed,
            });
            report.pages += 1;
            report.succeeded += summary.succeeded;
            report.errors.extend(summary.errors);
        }

        self.enter(SyncPhase::Refresh);
        self.index
            .with_timeout_retry("refresh", || self.index.refresh())
            .await
            .context("Failed to refresh index")?;
        report.index_after = self
            .index
            .with_timeout_retry("count", || self.index.count())
            .await?;

        self.enter(SyncPhase::Done);
        tracing::info!(
            pages = report.pages,
            succeeded = report.succeeded,
            errors = report.errors.len(),
            "full sync finished"
        );
        Ok(report)
    }

    async fn sync_page(&self, page: u64, per_page: u64) -> Result<BulkSummary> {
        let records = self
            .store
            .page(page, per_page)
            .await
            .with_context(|| format!("Failed to fetch page {}", page))?;
        let documents: Vec<Document> = records.iter().map(Document::from_record).collect();
        self.index.upsert_batch(&documents).await
    }

    async fn count_or_zero(&self) -> Result<u64> {
        match self
            .index
            .with_timeout_retry("count", || self.index.count())
            .await
        {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.downcast_ref::<IndexError>(), Some(IndexError::NotFound(_))) => {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    /// Index one record, resolved by id first and then by slug.
    ///
    /// Any failure is fatal and nothing is retried at this level.
    pub async fn single_sync(&self, id_or_slug: &str, recreate_schema: bool) -> Result<CatalogRecord> {
        if recreate_schema {
            return Err(SyncError::RecreateNotAllowed.into());
        }

        let record = match self.store.find_by_id(id_or_slug).await? {
            Some(record) => record,
            None => self
                .store
                .find_by_slug(id_or_slug)
                .await?
                .ok_or_else(|| SyncError::NotFound(id_or_slug.to_string()))?,
        };

        self.index.ensure_schema().await?;
        let summary = self
            .index
            .upsert_batch(&[Document::from_record(&record)])
            .await?;
        if let Some(err) = summary.errors.into_iter().next() {
            return Err(SyncError::DocumentRejected(err).into());
        }
        self.index.refresh().await?;

        tracing::info!(id = %record.id, slug = %record.slug, "indexed single dataset");
        Ok(record)
    }

    fn reconciler(&self) -> Reconciler<'a, S, B> {
        Reconciler::new(self.store, self.index)
            .with_progress(self.progress)
            .with_batch_size(self.options.repair_batch_size)
    }

    /// Compare the store with the index without writing to either.
    pub async fn drift(&self) -> Result<DriftReport> {
        self.reconciler().compute_drift().await
    }

    /// Repair a previously computed drift report.
    pub async fn repair(&self, drift: &DriftReport, sample_size: usize) -> Result<RepairSummary> {
        self.reconciler().repair(drift, sample_size).await
    }

    /// Compute drift and, when `fix` is set, repair it.
    ///
    /// Callers that must show the drift even when repair fails should call
    /// [`drift`](Self::drift) and [`repair`](Self::repair) separately.
    pub async fn compare_and_fix(&self, sample_size: usize, fix: bool) -> Result<CompareOutcome> {
        let drift = self.drift().await?;
        let repair = if fix {
            Some(self.repair(&drift, sample_size).await?)
        } else {
            None
        };
        Ok(CompareOutcome { drift, repair })
    }
}
