//! Progress events emitted by long-running sync and repair jobs.
//!
//! The orchestrator and reconciler report through [`ProgressReporter`];
//! the CLI decides how (and whether) to render them.

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A full sync is about to start paging through the store.
    SyncStarted { total_records: u64, total_pages: u64 },
    /// One page was indexed (page numbers are 1-based).
    PageIndexed {
        page: u64,
        total_pages: u64,
        succeeded: u64,
        failed: u64,
    },
    /// One repair batch of missing/updated ids was processed.
    RepairBatch {
        batch: u64,
        total_batches: u64,
        indexed: u64,
        skipped: u64,
    },
    /// Stale documents were removed from the index.
    RepairDeleted { deleted: u64, failed: u64 },
}

/// Receives progress events. Implementations must not fail the job.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}
