//! Error taxonomy for index and sync operations.
//!
//! Backends and the orchestrator return `anyhow::Result`; the typed errors
//! below travel inside `anyhow::Error` and are recovered with
//! `downcast_ref` by the classifiers in [`crate::retry`].

use thiserror::Error;

use crate::index::BulkItemError;

/// Failure talking to the search index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The request did not complete in time (client timeout, HTTP 408/504).
    #[error("index request timed out: {0}")]
    Timeout(String),
    /// The cluster could not be reached or refused service (HTTP 502/503).
    #[error("index unavailable: {0}")]
    Unavailable(String),
    /// The index or document does not exist.
    #[error("not found in index: {0}")]
    NotFound(String),
    /// Any other non-success HTTP status.
    #[error("index returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// The backend answered with a body we could not interpret.
    #[error("malformed index response: {0}")]
    Malformed(String),
}

/// Fatal conditions that abort a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A page kept failing with retryable errors until the ceiling was hit.
    #[error("page {page} failed after {attempts} attempts: {source:#}")]
    RetriesExhausted {
        page: u64,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
    /// A page failed with an error that is not worth retrying.
    #[error("page {page} failed with a non-retryable error: {source:#}")]
    PageFailed {
        page: u64,
        #[source]
        source: anyhow::Error,
    },
    /// Single-record sync target does not exist by id or slug.
    #[error("no dataset found with id or slug '{0}'")]
    NotFound(String),
    /// Single-record sync was asked to drop and recreate the index.
    #[error("recreating the index is not allowed when syncing a single dataset")]
    RecreateNotAllowed,
    /// Single-record sync: the index rejected the document.
    #[error(
        "index rejected dataset {}: status {} {} ({})",
        .0.document_id,
        .0.status,
        .0.error_type,
        .0.error_reason
    )]
    DocumentRejected(BulkItemError),
}
