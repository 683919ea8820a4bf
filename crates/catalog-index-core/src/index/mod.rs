//! Search index access: backend trait, request/response types, and the
//! [`IndexClient`] that the sync and reconciliation jobs write through.
//!
//! [`IndexBackend`] is the thin wire-level surface (OpenSearch over HTTP in
//! the binary, [`memory::InMemoryIndex`] in tests). [`IndexClient`] layers
//! the behaviour callers rely on: idempotent schema management, bulk writes
//! that never abort on one bad document, throttled-item retry, best-effort
//! deletes, query compilation hand-off, and the timeout retry wrapper.

pub mod memory;

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::IndexError;
use crate::models::Document;
use crate::query::QueryNode;
use crate::retry::{classify_timeout, with_retry, RetryPolicy, Sleeper};
use crate::store::IdTimestamp;

/// Name of the exact-match sub-field under `keyword` and `theme`.
pub const EXACT_SUBFIELD: &str = "raw";

/// Throttled (HTTP 429) bulk items are resubmitted at most this many times.
pub const BULK_ITEM_MAX_RETRIES: u32 = 3;

/// Fixed index mapping.
///
/// `keyword` and `theme` are analysed text with a `raw` keyword sub-field
/// used for exact filtering and aggregation. The DCAT blob is stored for
/// display but not indexed.
pub fn index_mapping() -> Value {
    let text_with_raw = json!({
        "type": "text",
        "fields": { EXACT_SUBFIELD: { "type": "keyword" } }
    });
    json!({
        "properties": {
            "title": { "type": "text" },
            "slug": { "type": "keyword" },
            "description": { "type": "text" },
            "publisher": { "type": "text" },
            "keyword": text_with_raw,
            "theme": text_with_raw,
            "identifier": { "type": "text" },
            "popularity": { "type": "integer" },
            "last_harvested_date": { "type": "date" },
            "dcat": { "type": "object", "enabled": false },
            "organization": {
                "type": "nested",
                "properties": {
                    "id": { "type": "keyword" },
                    "name": { "type": "text" },
                    "description": { "type": "text" },
                    "slug": { "type": "keyword" },
                    "organization_type": { "type": "keyword" }
                }
            }
        }
    })
}

/// Does a mapping expose the exact-match keyword sub-field?
pub fn mapping_has_exact_keyword(mapping: &Value) -> bool {
    mapping
        .pointer(&format!("/properties/keyword/fields/{}/type", EXACT_SUBFIELD))
        .and_then(Value::as_str)
        == Some("keyword")
}

/// Structured record of one document the index refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkItemError {
    pub document_id: String,
    pub status: u16,
    pub error_type: String,
    pub error_reason: String,
    pub caused_by: Option<String>,
}

/// Per-document result of a bulk request, in request order.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkItemOutcome {
    Indexed,
    Failed(BulkItemError),
}

/// Aggregate result of [`IndexClient::upsert_batch`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkSummary {
    pub succeeded: u64,
    pub failed: u64,
    pub errors: Vec<BulkItemError>,
}

/// Result of a best-effort single delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The document was already absent.
    Missing,
    Failed(String),
}

/// Non-scoring filters applied to a search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    /// Exact match on `organization.id`.
    pub org_id: Option<String>,
    /// `organization.organization_type` must be one of these.
    pub org_types: Vec<String>,
    /// Every listed keyword must be present (exact match on `keyword.raw`).
    pub keywords: Vec<String>,
}

/// Result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    /// Score desc, then popularity desc (missing last), then id desc.
    #[default]
    Relevance,
    /// Popularity desc (missing last), then id desc.
    Popularity,
    /// Id desc only. Used when there is nothing to score.
    IdOnly,
}

impl std::str::FromStr for SortMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "relevance" => Ok(SortMode::Relevance),
            "popularity" => Ok(SortMode::Popularity),
            "id" => Ok(SortMode::IdOnly),
            other => bail!("Unknown sort mode: '{}'. Use relevance or popularity.", other),
        }
    }
}

/// Everything a backend needs to run one search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Scored query; `None` means filters only.
    pub query: Option<QueryNode>,
    pub filters: SearchFilters,
    pub sort: SortMode,
    pub size: usize,
    pub from: usize,
}

/// Search hits in rank order plus the total match count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedResults {
    pub total: u64,
    pub items: Vec<Document>,
}

impl RankedResults {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Wire-level index operations.
///
/// Errors that callers classify (timeouts, unavailability, missing index)
/// must be raised as [`IndexError`] inside the returned `anyhow::Error`.
#[async_trait]
pub trait IndexBackend: Send + Sync {
    async fn exists(&self) -> Result<bool>;
    async fn create(&self, mapping: &Value) -> Result<()>;
    /// Drop the whole index. Raises [`IndexError::NotFound`] if absent.
    async fn drop_index(&self) -> Result<()>;
    /// Current mapping as `{"properties": {...}}`.
    async fn mapping(&self) -> Result<Value>;
    /// Full-replace each document; one outcome per input, same order.
    async fn bulk_index(&self, documents: &[Document]) -> Result<Vec<BulkItemOutcome>>;
    /// Delete every document, keeping the index and its mapping.
    async fn delete_all(&self) -> Result<u64>;
    /// Raises [`IndexError::NotFound`] if the document is absent.
    async fn delete_document(&self, id: &str) -> Result<()>;
    async fn search(&self, request: &SearchRequest) -> Result<RankedResults>;
    /// Terms aggregation over `keyword.raw`, count desc.
    async fn keyword_terms(&self, size: usize, min_doc_count: u64) -> Result<Vec<(String, u64)>>;
    /// Id and freshness timestamp of every document, without full sources.
    async fn scan_freshness(&self) -> Result<Vec<IdTimestamp>>;
    async fn refresh(&self) -> Result<()>;
    async fn count(&self) -> Result<u64>;
}

/// Index client shared by the sync orchestrator and the reconciler.
///
/// Constructed once by the caller and passed by reference; it owns the
/// backend and the sleeper used for every backoff it performs.
pub struct IndexClient<B> {
    backend: B,
    sleeper: Arc<dyn Sleeper>,
    bulk_backoff: Duration,
    timeout_retries: u32,
    timeout_backoff: Duration,
}

impl<B: IndexBackend> IndexClient<B> {
    pub fn new(backend: B, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            backend,
            sleeper,
            bulk_backoff: Duration::from_secs(2),
            timeout_retries: 3,
            timeout_backoff: Duration::from_secs(2),
        }
    }

    /// Ceiling and base delay used by [`IndexClient::with_timeout_retry`].
    pub fn with_timeout_retries(mut self, max_retries: u32, backoff_base: Duration) -> Self {
        self.timeout_retries = max_retries;
        self.timeout_backoff = backoff_base;
        self
    }

    /// Initial delay before resubmitting throttled bulk items.
    pub fn with_bulk_backoff(mut self, delay: Duration) -> Self {
        self.bulk_backoff = delay;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn sleeper(&self) -> &dyn Sleeper {
        self.sleeper.as_ref()
    }

    /// Create the index with the fixed mapping if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        if !self.backend.exists().await? {
            tracing::info!("creating index with fixed mapping");
            self.backend.create(&index_mapping()).await?;
        }
        Ok(())
    }

    /// Drop the index (ignoring "already absent") and create it again.
    ///
    /// Destructive: reserved for mapping migrations. Use
    /// [`IndexClient::delete_all_documents`] to empty the index instead.
    pub async fn recreate_schema(&self) -> Result<()> {
        match self.backend.drop_index().await {
            Ok(()) => tracing::info!("dropped index"),
            Err(e) if matches!(e.downcast_ref::<IndexError>(), Some(IndexError::NotFound(_))) => {
                tracing::debug!("index already absent before recreate");
            }
            Err(e) => return Err(e),
        }
        self.ensure_schema().await
    }

    /// Whether the live mapping carries the `keyword.raw` sub-field.
    pub async fn has_exact_keyword_field(&self) -> Result<bool> {
        Ok(mapping_has_exact_keyword(&self.backend.mapping().await?))
    }

    /// Bulk upsert. A failure on one document never aborts the batch.
    ///
    /// Items throttled by the cluster (HTTP 429) are resubmitted up to
    /// [`BULK_ITEM_MAX_RETRIES`] times with doubling delay before being
    /// counted as failed. A request-level error (timeout, unreachable
    /// cluster) is returned to the caller untouched.
    pub async fn upsert_batch(&self, documents: &[Document]) -> Result<BulkSummary> {
        let mut summary = BulkSummary::default();
        let mut pending: Cow<'_, [Document]> = Cow::Borrowed(documents);
        let mut retry: u32 = 0;

        while !pending.is_empty() {
            let outcomes = self.backend.bulk_index(&pending).await?;
            if outcomes.len() != pending.len() {
                return Err(IndexError::Malformed(format!(
                    "bulk response has {} items for {} documents",
                    outcomes.len(),
                    pending.len()
                ))
                .into());
            }

            let mut throttled: Vec<Document> = Vec::new();
            for (doc, outcome) in pending.iter().zip(outcomes) {
                match outcome {
                    BulkItemOutcome::Indexed => summary.succeeded += 1,
                    BulkItemOutcome::Failed(err)
                        if err.status == 429 && retry < BULK_ITEM_MAX_RETRIES =>
                    {
                        throttled.push(doc.clone());
                    }
                    BulkItemOutcome::Failed(err) => {
                        tracing::warn!(
                            document_id = %err.document_id,
                            status = err.status,
                            error_type = %err.error_type,
                            reason = %err.error_reason,
                            "document rejected by index"
                        );
                        summary.failed += 1;
                        summary.errors.push(err);
                    }
                }
            }

            if throttled.is_empty() {
                break;
            }
            retry += 1;
            let delay = self.bulk_backoff.saturating_mul(1u32 << (retry - 1));
            tracing::warn!(
                throttled = throttled.len(),
                attempt = retry,
                delay_secs = delay.as_secs_f64(),
                "bulk items throttled, resubmitting after backoff"
            );
            self.sleeper.sleep(delay).await;
            pending = Cow::Owned(throttled);
        }

        Ok(summary)
    }

    /// Remove every document, keeping the schema.
    pub async fn delete_all_documents(&self) -> Result<u64> {
        let deleted = self.backend.delete_all().await?;
        tracing::info!(deleted, "emptied index");
        Ok(deleted)
    }

    /// Best-effort single delete. Never raises; the outcome says what happened.
    pub async fn delete_by_id(&self, id: &str) -> DeleteOutcome {
        match self.backend.delete_document(id).await {
            Ok(()) => DeleteOutcome::Deleted,
            Err(e) if matches!(e.downcast_ref::<IndexError>(), Some(IndexError::NotFound(_))) => {
                DeleteOutcome::Missing
            }
            Err(e) => DeleteOutcome::Failed(format!("{:#}", e)),
        }
    }

    /// Run a compiled query with filters and sort, returning the first
    /// `page_size` hits.
    pub async fn search(
        &self,
        node: &QueryNode,
        filters: &SearchFilters,
        sort: SortMode,
        page_size: usize,
    ) -> Result<RankedResults> {
        self.search_page(node, filters, sort, page_size, 0).await
    }

    /// [`IndexClient::search`] starting at offset `from`.
    ///
    /// A match-all query with no keyword filter degrades to a pure filter
    /// query ordered by id, whatever sort was requested.
    pub async fn search_page(
        &self,
        node: &QueryNode,
        filters: &SearchFilters,
        sort: SortMode,
        page_size: usize,
        from: usize,
    ) -> Result<RankedResults> {
        let query = if node.is_match_all() {
            None
        } else {
            Some(node.clone())
        };
        let sort = if query.is_none() && filters.keywords.is_empty() {
            SortMode::IdOnly
        } else {
            sort
        };

        let request = SearchRequest {
            query,
            filters: filters.clone(),
            sort,
            size: page_size,
            from,
        };
        self.backend.search(&request).await
    }

    /// Most common exact keywords, count desc, at most `size` buckets, each
    /// with at least `min_doc_count` documents.
    pub async fn keyword_aggregation(
        &self,
        size: usize,
        min_doc_count: u64,
    ) -> Result<Vec<(String, u64)>> {
        self.backend.keyword_terms(size, min_doc_count).await
    }

    pub async fn refresh(&self) -> Result<()> {
        self.backend.refresh().await
    }

    pub async fn count(&self) -> Result<u64> {
        self.backend.count().await
    }

    /// Id and freshness of every indexed document.
    pub async fn scan_freshness(&self) -> Result<Vec<IdTimestamp>> {
        self.backend.scan_freshness().await
    }

    /// Invoke `action`, retrying timeout-class failures after
    /// `backoff_base * 2^(attempt-1)` up to `max_retries` extra attempts.
    ///
    /// Any other error, or the last timeout once retries run out, is
    /// returned exactly as `action` raised it.
    pub async fn run_with_retry<T, F, Fut>(
        &self,
        name: &str,
        max_retries: u32,
        backoff_base: Duration,
        action: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = RetryPolicy::new(max_retries, backoff_base, classify_timeout);
        with_retry(&policy, self.sleeper.as_ref(), name, action)
            .await
            .map_err(|failure| failure.error)
    }

    /// [`IndexClient::run_with_retry`] with the client's configured ceiling.
    pub async fn with_timeout_retry<T, F, Fut>(&self, name: &str, action: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with_retry(name, self.timeout_retries, self.timeout_backoff, action)
            .await
    }
}
