//! Shared fixtures: record builders, a recording sleeper, and wrappers that
//! inject failures into the in-memory store and index.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use catalog_index_core::error::IndexError;
use catalog_index_core::index::memory::InMemoryIndex;
use catalog_index_core::index::{
    BulkItemOutcome, IndexBackend, IndexClient, RankedResults, SearchRequest,
};
use catalog_index_core::models::{CatalogRecord, Document, HarvestSourceRef, Organization};
use catalog_index_core::retry::Sleeper;
use catalog_index_core::store::memory::InMemoryCatalog;
use catalog_index_core::store::{CatalogStore, IdTimestamp};

pub fn org(id: &str, org_type: Option<&str>) -> Organization {
    Organization {
        id: id.to_string(),
        name: format!("Org {}", id),
        description: None,
        slug: id.to_string(),
        organization_type: org_type.map(str::to_string),
    }
}

pub fn record(id: &str, title: &str) -> CatalogRecord {
    CatalogRecord {
        id: id.to_string(),
        slug: format!("{}-slug", id),
        dcat: json!({
            "title": title,
            "description": format!("Description of {}", title),
            "publisher": {"name": "Data Office"},
            "keyword": ["open data"],
            "identifier": id,
        }),
        organization: org("org-1", Some("Federal Government")),
        harvest_source: Some(HarvestSourceRef {
            id: "hs-1".to_string(),
            name: "Main Harvest".to_string(),
        }),
        popularity: None,
        last_harvested_date: Some("2024-01-01T00:00:00".to_string()),
    }
}

/// `n` records with ids `d001..`, titled `Dataset N`.
pub fn records(n: usize) -> Vec<CatalogRecord> {
    (1..=n)
        .map(|i| record(&format!("d{:03}", i), &format!("Dataset {}", i)))
        .collect()
}

#[derive(Default)]
pub struct RecordingSleeper {
    pub delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

/// Forwards to [`InMemoryIndex`], except that queued errors are raised by
/// the next bulk calls, one per call, and deletes of marked ids fail.
#[derive(Default)]
pub struct FlakyIndex {
    pub inner: InMemoryIndex,
    bulk_failures: Mutex<VecDeque<IndexError>>,
    fail_every_bulk: Mutex<Option<fn() -> IndexError>>,
    failing_deletes: Mutex<HashSet<String>>,
    pub bulk_calls: AtomicU32,
}

impl FlakyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next bulk call with `err`.
    pub fn fail_next_bulk(&self, err: IndexError) {
        self.bulk_failures.lock().unwrap().push_back(err);
    }

    /// Fail every bulk call from now on.
    pub fn fail_every_bulk(&self, make: fn() -> IndexError) {
        *self.fail_every_bulk.lock().unwrap() = Some(make);
    }

    /// Answer every delete of `id` with HTTP 500.
    pub fn fail_delete(&self, id: &str) {
        self.failing_deletes.lock().unwrap().insert(id.to_string());
    }

    pub fn bulk_calls(&self) -> u32 {
        self.bulk_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndexBackend for FlakyIndex {
    async fn exists(&self) -> Result<bool> {
        self.inner.exists().await
    }

    async fn create(&self, mapping: &Value) -> Result<()> {
        self.inner.create(mapping).await
    }

    async fn drop_index(&self) -> Result<()> {
        self.inner.drop_index().await
    }

    async fn mapping(&self) -> Result<Value> {
        self.inner.mapping().await
    }

    async fn bulk_index(&self, documents: &[Document]) -> Result<Vec<BulkItemOutcome>> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        let always = *self.fail_every_bulk.lock().unwrap();
        if let Some(make) = always {
            return Err(make().into());
        }
        let queued = self.bulk_failures.lock().unwrap().pop_front();
        if let Some(err) = queued {
            return Err(err.into());
        }
        self.inner.bulk_index(documents).await
    }

    async fn delete_all(&self) -> Result<u64> {
        self.inner.delete_all().await
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        if self.failing_deletes.lock().unwrap().contains(id) {
            return Err(IndexError::Status {
                status: 500,
                body: "shard failure".to_string(),
            }
            .into());
        }
        self.inner.delete_document(id).await
    }

    async fn search(&self, request: &SearchRequest) -> Result<RankedResults> {
        self.inner.search(request).await
    }

    async fn keyword_terms(&self, size: usize, min_doc_count: u64) -> Result<Vec<(String, u64)>> {
        self.inner.keyword_terms(size, min_doc_count).await
    }

    async fn scan_freshness(&self) -> Result<Vec<IdTimestamp>> {
        self.inner.scan_freshness().await
    }

    async fn refresh(&self) -> Result<()> {
        self.inner.refresh().await
    }

    async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }
}

/// Forwards to [`InMemoryCatalog`], except that the next `n` page reads fail
/// with a serialization conflict.
#[derive(Default)]
pub struct ConflictingStore {
    pub inner: InMemoryCatalog,
    conflicts_left: AtomicU32,
}

impl ConflictingStore {
    pub fn new(inner: InMemoryCatalog, conflicts: u32) -> Self {
        Self {
            inner,
            conflicts_left: AtomicU32::new(conflicts),
        }
    }
}

#[async_trait]
impl CatalogStore for ConflictingStore {
    async fn count_all(&self) -> Result<u64> {
        self.inner.count_all().await
    }

    async fn page(&self, page_number: u64, page_size: u64) -> Result<Vec<CatalogRecord>> {
        let left = self.conflicts_left.load(Ordering::SeqCst);
        if left > 0 {
            self.conflicts_left.store(left - 1, Ordering::SeqCst);
            anyhow::bail!("could not serialize access due to read/write dependencies");
        }
        self.inner.page(page_number, page_size).await
    }

    async fn all_ids_and_timestamps(&self) -> Result<Vec<IdTimestamp>> {
        self.inner.all_ids_and_timestamps().await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<CatalogRecord>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<CatalogRecord>> {
        self.inner.find_by_slug(slug).await
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<CatalogRecord>> {
        self.inner.find_by_ids(ids).await
    }
}

/// Index client over `backend` that records every sleep in `sleeper`.
pub fn client<B: IndexBackend>(backend: B, sleeper: Arc<RecordingSleeper>) -> IndexClient<B> {
    IndexClient::new(backend, sleeper)
        .with_timeout_retries(3, Duration::from_secs(1))
        .with_bulk_backoff(Duration::from_millis(500))
}
