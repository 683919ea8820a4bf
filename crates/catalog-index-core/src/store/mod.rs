//! Read access to the authoritative catalog store.
//!
//! The [`CatalogStore`] trait is everything the sync and reconciliation
//! jobs need from the relational side: counts, ordered pages, the full
//! id/freshness listing, and lookups by id, slug, or id set.
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::CatalogRecord;

/// `(record id, raw freshness timestamp)` as listed by the store.
pub type IdTimestamp = (String, Option<String>);

/// Abstract authoritative store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`count_all`](CatalogStore::count_all) | Total number of records |
/// | [`page`](CatalogStore::page) | One page of records in stable id order |
/// | [`all_ids_and_timestamps`](CatalogStore::all_ids_and_timestamps) | Id and freshness of every record |
/// | [`find_by_id`](CatalogStore::find_by_id) | Single record by primary key |
/// | [`find_by_slug`](CatalogStore::find_by_slug) | Single record by slug |
/// | [`find_by_ids`](CatalogStore::find_by_ids) | Records for a set of ids (missing ids are omitted) |
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn count_all(&self) -> Result<u64>;

    /// Fetch page `page_number` (1-based) of `page_size` records, ordered by id.
    async fn page(&self, page_number: u64, page_size: u64) -> Result<Vec<CatalogRecord>>;

    async fn all_ids_and_timestamps(&self) -> Result<Vec<IdTimestamp>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<CatalogRecord>>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<CatalogRecord>>;

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<CatalogRecord>>;
}
