//! In-memory [`CatalogStore`] for tests and embedding.
//!
//! Records live in a `BTreeMap` keyed by id behind `std::sync::RwLock`, so
//! pages come back in the same stable id order a SQL `ORDER BY id` gives.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::CatalogRecord;

use super::{CatalogStore, IdTimestamp};

/// In-memory authoritative store.
#[derive(Default)]
pub struct InMemoryCatalog {
    records: RwLock<BTreeMap<String, CatalogRecord>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = CatalogRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: CatalogRecord) {
        self.records
            .write()
            .unwrap()
            .insert(record.id.clone(), record);
    }

    /// Remove a record, returning it if present.
    pub fn remove(&self, id: &str) -> Option<CatalogRecord> {
        self.records.write().unwrap().remove(id)
    }

    /// Overwrite a record's freshness timestamp.
    pub fn touch(&self, id: &str, last_harvested_date: Option<&str>) {
        if let Some(record) = self.records.write().unwrap().get_mut(id) {
            record.last_harvested_date = last_harvested_date.map(str::to_string);
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn count_all(&self) -> Result<u64> {
        Ok(self.records.read().unwrap().len() as u64)
    }

    async fn page(&self, page_number: u64, page_size: u64) -> Result<Vec<CatalogRecord>> {
        let offset = page_number.saturating_sub(1).saturating_mul(page_size) as usize;
        Ok(self
            .records
            .read()
            .unwrap()
            .values()
            .skip(offset)
            .take(page_size as usize)
            .cloned()
            .collect())
    }

    async fn all_ids_and_timestamps(&self) -> Result<Vec<IdTimestamp>> {
        Ok(self
            .records
            .read()
            .unwrap()
            .values()
            .map(|r| (r.id.clone(), r.last_harvested_date.clone()))
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<CatalogRecord>> {
        Ok(self.records.read().unwrap().get(id).cloned())
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<CatalogRecord>> {
        Ok(self
            .records
            .read()
            .unwrap()
            .values()
            .find(|r| r.slug == slug)
            .cloned())
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<CatalogRecord>> {
        let records = self.records.read().unwrap();
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }
}
