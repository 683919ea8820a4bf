//! In-memory [`IndexBackend`] for tests and embedding.
//!
//! Scoring is a simplified stand-in for BM25: every term hit in a field adds
//! that field's boost. It keeps the properties callers depend on (AND needs
//! every term across the weighted fields, phrases need a contiguous token
//! run in one field, OR sums matching branches) without modelling term
//! statistics. Writes are visible immediately; `refresh` is a no-op.
//!
//! Tests can make individual documents fail with
//! [`InMemoryIndex::reject_document`] and [`InMemoryIndex::throttle_document`].

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::IndexError;
use crate::models::Document;
use crate::query::{MatchMode, QueryNode, SEARCH_FIELDS};
use crate::store::IdTimestamp;

use super::{BulkItemError, BulkItemOutcome, IndexBackend, RankedResults, SearchRequest, SortMode};

#[derive(Default)]
struct IndexState {
    mapping: Option<Value>,
    docs: BTreeMap<String, Document>,
    rejected: HashMap<String, BulkItemError>,
    throttled: HashMap<String, u32>,
    refreshes: u64,
}

/// In-memory search index.
#[derive(Default)]
pub struct InMemoryIndex {
    state: RwLock<IndexState>,
}

impl InMemoryIndex {
    /// A backend with no index created yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose index already exists with `mapping`.
    pub fn with_mapping(mapping: Value) -> Self {
        let index = Self::new();
        index.state.write().unwrap().mapping = Some(mapping);
        index
    }

    /// Make every bulk write of `id` fail with HTTP 400.
    pub fn reject_document(&self, id: &str, error_type: &str, reason: &str) {
        self.state.write().unwrap().rejected.insert(
            id.to_string(),
            BulkItemError {
                document_id: id.to_string(),
                status: 400,
                error_type: error_type.to_string(),
                error_reason: reason.to_string(),
                caused_by: None,
            },
        );
    }

    /// Answer the next `times` bulk writes of `id` with HTTP 429.
    pub fn throttle_document(&self, id: &str, times: u32) {
        self.state
            .write()
            .unwrap()
            .throttled
            .insert(id.to_string(), times);
    }

    /// Put a document straight into the index, bypassing bulk failure rules.
    pub fn put(&self, doc: Document) {
        let mut state = self.state.write().unwrap();
        state.mapping.get_or_insert_with(|| json!({}));
        state.docs.insert(doc.id.clone(), doc);
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.state.read().unwrap().docs.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.state.read().unwrap().docs.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of refreshes issued so far.
    pub fn refresh_count(&self) -> u64 {
        self.state.read().unwrap().refreshes
    }

    fn missing_index() -> anyhow::Error {
        IndexError::NotFound("index does not exist".to_string()).into()
    }
}

#[async_trait]
impl IndexBackend for InMemoryIndex {
    async fn exists(&self) -> Result<bool> {
        Ok(self.state.read().unwrap().mapping.is_some())
    }

    async fn create(&self, mapping: &Value) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.mapping.is_some() {
            return Err(IndexError::Status {
                status: 400,
                body: "resource_already_exists_exception".to_string(),
            }
            .into());
        }
        state.mapping = Some(mapping.clone());
        Ok(())
    }

    async fn drop_index(&self) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.mapping.take().is_none() {
            return Err(Self::missing_index());
        }
        state.docs.clear();
        Ok(())
    }

    async fn mapping(&self) -> Result<Value> {
        self.state
            .read()
            .unwrap()
            .mapping
            .clone()
            .ok_or_else(Self::missing_index)
    }

    async fn bulk_index(&self, documents: &[Document]) -> Result<Vec<BulkItemOutcome>> {
        let mut state = self.state.write().unwrap();
        // Bulk writes auto-create the index with a dynamic mapping.
        state.mapping.get_or_insert_with(|| json!({}));

        let mut outcomes = Vec::with_capacity(documents.len());
        for doc in documents {
            if let Some(err) = state.rejected.get(&doc.id) {
                outcomes.push(BulkItemOutcome::Failed(err.clone()));
                continue;
            }
            if let Some(remaining) = state.throttled.get_mut(&doc.id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    outcomes.push(BulkItemOutcome::Failed(BulkItemError {
                        document_id: doc.id.clone(),
                        status: 429,
                        error_type: "es_rejected_execution_exception".to_string(),
                        error_reason: "rejected execution".to_string(),
                        caused_by: None,
                    }));
                    continue;
                }
            }
            state.docs.insert(doc.id.clone(), doc.clone());
            outcomes.push(BulkItemOutcome::Indexed);
        }
        Ok(outcomes)
    }

    async fn delete_all(&self) -> Result<u64> {
        let mut state = self.state.write().unwrap();
        if state.mapping.is_none() {
            return Err(Self::missing_index());
        }
        let deleted = state.docs.len() as u64;
        state.docs.clear();
        Ok(deleted)
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        match state.docs.remove(id) {
            Some(_) => Ok(()),
            None => Err(IndexError::NotFound(format!("document {}", id)).into()),
        }
    }

    async fn search(&self, request: &SearchRequest) -> Result<RankedResults> {
        let state = self.state.read().unwrap();
        if state.mapping.is_none() {
            return Err(Self::missing_index());
        }

        let mut hits: Vec<(f64, &Document)> = state
            .docs
            .values()
            .filter(|doc| passes_filters(doc, request))
            .filter_map(|doc| match &request.query {
                Some(node) => score_node(node, doc).map(|s| (s, doc)),
                None => Some((0.0, doc)),
            })
            .collect();

        hits.sort_by(|a, b| compare_hits(request.sort, a, b));

        Ok(RankedResults {
            total: hits.len() as u64,
            items: hits
                .into_iter()
                .skip(request.from)
                .take(request.size)
                .map(|(_, doc)| doc.clone())
                .collect(),
        })
    }

    async fn keyword_terms(&self, size: usize, min_doc_count: u64) -> Result<Vec<(String, u64)>> {
        let state = self.state.read().unwrap();
        if state.mapping.is_none() {
            return Err(Self::missing_index());
        }

        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        for doc in state.docs.values() {
            let distinct: BTreeSet<&str> = doc.keyword.iter().map(String::as_str).collect();
            for keyword in distinct {
                *counts.entry(keyword).or_default() += 1;
            }
        }

        let mut buckets: Vec<(String, u64)> = counts
            .into_iter()
            .filter(|(_, count)| *count >= min_doc_count)
            .map(|(k, c)| (k.to_string(), c))
            .collect();
        buckets.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        buckets.truncate(size);
        Ok(buckets)
    }

    async fn scan_freshness(&self) -> Result<Vec<IdTimestamp>> {
        let state = self.state.read().unwrap();
        if state.mapping.is_none() {
            return Err(Self::missing_index());
        }
        Ok(state
            .docs
            .values()
            .map(|d| (d.id.clone(), d.last_harvested_date.clone()))
            .collect())
    }

    async fn refresh(&self) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.mapping.is_none() {
            return Err(Self::missing_index());
        }
        state.refreshes += 1;
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let state = self.state.read().unwrap();
        if state.mapping.is_none() {
            return Err(Self::missing_index());
        }
        Ok(state.docs.len() as u64)
    }
}

// ============ Matching ============

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn field_values<'a>(doc: &'a Document, field: &str) -> Vec<&'a str> {
    match field {
        "title" => vec![doc.title.as_str()],
        "description" => vec![doc.description.as_str()],
        "publisher" => vec![doc.publisher.as_str()],
        "keyword" => doc.keyword.iter().map(String::as_str).collect(),
        "theme" => doc.theme.iter().map(String::as_str).collect(),
        "identifier" => vec![doc.identifier.as_str()],
        _ => Vec::new(),
    }
}

/// Score of `doc` under `node`, or `None` if it does not match.
fn score_node(node: &QueryNode, doc: &Document) -> Option<f64> {
    match node {
        QueryNode::MatchAll => Some(1.0),
        QueryNode::WeightedMatch { text, mode } => {
            let terms = tokenize(text);
            if terms.is_empty() {
                return None;
            }
            match mode {
                MatchMode::And => score_all_terms(&terms, doc),
                MatchMode::Phrase => score_phrase(&terms, doc),
            }
        }
        QueryNode::Or(children) => {
            let scores: Vec<f64> = children.iter().filter_map(|c| score_node(c, doc)).collect();
            if scores.is_empty() {
                None
            } else {
                Some(scores.iter().sum())
            }
        }
    }
}

fn score_all_terms(terms: &[String], doc: &Document) -> Option<f64> {
    let mut total = 0.0;
    for term in terms {
        let mut term_score = 0.0;
        for weight in SEARCH_FIELDS.iter() {
            let hits = field_values(doc, weight.field)
                .into_iter()
                .flat_map(tokenize)
                .filter(|t| t == term)
                .count();
            term_score += weight.boost * hits as f64;
        }
        if term_score == 0.0 {
            return None;
        }
        total += term_score;
    }
    Some(total)
}

fn score_phrase(terms: &[String], doc: &Document) -> Option<f64> {
    let mut total = 0.0;
    for weight in SEARCH_FIELDS.iter() {
        let matched = field_values(doc, weight.field)
            .into_iter()
            .map(tokenize)
            .any(|tokens| tokens.windows(terms.len()).any(|w| w == terms));
        if matched {
            total += weight.boost;
        }
    }
    (total > 0.0).then_some(total)
}

fn passes_filters(doc: &Document, request: &SearchRequest) -> bool {
    let filters = &request.filters;
    if let Some(org_id) = &filters.org_id {
        if &doc.organization.id != org_id {
            return false;
        }
    }
    if !filters.org_types.is_empty() {
        match &doc.organization.organization_type {
            Some(t) if filters.org_types.contains(t) => {}
            _ => return false,
        }
    }
    filters
        .keywords
        .iter()
        .all(|k| doc.keyword.iter().any(|dk| dk == k))
}

// ============ Ordering ============

/// Popularity descending with missing values last.
fn compare_popularity(a: Option<i64>, b: Option<i64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_hits(sort: SortMode, a: &(f64, &Document), b: &(f64, &Document)) -> Ordering {
    let by_id = b.1.id.cmp(&a.1.id);
    match sort {
        SortMode::Relevance => b
            .0
            .partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| compare_popularity(a.1.popularity, b.1.popularity))
            .then(by_id),
        SortMode::Popularity => compare_popularity(a.1.popularity, b.1.popularity).then(by_id),
        SortMode::IdOnly => by_id,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::index::{index_mapping, IndexClient, SearchFilters};
    use crate::models::Organization;
    use crate::query::compile;
    use crate::retry::NoSleep;

    fn doc(id: &str, title: &str, description: &str, keyword: &[&str], popularity: Option<i64>) -> Document {
        Document {
            id: id.to_string(),
            slug: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            publisher: String::new(),
            keyword: keyword.iter().map(|k| k.to_string()).collect(),
            theme: Vec::new(),
            identifier: String::new(),
            organization: Organization {
                id: "org-1".to_string(),
                name: "Org".to_string(),
                description: None,
                slug: "org".to_string(),
                organization_type: None,
            },
            popularity,
            last_harvested_date: None,
            dcat: Value::Null,
        }
    }

    fn owned_by(mut d: Document, org_id: &str, org_type: Option<&str>) -> Document {
        d.organization.id = org_id.to_string();
        d.organization.organization_type = org_type.map(str::to_string);
        d
    }

    fn ids(results: &RankedResults) -> Vec<&str> {
        results.items.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn test_and_is_cross_field() {
        let d = doc("a", "Health survey", "Food consumption", &[], None);
        assert!(score_node(&QueryNode::and("health food"), &d).is_some());
        assert!(score_node(&QueryNode::and("health water"), &d).is_none());
    }

    #[test]
    fn test_empty_and_matches_nothing() {
        let d = doc("a", "Health", "", &[], None);
        assert!(score_node(&QueryNode::and("  "), &d).is_none());
    }

    #[test]
    fn test_phrase_requires_adjacent_terms() {
        let adjacent = doc("a", "Health food guide", "", &[], None);
        let split = doc("b", "Health and food", "", &[], None);
        let node = QueryNode::phrase("health food");
        assert!(score_node(&node, &adjacent).is_some());
        assert!(score_node(&node, &split).is_none());
    }

    #[test]
    fn test_title_outweighs_description() {
        let in_title = doc("a", "Water", "", &[], None);
        let in_description = doc("b", "", "Water", &[], None);
        let node = QueryNode::and("water");
        assert!(score_node(&node, &in_title).unwrap() > score_node(&node, &in_description).unwrap());
    }

    #[test]
    fn test_relevance_ties_break_on_popularity_then_id() {
        let sort = SortMode::Relevance;
        let a = doc("a", "", "", &[], None);
        let b = doc("b", "", "", &[], Some(5));
        let c = doc("c", "", "", &[], None);
        let mut hits = vec![(1.0, &a), (1.0, &b), (1.0, &c)];
        hits.sort_by(|x, y| compare_hits(sort, x, y));
        let order: Vec<&str> = hits.iter().map(|(_, d)| d.id.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_keyword_filter_and_aggregation() {
        let index = InMemoryIndex::with_mapping(super::super::index_mapping());
        index.put(doc("a", "", "", &["health", "food"], None));
        index.put(doc("b", "", "", &["health", "health"], None));
        index.put(doc("c", "", "", &["water"], None));

        let buckets = index.keyword_terms(10, 1).await.unwrap();
        assert_eq!(buckets[0], ("health".to_string(), 2));
        assert_eq!(buckets.len(), 3);
        assert_eq!(index.keyword_terms(10, 2).await.unwrap().len(), 1);

        let request = SearchRequest {
            query: None,
            filters: SearchFilters {
                keywords: vec!["health".to_string(), "food".to_string()],
                ..Default::default()
            },
            sort: SortMode::IdOnly,
            size: 10,
            from: 0,
        };
        let results = index.search(&request).await.unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.items[0].id, "a");
    }

    #[tokio::test]
    async fn test_missing_index_errors() {
        let index = InMemoryIndex::new();
        assert!(!index.exists().await.unwrap());
        let err = index.count().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<IndexError>(), Some(IndexError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_popularity_sort_puts_missing_last_then_id_desc() {
        let index = InMemoryIndex::with_mapping(index_mapping());
        let client = IndexClient::new(index, Arc::new(NoSleep));
        client.backend().put(doc("a", "Open data", "", &[], None));
        client.backend().put(doc("b", "Open data", "", &[], Some(5)));
        client.backend().put(doc("c", "Open data", "", &[], Some(5)));
        client.backend().put(doc("d", "Open data", "", &[], Some(9)));

        let results = client
            .search(&compile("data"), &SearchFilters::default(), SortMode::Popularity, 10)
            .await
            .unwrap();
        assert_eq!(ids(&results), vec!["d", "c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_match_all_without_keywords_sorts_by_id_only() {
        let index = InMemoryIndex::with_mapping(index_mapping());
        let client = IndexClient::new(index, Arc::new(NoSleep));
        client.backend().put(doc("a", "", "", &["health"], Some(9)));
        client.backend().put(doc("b", "", "", &[], None));
        client.backend().put(doc("c", "", "", &["health"], Some(1)));
        let all = SearchFilters::default();

        for sort in [SortMode::Relevance, SortMode::Popularity] {
            let results = client.search(&compile("  "), &all, sort, 10).await.unwrap();
            assert_eq!(ids(&results), vec!["c", "b", "a"], "sort={:?}", sort);
        }

        // A keyword filter keeps the requested sort.
        let health = SearchFilters {
            keywords: vec!["health".to_string()],
            ..Default::default()
        };
        let results = client
            .search(&compile(""), &health, SortMode::Popularity, 10)
            .await
            .unwrap();
        assert_eq!(ids(&results), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_org_filters() {
        let index = InMemoryIndex::with_mapping(index_mapping());
        let client = IndexClient::new(index, Arc::new(NoSleep));
        let a = owned_by(doc("a", "", "", &[], None), "org-1", Some("Federal Government"));
        let b = owned_by(doc("b", "", "", &[], None), "org-2", Some("State Government"));
        let c = owned_by(doc("c", "", "", &[], None), "org-2", Some("City Government"));
        let d = owned_by(doc("d", "", "", &[], None), "org-3", None);
        for item in [a, b, c, d] {
            client.backend().put(item);
        }

        let by_org = SearchFilters {
            org_id: Some("org-2".to_string()),
            ..Default::default()
        };
        let results = client
            .search(&QueryNode::MatchAll, &by_org, SortMode::IdOnly, 10)
            .await
            .unwrap();
        assert_eq!(ids(&results), vec!["c", "b"]);

        let by_type = SearchFilters {
            org_types: vec!["Federal Government".to_string(), "City Government".to_string()],
            ..Default::default()
        };
        let results = client
            .search(&QueryNode::MatchAll, &by_type, SortMode::IdOnly, 10)
            .await
            .unwrap();
        assert_eq!(ids(&results), vec!["c", "a"]);
        assert_eq!(results.total, 2);

        let both = SearchFilters {
            org_id: Some("org-2".to_string()),
            org_types: vec!["Federal Government".to_string()],
            ..Default::default()
        };
        let results = client
            .search(&QueryNode::MatchAll, &both, SortMode::IdOnly, 10)
            .await
            .unwrap();
        assert_eq!(results.total, 0);
    }

    #[tokio::test]
    async fn test_recreate_schema_on_absent_index() {
        let client = IndexClient::new(InMemoryIndex::new(), Arc::new(NoSleep));
        assert!(!client.backend().exists().await.unwrap());

        client.recreate_schema().await.unwrap();
        assert!(client.backend().exists().await.unwrap());
        assert_eq!(client.backend().mapping().await.unwrap(), index_mapping());
    }
}
