//! OpenSearch [`IndexBackend`] over the REST API.
//!
//! Talks to the cluster with `reqwest`, authenticating with basic auth for
//! self-hosted clusters or AWS SigV4 for managed domains. Compiled
//! [`QueryNode`] trees are rendered into query DSL by [`search_body`].
//!
//! # Error mapping
//!
//! | Condition | Error |
//! |-----------|-------|
//! | client timeout, HTTP 408 / 504 | [`IndexError::Timeout`] |
//! | connection failure, HTTP 429 / 502 / 503 | [`IndexError::Unavailable`] |
//! | HTTP 404 | [`IndexError::NotFound`] |
//! | any other non-2xx | [`IndexError::Status`] |
//! | unexpected response body | [`IndexError::Malformed`] |

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Method, Url};
use serde_json::{json, Value};

use catalog_index_core::error::IndexError;
use catalog_index_core::index::{
    BulkItemError, BulkItemOutcome, IndexBackend, RankedResults, SearchRequest, SortMode,
    EXACT_SUBFIELD,
};
use catalog_index_core::models::Document;
use catalog_index_core::query::{MatchMode, QueryNode, SEARCH_FIELDS};
use catalog_index_core::store::IdTimestamp;

use crate::config::IndexConfig;
use crate::sigv4::{self, AwsCredentials, SigningRequest};

/// Hits fetched per scroll page during the freshness scan.
const SCROLL_PAGE_SIZE: usize = 1000;
const SCROLL_KEEPALIVE: &str = "2m";

enum Auth {
    None,
    Basic { username: String, password: String },
    SigV4 { creds: AwsCredentials, region: String },
}

/// OpenSearch cluster client bound to one index.
pub struct OpenSearchBackend {
    http: reqwest::Client,
    base_url: Url,
    index: String,
    auth: Auth,
}

impl OpenSearchBackend {
    pub fn from_config(config: &IndexConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| anyhow::anyhow!("Invalid index.url '{}': {}", config.url, e))?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        let auth = match (&config.aws_region, &config.username) {
            (Some(region), _) => Auth::SigV4 {
                creds: AwsCredentials::from_env()?,
                region: region.clone(),
            },
            (None, Some(username)) => Auth::Basic {
                username: username.clone(),
                password: config.password.clone().unwrap_or_default(),
            },
            (None, None) => Auth::None,
        };

        Ok(Self {
            http,
            base_url,
            index: config.name.clone(),
            auth,
        })
    }

    fn host_header(&self) -> String {
        let host = self.base_url.host_str().unwrap_or_default();
        match self.base_url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    fn index_path(&self, suffix: &str) -> String {
        format!("/{}{}", sigv4::uri_encode(&self.index), suffix)
    }

    /// Send one request and return the status and body text. Transport
    /// failures are mapped to [`IndexError`]; HTTP statuses are not checked.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<(Vec<u8>, &'static str)>,
    ) -> Result<(u16, String)> {
        let query_string = sigv4::canonical_query(query);
        let mut url = self.base_url.clone();
        url.set_path(path);
        url.set_query(if query_string.is_empty() {
            None
        } else {
            Some(query_string.as_str())
        });

        let (bytes, content_type) = body.unwrap_or((Vec::new(), "application/json"));
        let mut req = self.http.request(method.clone(), url);

        match &self.auth {
            Auth::None => {}
            Auth::Basic { username, password } => {
                req = req.basic_auth(username, Some(password));
            }
            Auth::SigV4 { creds, region } => {
                let host = self.host_header();
                let signing = SigningRequest {
                    method: method.as_str(),
                    host: &host,
                    path,
                    query: &query_string,
                    body: &bytes,
                };
                for (name, value) in sigv4::sign(creds, region, &signing, chrono::Utc::now()) {
                    req = req.header(name, value);
                }
            }
        }

        if !bytes.is_empty() {
            req = req.header("Content-Type", content_type).body(bytes);
        }

        let resp = req.send().await.map_err(transport_error)?;
        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(transport_error)?;
        Ok((status, text))
    }

    /// [`OpenSearchBackend::send`] with a JSON body, failing on non-2xx.
    async fn send_json(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let body = match body {
            Some(value) => Some((serde_json::to_vec(value)?, "application/json")),
            None => None,
        };
        let (status, text) = self.send(method, path, query, body).await?;
        check_status(status, &text)?;
        parse_json(&text)
    }

    /// Collect `(id, last_harvested_date)` from `first` and every following
    /// scroll page. `scroll_id` always holds the newest id seen.
    async fn drain_scroll(
        &self,
        first: Value,
        scroll_id: &mut Option<String>,
        pairs: &mut Vec<IdTimestamp>,
    ) -> Result<()> {
        let mut resp = first;
        loop {
            let hits = resp
                .pointer("/hits/hits")
                .and_then(Value::as_array)
                .ok_or_else(|| IndexError::Malformed("scroll response has no hits".into()))?;
            if hits.is_empty() {
                return Ok(());
            }
            for hit in hits {
                let Some(id) = hit["_id"].as_str() else { continue };
                let ts = hit
                    .pointer("/_source/last_harvested_date")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                pairs.push((id.to_string(), ts));
            }
            let Some(id) = scroll_id.clone() else {
                return Ok(());
            };
            resp = self
                .send_json(
                    Method::POST,
                    "/_search/scroll",
                    &[],
                    Some(&json!({ "scroll": SCROLL_KEEPALIVE, "scroll_id": id })),
                )
                .await?;
            if let Some(next) = resp["_scroll_id"].as_str() {
                *scroll_id = Some(next.to_string());
            }
        }
    }
}

fn transport_error(err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        IndexError::Timeout(err.to_string()).into()
    } else {
        IndexError::Unavailable(err.to_string()).into()
    }
}

fn check_status(status: u16, body: &str) -> Result<(), IndexError> {
    let snippet = || body.chars().take(500).collect::<String>();
    match status {
        200..=299 => Ok(()),
        404 => Err(IndexError::NotFound(snippet())),
        408 | 504 => Err(IndexError::Timeout(format!("HTTP {}", status))),
        429 | 502 | 503 => Err(IndexError::Unavailable(format!("HTTP {}: {}", status, snippet()))),
        _ => Err(IndexError::Status {
            status,
            body: snippet(),
        }),
    }
}

fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| IndexError::Malformed(e.to_string()).into())
}

#[async_trait]
impl IndexBackend for OpenSearchBackend {
    async fn exists(&self) -> Result<bool> {
        let (status, text) = self
            .send(Method::HEAD, &self.index_path(""), &[], None)
            .await?;
        match status {
            404 => Ok(false),
            _ => {
                check_status(status, &text)?;
                Ok(true)
            }
        }
    }

    async fn create(&self, mapping: &Value) -> Result<()> {
        let body = json!({ "mappings": mapping });
        self.send_json(Method::PUT, &self.index_path(""), &[], Some(&body))
            .await?;
        Ok(())
    }

    async fn drop_index(&self) -> Result<()> {
        self.send_json(Method::DELETE, &self.index_path(""), &[], None)
            .await?;
        Ok(())
    }

    async fn mapping(&self) -> Result<Value> {
        let resp = self
            .send_json(Method::GET, &self.index_path("/_mapping"), &[], None)
            .await?;
        // Keyed by the concrete index name, which differs when `name` is an alias.
        resp.as_object()
            .and_then(|indices| indices.values().next())
            .and_then(|entry| entry.get("mappings"))
            .cloned()
            .ok_or_else(|| IndexError::Malformed("mapping response has no mappings".into()).into())
    }

    async fn bulk_index(&self, documents: &[Document]) -> Result<Vec<BulkItemOutcome>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let mut ndjson = Vec::new();
        for doc in documents {
            let action = json!({ "index": { "_index": self.index, "_id": doc.id } });
            serde_json::to_writer(&mut ndjson, &action)?;
            ndjson.push(b'\n');
            serde_json::to_writer(&mut ndjson, doc)?;
            ndjson.push(b'\n');
        }

        let (status, text) = self
            .send(
                Method::POST,
                "/_bulk",
                &[],
                Some((ndjson, "application/x-ndjson")),
            )
            .await?;
        check_status(status, &text)?;
        parse_bulk_response(&parse_json(&text)?, documents)
    }

    async fn delete_all(&self) -> Result<u64> {
        let body = json!({ "query": { "match_all": {} } });
        let resp = self
            .send_json(
                Method::POST,
                &self.index_path("/_delete_by_query"),
                &[("conflicts", "proceed".to_string()), ("refresh", "true".to_string())],
                Some(&body),
            )
            .await?;
        Ok(resp["deleted"].as_u64().unwrap_or(0))
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        let path = self.index_path(&format!("/_doc/{}", sigv4::uri_encode(id)));
        self.send_json(Method::DELETE, &path, &[], None).await?;
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<RankedResults> {
        let body = search_body(request);
        tracing::debug!(body = %body, "search request");
        let resp = self
            .send_json(Method::POST, &self.index_path("/_search"), &[], Some(&body))
            .await?;
        parse_search_response(&resp)
    }

    async fn keyword_terms(&self, size: usize, min_doc_count: u64) -> Result<Vec<(String, u64)>> {
        let body = json!({
            "size": 0,
            "aggs": {
                "keywords": {
                    "terms": {
                        "field": format!("keyword.{}", EXACT_SUBFIELD),
                        "size": size,
                        "min_doc_count": min_doc_count,
                    }
                }
            }
        });
        let resp = self
            .send_json(Method::POST, &self.index_path("/_search"), &[], Some(&body))
            .await?;
        let buckets = resp
            .pointer("/aggregations/keywords/buckets")
            .and_then(Value::as_array)
            .ok_or_else(|| IndexError::Malformed("aggregation response has no buckets".into()))?;
        Ok(buckets
            .iter()
            .filter_map(|b| Some((b["key"].as_str()?.to_string(), b["doc_count"].as_u64()?)))
            .collect())
    }

    async fn scan_freshness(&self) -> Result<Vec<IdTimestamp>> {
        let body = json!({
            "size": SCROLL_PAGE_SIZE,
            "_source": ["last_harvested_date"],
            "sort": ["_doc"],
            "query": { "match_all": {} }
        });
        let resp = self
            .send_json(
                Method::POST,
                &self.index_path("/_search"),
                &[("scroll", SCROLL_KEEPALIVE.to_string())],
                Some(&body),
            )
            .await?;

        let mut pairs = Vec::new();
        let mut scroll_id = resp["_scroll_id"].as_str().map(str::to_string);
        let result = self.drain_scroll(resp, &mut scroll_id, &mut pairs).await;

        // The scroll context is released on failure as well.
        if let Some(id) = scroll_id {
            let clear = json!({ "scroll_id": [id] });
            if let Err(e) = self
                .send_json(Method::DELETE, "/_search/scroll", &[], Some(&clear))
                .await
            {
                tracing::debug!(error = %e, "failed to clear scroll context");
            }
        }
        result.map(|()| pairs)
    }

    async fn refresh(&self) -> Result<()> {
        self.send_json(Method::POST, &self.index_path("/_refresh"), &[], None)
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let resp = self
            .send_json(Method::GET, &self.index_path("/_count"), &[], None)
            .await?;
        resp["count"]
            .as_u64()
            .ok_or_else(|| IndexError::Malformed("count response has no count".into()).into())
    }
}

// ============ Query DSL ============

fn weighted_fields() -> Vec<String> {
    SEARCH_FIELDS
        .iter()
        .map(|f| {
            if f.boost == 1.0 {
                f.field.to_string()
            } else {
                format!("{}^{}", f.field, f.boost)
            }
        })
        .collect()
}

/// Render a compiled query tree as query DSL.
pub fn query_clause(node: &QueryNode) -> Value {
    match node {
        QueryNode::MatchAll => json!({ "match_all": {} }),
        QueryNode::WeightedMatch {
            text,
            mode: MatchMode::And,
        } => json!({
            "multi_match": {
                "query": text,
                "type": "cross_fields",
                "fields": weighted_fields(),
                "operator": "and",
                "zero_terms_query": "none"
            }
        }),
        QueryNode::WeightedMatch {
            text,
            mode: MatchMode::Phrase,
        } => json!({
            "multi_match": {
                "query": text,
                "type": "phrase",
                "fields": weighted_fields()
            }
        }),
        QueryNode::Or(children) => json!({
            "bool": {
                "should": children.iter().map(query_clause).collect::<Vec<_>>(),
                "minimum_should_match": 1
            }
        }),
    }
}

fn sort_clause(sort: SortMode) -> Value {
    let popularity = json!({ "popularity": { "order": "desc", "missing": "_last" } });
    let id = json!({ "_id": { "order": "desc" } });
    match sort {
        SortMode::Relevance => json!([{ "_score": { "order": "desc" } }, popularity, id]),
        SortMode::Popularity => json!([popularity, id]),
        SortMode::IdOnly => json!([id]),
    }
}

/// Full `_search` body for a request.
pub fn search_body(request: &SearchRequest) -> Value {
    let filters = &request.filters;
    let mut filter = Vec::new();
    if let Some(org_id) = &filters.org_id {
        filter.push(json!({
            "nested": {
                "path": "organization",
                "query": { "term": { "organization.id": org_id } }
            }
        }));
    }
    if !filters.org_types.is_empty() {
        filter.push(json!({
            "nested": {
                "path": "organization",
                "query": { "terms": { "organization.organization_type": filters.org_types } }
            }
        }));
    }
    for keyword in &filters.keywords {
        filter.push(json!({ "term": { format!("keyword.{}", EXACT_SUBFIELD): keyword } }));
    }

    let mut bool_query = serde_json::Map::new();
    if let Some(node) = &request.query {
        bool_query.insert("must".to_string(), json!([query_clause(node)]));
    }
    if !filter.is_empty() {
        bool_query.insert("filter".to_string(), Value::Array(filter));
    }
    let query = if bool_query.is_empty() {
        json!({ "match_all": {} })
    } else {
        json!({ "bool": bool_query })
    };

    json!({
        "query": query,
        "sort": sort_clause(request.sort),
        "size": request.size,
        "from": request.from,
        "track_total_hits": true
    })
}

fn parse_search_response(resp: &Value) -> Result<RankedResults> {
    let total = resp
        .pointer("/hits/total/value")
        .and_then(Value::as_u64)
        .ok_or_else(|| IndexError::Malformed("search response has no total".into()))?;
    let hits = resp
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| IndexError::Malformed("search response has no hits".into()))?;

    let mut items = Vec::with_capacity(hits.len());
    for hit in hits {
        let source = hit
            .get("_source")
            .cloned()
            .ok_or_else(|| IndexError::Malformed("search hit has no _source".into()))?;
        let doc: Document = serde_json::from_value(source)
            .map_err(|e| IndexError::Malformed(format!("search hit: {}", e)))?;
        items.push(doc);
    }
    Ok(RankedResults { total, items })
}

/// Align `_bulk` response items with the submitted documents.
fn parse_bulk_response(resp: &Value, documents: &[Document]) -> Result<Vec<BulkItemOutcome>> {
    let items = resp["items"]
        .as_array()
        .ok_or_else(|| IndexError::Malformed("bulk response has no items".into()))?;

    Ok(items
        .iter()
        .zip(documents)
        .map(|(item, doc)| {
            let result = &item["index"];
            let status = result["status"].as_u64().unwrap_or(0) as u16;
            match result.get("error") {
                None if (200..300).contains(&status) => BulkItemOutcome::Indexed,
                error => {
                    let error = error.cloned().unwrap_or(Value::Null);
                    BulkItemOutcome::Failed(BulkItemError {
                        document_id: result["_id"].as_str().unwrap_or(&doc.id).to_string(),
                        status,
                        error_type: error["type"].as_str().unwrap_or("unknown").to_string(),
                        error_reason: error["reason"].as_str().unwrap_or_default().to_string(),
                        caused_by: error.get("caused_by").map(|c| {
                            format!(
                                "{}: {}",
                                c["type"].as_str().unwrap_or("unknown"),
                                c["reason"].as_str().unwrap_or_default()
                            )
                        }),
                    })
                }
            }
        })
        .collect())
}
