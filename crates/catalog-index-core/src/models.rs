//! Core data models shared by the store, the index, and the sync pipeline.
//!
//! A [`CatalogRecord`] is the authoritative row as read from the catalog
//! store. A [`Document`] is its denormalized projection inside the search
//! index: one document per record, keyed by the same identifier, always
//! written as a full replacement.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// The publishing organization, embedded in every record and document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub slug: String,
    #[serde(default)]
    pub organization_type: Option<String>,
}

/// The upstream harvest source a record was imported from.
///
/// Only used for attributing indexing failures back to an operator-facing
/// source; it is not part of the indexed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestSourceRef {
    pub id: String,
    pub name: String,
}

/// One catalog record as stored in the authoritative database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: String,
    pub slug: String,
    /// DCAT-US metadata blob. Title, description, publisher, keyword, theme,
    /// and identifier are read from here when projecting into a [`Document`].
    pub dcat: serde_json::Value,
    pub organization: Organization,
    #[serde(default)]
    pub harvest_source: Option<HarvestSourceRef>,
    #[serde(default)]
    pub popularity: Option<i64>,
    /// Freshness timestamp, exactly as the store returned it (may be naive,
    /// offset-qualified, or absent).
    #[serde(default)]
    pub last_harvested_date: Option<String>,
}

/// Indexed projection of one [`CatalogRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub publisher: String,
    #[serde(default)]
    pub keyword: Vec<String>,
    #[serde(default)]
    pub theme: Vec<String>,
    pub identifier: String,
    pub organization: Organization,
    #[serde(default)]
    pub popularity: Option<i64>,
    #[serde(default)]
    pub last_harvested_date: Option<String>,
    #[serde(default)]
    pub dcat: serde_json::Value,
}

impl Document {
    /// Project an authoritative record into its index document.
    ///
    /// Missing DCAT fields become empty strings or empty lists. Keyword and
    /// theme keep their order and duplicates. The freshness timestamp is
    /// normalized to UTC so the index stores a comparable value.
    pub fn from_record(record: &CatalogRecord) -> Self {
        let dcat = &record.dcat;
        Self {
            id: record.id.clone(),
            slug: record.slug.clone(),
            title: dcat_str(dcat, "title"),
            description: dcat_str(dcat, "description"),
            publisher: dcat
                .get("publisher")
                .and_then(|p| p.get("name"))
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_string(),
            keyword: dcat_list(dcat, "keyword"),
            theme: dcat_list(dcat, "theme"),
            identifier: dcat_str(dcat, "identifier"),
            organization: record.organization.clone(),
            popularity: record.popularity,
            last_harvested_date: record.last_harvested_date.as_deref().and_then(to_utc_iso),
            dcat: dcat.clone(),
        }
    }
}

fn dcat_str(dcat: &serde_json::Value, key: &str) -> String {
    dcat.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn dcat_list(dcat: &serde_json::Value, key: &str) -> Vec<String> {
    match dcat.get(key) {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Convert a timestamp string to a UTC ISO-8601 string with microsecond
/// precision (`2024-03-01T12:00:00.000000+00:00`).
///
/// Offset-qualified inputs are shifted to UTC; naive inputs are taken to be
/// UTC already. Blank input yields `None`. Input in no recognised format is
/// returned trimmed but otherwise untouched, so it still compares by value.
pub fn to_utc_iso(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(format_utc(dt.with_timezone(&Utc)));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(format_utc(dt.with_timezone(&Utc)));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(format_utc(naive.and_utc()));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Some(format_utc(midnight.and_utc()));
        }
    }

    Some(raw.to_string())
}

fn format_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> CatalogRecord {
        CatalogRecord {
            id: "d1".to_string(),
            slug: "water-quality".to_string(),
            dcat: json!({
                "title": "Water Quality",
                "description": "Samples from rivers",
                "publisher": {"name": "EPA"},
                "keyword": ["water", "rivers", "water"],
                "theme": "environment",
                "identifier": "epa-wq-1",
            }),
            organization: Organization {
                id: "org-1".to_string(),
                name: "EPA".to_string(),
                description: None,
                slug: "epa".to_string(),
                organization_type: Some("Federal Government".to_string()),
            },
            harvest_source: None,
            popularity: Some(12),
            last_harvested_date: Some("2024-03-01 07:00:00-05:00".to_string()),
        }
    }

    #[test]
    fn test_from_record_projects_dcat_fields() {
        let doc = Document::from_record(&record());
        assert_eq!(doc.id, "d1");
        assert_eq!(doc.title, "Water Quality");
        assert_eq!(doc.publisher, "EPA");
        assert_eq!(doc.keyword, vec!["water", "rivers", "water"]);
        assert_eq!(doc.theme, vec!["environment"]);
        assert_eq!(doc.identifier, "epa-wq-1");
        assert_eq!(
            doc.last_harvested_date.as_deref(),
            Some("2024-03-01T12:00:00.000000+00:00")
        );
    }

    #[test]
    fn test_from_record_missing_fields_default_empty() {
        let mut rec = record();
        rec.dcat = json!({});
        rec.last_harvested_date = None;
        let doc = Document::from_record(&rec);
        assert_eq!(doc.title, "");
        assert_eq!(doc.publisher, "");
        assert!(doc.keyword.is_empty());
        assert!(doc.last_harvested_date.is_none());
    }

    #[test]
    fn test_to_utc_iso_naive_and_aware_agree() {
        let naive = to_utc_iso("2024-03-01T12:00:00").unwrap();
        let aware = to_utc_iso("2024-03-01T14:00:00+02:00").unwrap();
        let zulu = to_utc_iso("2024-03-01T12:00:00Z").unwrap();
        assert_eq!(naive, aware);
        assert_eq!(naive, zulu);
    }

    #[test]
    fn test_to_utc_iso_blank_and_unparseable() {
        assert_eq!(to_utc_iso("   "), None);
        assert_eq!(to_utc_iso(" yesterday ").as_deref(), Some("yesterday"));
    }
}
