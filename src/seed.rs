//! `catalog seed`: load datasets into the catalog database from a JSON Lines
//! file, one record per line.
//!
//! ```json
//! {"slug": "water-quality", "dcat": {"title": "Water Quality"},
//!  "organization": {"id": "org-1", "name": "EPA", "slug": "epa"},
//!  "last_harvested_date": "2024-03-01T12:00:00"}
//! ```
//!
//! `id` is optional. A line without one takes the id of the stored dataset
//! with the same slug, or a random UUID when there is none, so seeding the
//! same file twice replaces records instead of colliding on the slug. Blank
//! lines are ignored. Existing records with the same id are replaced.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use uuid::Uuid;

use catalog_index_core::models::{CatalogRecord, HarvestSourceRef, Organization};
use catalog_index_core::store::CatalogStore;

use crate::config::Config;
use crate::migrate;
use crate::runtime;

#[derive(Debug, Deserialize)]
struct SeedRecord {
    #[serde(default)]
    id: Option<String>,
    slug: String,
    #[serde(default = "empty_object")]
    dcat: serde_json::Value,
    organization: Organization,
    #[serde(default)]
    harvest_source: Option<HarvestSourceRef>,
    #[serde(default)]
    popularity: Option<i64>,
    #[serde(default)]
    last_harvested_date: Option<String>,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

impl SeedRecord {
    /// `stored_id` is used when the line carries no id of its own.
    fn into_record(self, stored_id: Option<String>) -> CatalogRecord {
        CatalogRecord {
            id: self
                .id
                .or(stored_id)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            slug: self.slug,
            dcat: self.dcat,
            organization: self.organization,
            harvest_source: self.harvest_source,
            popularity: self.popularity,
            last_harvested_date: self.last_harvested_date,
        }
    }
}

/// Parse a JSON Lines document. Line numbers in errors are 1-based.
fn parse_seed(content: &str) -> Result<Vec<SeedRecord>> {
    let mut records = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let seed: SeedRecord = serde_json::from_str(line)
            .with_context(|| format!("Invalid seed record on line {}", i + 1))?;
        records.push(seed);
    }
    Ok(records)
}

pub async fn run_seed(config: &Config, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read seed file: {}", file.display()))?;
    let seeds = parse_seed(&content)?;
    let count = seeds.len();

    let store = runtime::open_store(config).await?;
    migrate::apply(store.pool()).await?;
    let result = async {
        for seed in seeds {
            let stored_id = match seed.id {
                Some(_) => None,
                None => store.find_by_slug(&seed.slug).await?.map(|r| r.id),
            };
            let record = seed.into_record(stored_id);
            store
                .upsert_record(&record)
                .await
                .with_context(|| format!("Failed to store dataset {}", record.slug))?;
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;
    store.pool().close().await;
    result?;

    tracing::info!(count, file = %file.display(), "seeded datasets");
    println!("Seeded {} datasets.", count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORG: &str = r#""organization": {"id": "org-1", "name": "EPA", "slug": "epa"}"#;

    #[test]
    fn test_parse_skips_blank_lines() {
        let content = format!(
            "{{\"id\": \"d1\", \"slug\": \"a\", {org}}}\n\n{{\"slug\": \"b\", {org}}}\n",
            org = ORG
        );
        let seeds = parse_seed(&content).unwrap();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].id.as_deref(), Some("d1"));
        assert_eq!(seeds[1].id, None);
        assert_eq!(seeds[1].dcat, serde_json::json!({}));
    }

    #[test]
    fn test_missing_id_prefers_stored_id() {
        let content = format!("{{\"slug\": \"b\", {org}}}\n{{\"slug\": \"b\", {org}}}", org = ORG);
        let mut seeds = parse_seed(&content).unwrap().into_iter();

        let fresh = seeds.next().unwrap().into_record(None);
        assert!(Uuid::parse_str(&fresh.id).is_ok());
        let reused = seeds.next().unwrap().into_record(Some("d7".to_string()));
        assert_eq!(reused.id, "d7");
    }

    #[test]
    fn test_own_id_wins_over_stored_id() {
        let content = format!("{{\"id\": \"d1\", \"slug\": \"a\", {}}}", ORG);
        let record = parse_seed(&content)
            .unwrap()
            .remove(0)
            .into_record(Some("d7".to_string()));
        assert_eq!(record.id, "d1");
    }

    #[test]
    fn test_parse_reports_line_number() {
        let content = format!("{{\"slug\": \"a\", {}}}\nnot json\n", ORG);
        let err = parse_seed(&content).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
