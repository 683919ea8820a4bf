//! SQLite-backed [`CatalogStore`] implementation.
//!
//! Reads datasets joined with their organization and (optional) harvest
//! source from the schema created by [`crate::migrate`]. Also carries the
//! write path used by `catalog seed`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use catalog_index_core::models::{CatalogRecord, HarvestSourceRef, Organization};
use catalog_index_core::store::{CatalogStore, IdTimestamp};

/// Ids bound per `IN (...)` query; stays under SQLite's host parameter limit.
const IDS_PER_QUERY: usize = 500;

const SELECT_RECORD: &str = r#"
    SELECT d.id, d.slug, d.dcat, d.popularity, d.last_harvested_date,
           o.id AS org_id, o.name AS org_name, o.description AS org_description,
           o.slug AS org_slug, o.organization_type AS org_type,
           h.id AS hs_id, h.name AS hs_name
    FROM dataset d
    JOIN organization o ON o.id = d.organization_id
    LEFT JOIN harvest_source h ON h.id = d.harvest_source_id
"#;

/// SQLite implementation of the [`CatalogStore`] trait.
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or replace a record with its organization and harvest source.
    pub async fn upsert_record(&self, record: &CatalogRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let org = &record.organization;

        sqlx::query(
            r#"
            INSERT INTO organization (id, name, description, slug, organization_type)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                slug = excluded.slug,
                organization_type = excluded.organization_type
            "#,
        )
        .bind(&org.id)
        .bind(&org.name)
        .bind(&org.description)
        .bind(&org.slug)
        .bind(&org.organization_type)
        .execute(&mut *tx)
        .await?;

        if let Some(hs) = &record.harvest_source {
            sqlx::query(
                r#"
                INSERT INTO harvest_source (id, name) VALUES (?, ?)
                ON CONFLICT(id) DO UPDATE SET name = excluded.name
                "#,
            )
            .bind(&hs.id)
            .bind(&hs.name)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO dataset (id, slug, dcat, organization_id, harvest_source_id,
                                 popularity, last_harvested_date)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                slug = excluded.slug,
                dcat = excluded.dcat,
                organization_id = excluded.organization_id,
                harvest_source_id = excluded.harvest_source_id,
                popularity = excluded.popularity,
                last_harvested_date = excluded.last_harvested_date
            "#,
        )
        .bind(&record.id)
        .bind(&record.slug)
        .bind(serde_json::to_string(&record.dcat)?)
        .bind(&org.id)
        .bind(record.harvest_source.as_ref().map(|hs| hs.id.as_str()))
        .bind(record.popularity)
        .bind(&record.last_harvested_date)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<CatalogRecord>> {
        let sql = format!("{} WHERE d.{} = ?", SELECT_RECORD, column);
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| record_from_row(&r)).transpose()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<CatalogRecord> {
    let id: String = row.get("id");
    let dcat_text: String = row.get("dcat");
    let dcat = serde_json::from_str(&dcat_text)
        .with_context(|| format!("Invalid DCAT JSON for dataset {}", id))?;

    let hs_id: Option<String> = row.get("hs_id");
    let hs_name: Option<String> = row.get("hs_name");

    Ok(CatalogRecord {
        slug: row.get("slug"),
        dcat,
        organization: Organization {
            id: row.get("org_id"),
            name: row.get("org_name"),
            description: row.get("org_description"),
            slug: row.get("org_slug"),
            organization_type: row.get("org_type"),
        },
        harvest_source: hs_id.map(|hs_id| HarvestSourceRef {
            id: hs_id,
            name: hs_name.unwrap_or_default(),
        }),
        popularity: row.get("popularity"),
        last_harvested_date: row.get("last_harvested_date"),
        id,
    })
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn count_all(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dataset")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn page(&self, page_number: u64, page_size: u64) -> Result<Vec<CatalogRecord>> {
        let offset = page_number.saturating_sub(1).saturating_mul(page_size);
        let sql = format!("{} ORDER BY d.id LIMIT ? OFFSET ?", SELECT_RECORD);
        let rows = sqlx::query(&sql)
            .bind(page_size as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn all_ids_and_timestamps(&self) -> Result<Vec<IdTimestamp>> {
        let rows = sqlx::query("SELECT id, last_harvested_date FROM dataset ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get("id"), r.get("last_harvested_date")))
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<CatalogRecord>> {
        self.find_one("id", id).await
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<CatalogRecord>> {
        self.find_one("slug", slug).await
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<CatalogRecord>> {
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(IDS_PER_QUERY) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_RECORD);
            builder.push(" WHERE d.id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(") ORDER BY d.id");

            let rows = builder.build().fetch_all(&self.pool).await?;
            for row in &rows {
                records.push(record_from_row(row)?);
            }
        }
        Ok(records)
    }
}
