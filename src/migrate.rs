use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the catalog tables if they do not exist yet.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS organization (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            slug TEXT NOT NULL UNIQUE,
            organization_type TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS harvest_source (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // dcat holds the DCAT-US JSON document as text
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dataset (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            dcat TEXT NOT NULL DEFAULT '{}',
            organization_id TEXT NOT NULL,
            harvest_source_id TEXT,
            popularity INTEGER,
            last_harvested_date TEXT,
            FOREIGN KEY (organization_id) REFERENCES organization(id),
            FOREIGN KEY (harvest_source_id) REFERENCES harvest_source(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_dataset_organization ON dataset(organization_id)")
        .execute(pool)
        .await?;

    Ok(())
}
