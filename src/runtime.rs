//! Shared wiring for commands: store, index client, and sync options built
//! from [`Config`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use catalog_index_core::index::IndexClient;
use catalog_index_core::retry::{classify_sync_error, Sleeper};
use catalog_index_core::sync::SyncOptions;

use crate::config::Config;
use crate::db;
use crate::opensearch::OpenSearchBackend;
use crate::sqlite_store::SqliteCatalog;

/// Delay between per-item 429 retries inside one bulk call.
const BULK_ITEM_BACKOFF: Duration = Duration::from_millis(500);

/// [`Sleeper`] backed by the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub async fn open_store(config: &Config) -> Result<SqliteCatalog> {
    let pool = db::connect(config).await?;
    Ok(SqliteCatalog::new(pool))
}

pub fn index_client(config: &Config) -> Result<IndexClient<OpenSearchBackend>> {
    let backend = OpenSearchBackend::from_config(&config.index)?;
    tracing::debug!(url = %config.index.url, index = %config.index.name, aws = config.index.is_aws(), "index client");
    Ok(IndexClient::new(backend, Arc::new(TokioSleeper))
        .with_timeout_retries(config.index.timeout_retries, config.index.timeout_backoff())
        .with_bulk_backoff(BULK_ITEM_BACKOFF))
}

pub fn sync_options(config: &Config) -> SyncOptions {
    SyncOptions {
        max_retries: config.sync.max_retries,
        retry_base_delay: config.sync.retry_base_delay(),
        classifier: classify_sync_error,
        repair_batch_size: config.reconcile.batch_size,
    }
}
