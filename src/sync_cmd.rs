//! `catalog sync`: rebuild the search index from the catalog database, or
//! push a single dataset.

use anyhow::Result;

use catalog_index_core::index::BulkItemError;
use catalog_index_core::sync::{SyncOrchestrator, SyncReport};

use crate::config::Config;
use crate::progress::ProgressMode;
use crate::runtime;

pub async fn run_sync(
    config: &Config,
    id_or_slug: Option<&str>,
    start_page: u64,
    per_page: Option<u64>,
    recreate_index: bool,
    progress: ProgressMode,
) -> Result<()> {
    let store = runtime::open_store(config).await?;
    let index = runtime::index_client(config)?;
    let reporter = progress.reporter();
    let orchestrator = SyncOrchestrator::new(&store, &index)
        .with_options(runtime::sync_options(config))
        .with_progress(reporter.as_ref());

    let result = match id_or_slug {
        Some(key) => orchestrator
            .single_sync(key, recreate_index)
            .await
            .map(|record| {
                println!("Indexed dataset {} ({})", record.slug, record.id);
            }),
        None => {
            let per_page = per_page.unwrap_or(config.sync.per_page);
            if recreate_index {
                println!("Recreating dataset index...");
            } else {
                println!("Emptying dataset index...");
            }
            println!("Indexing datasets...");
            orchestrator
                .full_sync(start_page, per_page, recreate_index)
                .await
                .map(|report| print_report(&report))
        }
    };

    store.pool().close().await;
    result
}

fn print_report(report: &SyncReport) {
    for line in report_lines(report) {
        println!("{}", line);
    }
}

/// Stdout block for a finished full sync. The error count is always shown.
fn report_lines(report: &SyncReport) -> Vec<String> {
    let mut lines = vec![
        format!("Indexed {} items.", report.succeeded),
        format!("  datasets in database: {}", report.store_count),
        format!("  in index before: {}", report.index_before),
        format!("  in index after: {}", report.index_after),
        format!("  index recreated: {}", report.recreated),
    ];
    if !report.exact_keyword_field {
        lines.push("  warning: mapping has no keyword.raw field".to_string());
    }
    lines.push(format!("There were {} errors", report.errors.len()));
    for err in &report.errors {
        lines.push(format!("  {}", format_item_error(err)));
    }
    lines
}

/// One-line rendering of a rejected document.
pub fn format_item_error(err: &BulkItemError) -> String {
    let mut line = format!(
        "{}: [{}] {}: {}",
        err.document_id, err.status, err.error_type, err.error_reason
    );
    if let Some(cause) = &err.caused_by {
        line.push_str(&format!(" (caused by {})", cause));
    }
    line
}
