//! `catalog compare`: report drift between the catalog database and the
//! search index, and optionally repair it.

use anyhow::Result;

use catalog_index_core::reconcile::{sample, DriftReport, RepairSummary};
use catalog_index_core::sync::SyncOrchestrator;

use crate::config::Config;
use crate::progress::ProgressMode;
use crate::runtime;
use crate::sync_cmd::format_item_error;

pub async fn run_compare(
    config: &Config,
    sample_size: Option<usize>,
    fix: bool,
    progress: ProgressMode,
) -> Result<()> {
    let sample_size = sample_size.unwrap_or(config.reconcile.sample_size);
    let store = runtime::open_store(config).await?;
    let index = runtime::index_client(config)?;
    let reporter = progress.reporter();
    let orchestrator = SyncOrchestrator::new(&store, &index)
        .with_options(runtime::sync_options(config))
        .with_progress(reporter.as_ref());

    // Drift is printed before repair starts so a failed repair still shows it.
    let result = async {
        let drift = orchestrator.drift().await?;
        print_drift(&drift, sample_size);
        if fix {
            let repair = orchestrator.repair(&drift, sample_size).await?;
            print_repair(&repair);
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;
    store.pool().close().await;
    result
}

fn print_drift(drift: &DriftReport, sample_size: usize) {
    println!("compare");
    println!("  missing from index: {}", drift.missing.len());
    if !drift.missing.is_empty() {
        println!("    sample: {}", sample(&drift.missing, sample_size).join(", "));
    }
    println!("  extra in index: {}", drift.extra.len());
    if !drift.extra.is_empty() {
        println!("    sample: {}", sample(&drift.extra, sample_size).join(", "));
    }
    println!("  updated in database: {}", drift.updated.len());
    for (id, pair) in drift.updated.iter().take(sample_size) {
        println!(
            "    {}: index={} db={}",
            id,
            display_timestamp(&pair.index),
            display_timestamp(&pair.store)
        );
    }
    if drift.is_clean() {
        println!("in sync");
    }
}

/// Absent timestamps normalize to an empty string; show them as `none`.
fn display_timestamp(normalized: &str) -> &str {
    if normalized.is_empty() {
        "none"
    } else {
        normalized
    }
}

fn print_repair(repair: &RepairSummary) {
    println!("repair");
    println!("  indexed: {}", repair.indexed);
    println!("  deleted: {}", repair.deleted);
    if repair.skipped > 0 {
        println!(
            "  skipped (no longer in database): {}  e.g. {}",
            repair.skipped,
            repair.skipped_sample.join(", ")
        );
    }
    for (id, reason) in &repair.delete_failures {
        println!("  delete failed: {}: {}", id, reason);
    }
    if !repair.failures.is_empty() {
        println!("  failed: {}", repair.failures.len());
        for err in &repair.failures {
            println!("    {}", format_item_error(err));
        }
        println!("  harvest sources with failures:");
        for (id, name) in &repair.failed_sources {
            println!("    {} ({})", name, id);
        }
    }
}
