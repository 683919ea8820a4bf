//! Sync and repair progress rendering.
//!
//! The core emits [`ProgressEvent`]s; this module decides how they look.
//! Progress is written to **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::str::FromStr;

use catalog_index_core::progress::{NoProgress, ProgressEvent, ProgressReporter};

/// Human-friendly progress: `sync  page 3 / 12  300 indexed, 0 failed`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::SyncStarted {
                total_records,
                total_pages,
            } => format!(
                "sync  {} records in {} pages\n",
                format_number(*total_records),
                format_number(*total_pages)
            ),
            ProgressEvent::PageIndexed {
                page,
                total_pages,
                succeeded,
                failed,
            } => format!(
                "sync  page {} / {}  {} indexed, {} failed\n",
                format_number(*page),
                format_number(*total_pages),
                format_number(*succeeded),
                format_number(*failed)
            ),
            ProgressEvent::RepairBatch {
                batch,
                total_batches,
                indexed,
                skipped,
            } => format!(
                "repair  batch {} / {}  {} indexed, {} skipped\n",
                batch,
                total_batches,
                format_number(*indexed),
                format_number(*skipped)
            ),
            ProgressEvent::RepairDeleted { deleted, failed } => format!(
                "repair  {} deleted, {} failed\n",
                format_number(*deleted),
                format_number(*failed)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &ProgressEvent) -> serde_json::Value {
        match event {
            ProgressEvent::SyncStarted {
                total_records,
                total_pages,
            } => serde_json::json!({
                "event": "progress",
                "phase": "sync_started",
                "total_records": total_records,
                "total_pages": total_pages
            }),
            ProgressEvent::PageIndexed {
                page,
                total_pages,
                succeeded,
                failed,
            } => serde_json::json!({
                "event": "progress",
                "phase": "page_indexed",
                "page": page,
                "total_pages": total_pages,
                "succeeded": succeeded,
                "failed": failed
            }),
            ProgressEvent::RepairBatch {
                batch,
                total_batches,
                indexed,
                skipped,
            } => serde_json::json!({
                "event": "progress",
                "phase": "repair_batch",
                "batch": batch,
                "total_batches": total_batches,
                "indexed": indexed,
                "skipped": skipped
            }),
            ProgressEvent::RepairDeleted { deleted, failed } => serde_json::json!({
                "event": "progress",
                "phase": "repair_deleted",
                "deleted": deleted,
                "failed": failed
            }),
        }
    }
}

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode '{}' (expected off, human, or json)",
                other
            )),
        }
    }
}
