//! # Catalog Index
//!
//! Keeps an OpenSearch index of catalog datasets in step with the
//! authoritative SQLite catalog, and queries it.
//!
//! The sync, reconciliation, and query-compilation logic lives in
//! `catalog-index-core`; this crate supplies the concrete store and index
//! backends plus the `catalog` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │   SQLite    │──▶│ SyncOrchestrator │──▶│  OpenSearch  │
//! │  (catalog)  │   │   Reconciler     │   │  (datasets)  │
//! └─────────────┘   └──────────────────┘   └──────┬───────┘
//!                                                 │
//!                                          ┌──────┴──────┐
//!                                          │ catalog CLI │
//!                                          │ search/sync │
//!                                          └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! catalog init                          # create database
//! catalog seed datasets.jsonl           # load records
//! catalog sync --recreate-index         # rebuild the index
//! catalog compare --fix                 # repair drift
//! catalog search '"air quality" OR ozone' --keyword health
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite catalog store |
//! | [`opensearch`] | OpenSearch index backend |
//! | [`sigv4`] | AWS request signing |
//! | [`runtime`] | Store and index client wiring |
//! | [`logging`] | Tracing subscriber setup |
//! | [`progress`] | Progress rendering |
//! | [`sync_cmd`] | `catalog sync` |
//! | [`compare`] | `catalog compare` |
//! | [`search`] | `catalog search` and `catalog keywords` |
//! | [`seed`] | `catalog seed` |

pub mod compare;
pub mod config;
pub mod db;
pub mod logging;
pub mod migrate;
pub mod opensearch;
pub mod progress;
pub mod runtime;
pub mod search;
pub mod seed;
pub mod sigv4;
pub mod sqlite_store;
pub mod sync_cmd;
