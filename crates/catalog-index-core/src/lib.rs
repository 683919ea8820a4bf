//! # Catalog Index Core
//!
//! Runtime-agnostic logic for keeping a search index in step with an
//! authoritative catalog store: data models, the query compiler, the index
//! client, drift reconciliation, and the batch sync orchestrator.
//!
//! This crate contains no tokio, sqlx, HTTP client, or filesystem I/O.
//! Storage and index backends are reached through the [`store::CatalogStore`]
//! and [`index::IndexBackend`] traits; retry delays go through
//! [`retry::Sleeper`] so the caller decides how time passes.
//!
//! ```text
//!   raw query ──▶ query::compile ──▶ QueryNode ──┐
//!                                                ▼
//! ┌──────────────┐   pages    ┌──────────────┐  bulk   ┌──────────────┐
//! │ CatalogStore │──────────▶│ SyncOrchestr. │───────▶│ IndexClient  │
//! │ (authority)  │──────────▶│ Reconciler    │───────▶│ (IndexBackend)│
//! └──────────────┘  id + ts   └──────────────┘ upsert/ └──────────────┘
//!                                               delete
//! ```

pub mod error;
pub mod index;
pub mod models;
pub mod progress;
pub mod query;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod sync;
