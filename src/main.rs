//! # Catalog CLI (`catalog`)
//!
//! Maintains and queries the OpenSearch dataset index.
//!
//! ## Usage
//!
//! ```bash
//! catalog --config ./config/catalog.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `catalog init` | Create the SQLite database and run schema migrations |
//! | `catalog seed <file>` | Load datasets from a JSON Lines file |
//! | `catalog sync [id-or-slug]` | Rebuild the index, or index one dataset |
//! | `catalog compare [--fix]` | Report (and repair) database/index drift |
//! | `catalog search "<query>"` | Search the index |
//! | `catalog keywords` | List the most common keywords |
//!
//! ## Examples
//!
//! ```bash
//! # Full rebuild with a fresh mapping
//! catalog sync --recreate-index
//!
//! # Resume a failed sync at page 40
//! catalog sync --start-page 40
//!
//! # Index one dataset by slug
//! catalog sync water-quality-2024
//!
//! # Phrase OR term, restricted to an organization type
//! catalog search '"air quality" OR ozone' --org-type "State Government"
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use catalog_index::logging::{self, Verbosity};
use catalog_index::progress::ProgressMode;
use catalog_index::{compare, config, migrate, search, seed, sync_cmd};
use catalog_index_core::index::SortMode;

/// Catalog index: sync an OpenSearch index with the dataset catalog and
/// query it.
#[derive(Parser)]
#[command(name = "catalog", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/catalog.toml")]
    config: PathBuf,

    /// Debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Progress on stderr: `off`, `human`, or `json`. Defaults to `human`
    /// when stderr is a terminal.
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run more than once.
    Init,

    /// Load datasets from a JSON Lines file into the database.
    Seed {
        /// Path to the `.jsonl` file.
        file: PathBuf,
    },

    /// Rebuild the search index from the database.
    ///
    /// With an id or slug, indexes only that dataset and leaves every other
    /// document alone.
    Sync {
        /// Dataset id or slug to index on its own.
        id_or_slug: Option<String>,

        /// First page to index (1-based). Earlier pages are skipped.
        #[arg(long, default_value_t = 1)]
        start_page: u64,

        /// Records per page. Defaults to `[sync].per_page`.
        #[arg(long, alias = "per_page")]
        per_page: Option<u64>,

        /// Drop and recreate the index with the current mapping first.
        #[arg(long)]
        recreate_index: bool,
    },

    /// Compare the database with the index.
    Compare {
        /// Ids listed per category. Defaults to `[reconcile].sample_size`.
        #[arg(long)]
        sample_size: Option<usize>,

        /// Index missing and updated datasets and delete extra documents.
        #[arg(long)]
        fix: bool,
    },

    /// Search the index.
    ///
    /// Query syntax: `"exact phrase"`, bare terms (all must match), and
    /// `OR` between alternatives.
    Search {
        /// The search query string. Empty matches everything.
        #[arg(default_value = "")]
        query: String,

        /// Only datasets from this organization id.
        #[arg(long)]
        org_id: Option<String>,

        /// Only datasets from organizations of these types (any).
        #[arg(long = "org-type")]
        org_types: Vec<String>,

        /// Only datasets carrying these keywords (all).
        #[arg(long = "keyword")]
        keywords: Vec<String>,

        /// Sort: `relevance`, `popularity`, or `id`.
        #[arg(long, default_value = "relevance")]
        sort: SortMode,

        /// Results per page.
        #[arg(long, default_value_t = 10)]
        per_page: usize,

        /// Offset of the first result.
        #[arg(long, default_value_t = 0)]
        from: usize,
    },

    /// List the most common keywords with their dataset counts.
    Keywords {
        /// Maximum number of keywords.
        #[arg(long, default_value_t = 100)]
        size: usize,

        /// Only keywords used by at least this many datasets.
        #[arg(long, default_value_t = 1)]
        min_doc_count: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_subscriber(Verbosity::from_flags(cli.verbose, cli.quiet));

    let cfg = config::load_config(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Seed { file } => {
            seed::run_seed(&cfg, &file).await?;
        }
        Commands::Sync {
            id_or_slug,
            start_page,
            per_page,
            recreate_index,
        } => {
            sync_cmd::run_sync(
                &cfg,
                id_or_slug.as_deref(),
                start_page,
                per_page,
                recreate_index,
                progress,
            )
            .await?;
        }
        Commands::Compare { sample_size, fix } => {
            compare::run_compare(&cfg, sample_size, fix, progress).await?;
        }
        Commands::Search {
            query,
            org_id,
            org_types,
            keywords,
            sort,
            per_page,
            from,
        } => {
            search::run_search(&cfg, &query, org_id, org_types, keywords, sort, per_page, from)
                .await?;
        }
        Commands::Keywords {
            size,
            min_doc_count,
        } => {
            search::run_keywords(&cfg, size, min_doc_count).await?;
        }
    }

    Ok(())
}
