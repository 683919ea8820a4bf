//! Tracing subscriber setup for the `catalog` binary.
//!
//! Logs go to **stderr** so stdout stays parseable for scripts.
//!
//! # Priority (highest to lowest)
//!
//! 1. `CATALOG_LOG` env var (per-target directives, e.g. `catalog_index_core=debug,warn`)
//! 2. `RUST_LOG` env var
//! 3. CLI flags (`-v` → debug, `-q` → error)
//! 4. Default level: `info`

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Crate-specific log directive variable.
pub const LOG_ENV: &str = "CATALOG_LOG";

/// Verbosity level derived from CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    /// `-v` wins over `-q` when both are given.
    pub const fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Self::Verbose
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }

    pub const fn default_level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
        }
    }
}

/// Install the global subscriber. Call once, before config loading.
pub fn init_subscriber(verbosity: Verbosity) {
    let filter = build_env_filter(verbosity, std::env::var(LOG_ENV).ok().as_deref());
    let use_ansi = atty::is(atty::Stream::Stderr);

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(use_ansi)
        .with_target(verbosity == Verbosity::Verbose);

    // try_init: integration tests may run several commands in one process
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer.compact())
        .try_init();
}

/// `CATALOG_LOG` > `RUST_LOG` > verbosity. Unparseable directives fall
/// through to the next source.
fn build_env_filter(verbosity: Verbosity, crate_directives: Option<&str>) -> EnvFilter {
    if let Some(directives) = crate_directives {
        if let Ok(filter) = EnvFilter::try_new(directives) {
            return filter;
        }
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let level = verbosity.default_level();
    let directive = match verbosity {
        // keep sqlx and hyper chatter out of -v
        Verbosity::Verbose => format!(
            "warn,catalog_index={level},catalog_index_core={level},catalog={level}"
        ),
        _ => level.to_string(),
    };
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}
