//! TOML configuration for the `catalog` binary.
//!
//! ```toml
//! [db]
//! path = "./data/catalog.sqlite"
//!
//! [index]
//! url = "https://localhost:9200"
//! name = "datasets"
//! username = "admin"
//! password = "admin"
//! # aws_region = "us-gov-west-1"
//!
//! [sync]
//! per_page = 100
//! max_retries = 3
//! retry_base_delay_secs = 2.0
//!
//! [reconcile]
//! batch_size = 1000
//! sample_size = 10
//! ```
//!
//! `OPENSEARCH_HOST` overrides `index.url`. A bare host name gets `https://`
//! and port 9200, or port 443 when it is an AWS domain. Unless the file says
//! otherwise, an AWS domain is signed for region `us-gov-west-1`, and any
//! other host uses `admin`/`admin` without certificate verification.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Host suffix of AWS-managed OpenSearch domains.
pub const AWS_HOST_SUFFIX: &str = "es.amazonaws.com";

/// Signing region for an `OPENSEARCH_HOST` AWS domain with no `aws_region`.
pub const DEFAULT_AWS_REGION: &str = "us-gov-west-1";

/// Credentials for a non-AWS `OPENSEARCH_HOST` with no configured auth.
pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "admin";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_index_name")]
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Enables SigV4 request signing (service `es`) when set.
    #[serde(default)]
    pub aws_region: Option<String>,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub timeout_retries: u32,
    #[serde(default = "default_delay_secs")]
    pub timeout_backoff_secs: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            name: default_index_name(),
            username: None,
            password: None,
            aws_region: None,
            accept_invalid_certs: false,
            timeout_secs: default_timeout_secs(),
            timeout_retries: default_max_retries(),
            timeout_backoff_secs: default_delay_secs(),
        }
    }
}

impl IndexConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn timeout_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_backoff_secs)
    }

    pub fn is_aws(&self) -> bool {
        self.aws_region.is_some()
    }
}

fn default_url() -> String {
    "https://localhost:9200".to_string()
}
fn default_index_name() -> String {
    "datasets".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_delay_secs() -> f64 {
    2.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_per_page")]
    pub per_page: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delay_secs")]
    pub retry_base_delay_secs: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            per_page: default_per_page(),
            max_retries: default_max_retries(),
            retry_base_delay_secs: default_delay_secs(),
        }
    }
}

impl SyncConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_base_delay_secs)
    }
}

fn default_per_page() -> u64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            sample_size: default_sample_size(),
        }
    }
}

fn default_batch_size() -> usize {
    1000
}
fn default_sample_size() -> usize {
    10
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if let Ok(host) = std::env::var("OPENSEARCH_HOST") {
        if !host.trim().is_empty() {
            apply_host_override(&mut config.index, host.trim());
        }
    }
    if config.index.aws_region.is_none() && config.index.url.contains(AWS_HOST_SUFFIX) {
        tracing::debug!("AWS OpenSearch host without aws_region; requests will not be signed");
    }

    validate(&config)?;
    Ok(config)
}

/// Point the index at an `OPENSEARCH_HOST` value and fill in the auth that
/// kind of host expects. Settings already present in the file are kept.
pub fn apply_host_override(index: &mut IndexConfig, host: &str) {
    index.url = url_for_host(host);
    if is_aws_host(host) {
        if index.aws_region.is_none() {
            tracing::debug!(region = DEFAULT_AWS_REGION, "defaulting AWS signing region");
            index.aws_region = Some(DEFAULT_AWS_REGION.to_string());
        }
    } else if index.aws_region.is_none() && index.username.is_none() {
        tracing::debug!("using default credentials for OpenSearch host");
        index.username = Some(DEFAULT_USERNAME.to_string());
        index.password = Some(DEFAULT_PASSWORD.to_string());
        index.accept_invalid_certs = true;
    }
}

fn is_aws_host(host: &str) -> bool {
    let authority = host
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split(['/', ':'])
        .next()
        .unwrap_or_default();
    authority.ends_with(AWS_HOST_SUFFIX)
}

/// Turn an `OPENSEARCH_HOST` value into a base URL.
pub fn url_for_host(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        return host.trim_end_matches('/').to_string();
    }
    let port = if host.ends_with(AWS_HOST_SUFFIX) { 443 } else { 9200 };
    format!("https://{}:{}", host, port)
}

fn validate(config: &Config) -> Result<()> {
    if config.index.name.trim().is_empty() {
        bail!("index.name must not be empty");
    }
    if config.index.timeout_secs == 0 {
        bail!("index.timeout_secs must be > 0");
    }
    if config.sync.per_page == 0 {
        bail!("sync.per_page must be >= 1");
    }
    if config.reconcile.batch_size == 0 {
        bail!("reconcile.batch_size must be >= 1");
    }
    for (name, value) in [
        ("sync.retry_base_delay_secs", config.sync.retry_base_delay_secs),
        ("index.timeout_backoff_secs", config.index.timeout_backoff_secs),
    ] {
        if !value.is_finite() || value < 0.0 {
            bail!("{} must be a non-negative number", name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_text)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = parse("[db]\npath = \"./data/catalog.sqlite\"\n").unwrap();
        assert_eq!(config.index.name, "datasets");
        assert_eq!(config.sync.per_page, 100);
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.sync.retry_base_delay(), Duration::from_secs(2));
        assert_eq!(config.reconcile.batch_size, 1000);
        assert!(!config.index.is_aws());
    }

    #[test]
    fn test_rejects_zero_per_page() {
        let err = parse("[db]\npath = \"x\"\n[sync]\nper_page = 0\n").unwrap_err();
        assert!(err.to_string().contains("per_page"));
    }

    #[test]
    fn test_rejects_negative_delay() {
        let err = parse("[db]\npath = \"x\"\n[sync]\nretry_base_delay_secs = -1.0\n").unwrap_err();
        assert!(err.to_string().contains("retry_base_delay_secs"));
    }

    #[test]
    fn test_url_for_host() {
        assert_eq!(url_for_host("localhost"), "https://localhost:9200");
        assert_eq!(
            url_for_host("search-catalog.us-gov-west-1.es.amazonaws.com"),
            "https://search-catalog.us-gov-west-1.es.amazonaws.com:443"
        );
        assert_eq!(url_for_host("http://opensearch:9200/"), "http://opensearch:9200");
    }

    #[test]
    fn test_aws_host_defaults_region() {
        let mut index = IndexConfig::default();
        apply_host_override(&mut index, "search-catalog.us-gov-west-1.es.amazonaws.com");
        assert_eq!(index.url, "https://search-catalog.us-gov-west-1.es.amazonaws.com:443");
        assert_eq!(index.aws_region.as_deref(), Some(DEFAULT_AWS_REGION));
        assert!(index.is_aws());
        assert_eq!(index.username, None);
        assert!(!index.accept_invalid_certs);
    }

    #[test]
    fn test_aws_host_keeps_configured_region() {
        let mut index = IndexConfig {
            aws_region: Some("us-east-1".to_string()),
            ..Default::default()
        };
        apply_host_override(&mut index, "https://search-x.us-east-1.es.amazonaws.com");
        assert_eq!(index.aws_region.as_deref(), Some("us-east-1"));
    }

    #[test]
    fn test_plain_host_defaults_to_admin_without_cert_checks() {
        let mut index = IndexConfig::default();
        apply_host_override(&mut index, "opensearch");
        assert_eq!(index.url, "https://opensearch:9200");
        assert_eq!(index.username.as_deref(), Some(DEFAULT_USERNAME));
        assert_eq!(index.password.as_deref(), Some(DEFAULT_PASSWORD));
        assert!(index.accept_invalid_certs);
        assert!(!index.is_aws());
    }

    #[test]
    fn test_plain_host_keeps_configured_credentials() {
        let mut index = IndexConfig {
            username: Some("reader".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        apply_host_override(&mut index, "opensearch");
        assert_eq!(index.username.as_deref(), Some("reader"));
        assert_eq!(index.password.as_deref(), Some("secret"));
        assert!(!index.accept_invalid_certs);
    }
}
