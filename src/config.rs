//! Runtime configuration.
//!
//! Settings come from three layers, lowest precedence first: built-in
//! defaults, an optional YAML file (`--config`), and command-line flags.
//!
//! ```yaml
//! base_url: https://home.dartmouth.edu
//! source: jsonapi
//! dedup_scope: persistent
//! rate_limit_ms: 500
//! request_timeout_secs: 15
//! retry:
//!   max_attempts: 5
//!   base_delay_ms: 1000
//!   max_delay_ms: 30000
//! ```

use crate::cli::Cli;
use crate::date_filter::DateRange;
use crate::error::{Result, ScrapeError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

pub const DEFAULT_BASE_URL: &str = "https://home.dartmouth.edu";

/// Where the list of articles comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Drupal JSON:API endpoint (`/jsonapi/node/article`).
    Jsonapi,
    /// Public news listing pages and article HTML.
    Html,
}

/// Lifetime of the image fingerprint set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DedupScope {
    /// Fingerprints live in memory for a single run.
    Run,
    /// Fingerprints are loaded from and saved to `images/fingerprints.json`.
    Persistent,
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt number `attempt` (1-based),
    /// without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let delay = Duration::from_millis(self.base_delay_ms).saturating_mul(1u32 << shift);
        delay.min(Duration::from_millis(self.max_delay_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub base_url: String,
    pub source: SourceKind,
    pub output_dir: PathBuf,
    pub dedup_scope: DedupScope,
    pub verify_ssl: bool,
    /// Minimum spacing between consecutive requests to one host.
    pub rate_limit_ms: u64,
    pub request_timeout_secs: u64,
    /// Articles per JSON:API page.
    pub page_size: usize,
    /// Upper bound on HTML listing pages walked per run.
    pub max_listing_pages: usize,
    pub retry: RetryPolicy,
    #[serde(skip)]
    pub range: DateRange,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            source: SourceKind::Jsonapi,
            output_dir: PathBuf::from("."),
            dedup_scope: DedupScope::Run,
            verify_ssl: false,
            rate_limit_ms: 500,
            request_timeout_secs: 15,
            page_size: 50,
            max_listing_pages: 20,
            retry: RetryPolicy::default(),
            range: DateRange::default(),
        }
    }
}

impl ScraperConfig {
    /// Load a YAML config file. Missing keys keep their defaults.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ScrapeError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml_str(&raw)?;
        info!("Loaded configuration file");
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| ScrapeError::Config(e.to_string()))
    }

    /// Build the effective configuration: defaults, then the config file, then CLI flags.
    ///
    /// # Arguments
    ///
    /// * `cli` - Parsed command-line flags
    ///
    /// # Returns
    ///
    /// A validated configuration with its date range set.
    ///
    /// # Errors
    ///
    /// [`ScrapeError::Config`] for an unreadable config file, a bad base URL,
    /// zero retry attempts or page size, or a start date after the end date;
    /// [`ScrapeError::InvalidDate`] for a malformed date.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };

        if let Some(base_url) = &cli.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(source) = cli.source {
            config.source = source;
        }
        if let Some(dir) = &cli.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(scope) = cli.dedup_scope {
            config.dedup_scope = scope;
        }
        if cli.verify_ssl {
            config.verify_ssl = true;
        }

        config.base_url = config.base_url.trim_end_matches('/').to_string();
        url::Url::parse(&config.base_url)
            .map_err(|e| ScrapeError::Config(format!("invalid base_url {:?}: {}", config.base_url, e)))?;
        if config.retry.max_attempts == 0 {
            return Err(ScrapeError::Config("retry.max_attempts must be at least 1".into()));
        }
        if config.page_size == 0 {
            return Err(ScrapeError::Config("page_size must be at least 1".into()));
        }

        config.range = DateRange::parse(cli.start_date.as_deref(), cli.end_date.as_deref())?;
        Ok(config)
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pdf_dir(&self) -> PathBuf {
        self.output_dir.join("pdfs")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.output_dir.join("images")
    }

    pub fn json_dir(&self) -> PathBuf {
        self.output_dir.join("json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_default_settings() {
        let config = ScraperConfig::default();
        assert_eq!(config.base_url, "https://home.dartmouth.edu");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.rate_limit(), Duration::from_millis(500));
        assert_eq!(config.page_size, 50);
        assert!(!config.verify_ssl);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = ScraperConfig::from_yaml_str(
            "source: html\ndedup_scope: persistent\nretry:\n  max_attempts: 2\n",
        )
        .unwrap();
        assert_eq!(config.source, SourceKind::Html);
        assert_eq!(config.dedup_scope, DedupScope::Persistent);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.request_timeout_secs, 15);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = ScraperConfig::from_yaml_str("source: [not, a, source]").unwrap_err();
        assert!(matches!(err, ScrapeError::Config(_)));
    }

    #[test]
    fn test_cli_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "source: html\nverify_ssl: false\nbase_url: https://example.edu/\n").unwrap();

        let cli = Cli::parse_from([
            "dartmouth_news_archiver",
            "--config",
            path.to_str().unwrap(),
            "--source",
            "jsonapi",
            "--verify-ssl",
            "--start-date",
            "2024-01-01",
        ]);
        let config = ScraperConfig::resolve(&cli).unwrap();
        assert_eq!(config.source, SourceKind::Jsonapi);
        assert!(config.verify_ssl);
        assert_eq!(config.base_url, "https://example.edu");
        assert!(config.range.start.is_some());
        assert!(config.range.end.is_none());
    }

    #[test]
    fn test_resolve_rejects_bad_dates() {
        let cli = Cli::parse_from(["dartmouth_news_archiver", "--start-date", "2024/01/01"]);
        assert!(matches!(
            ScraperConfig::resolve(&cli),
            Err(ScrapeError::InvalidDate(_))
        ));
    }

    #[test]
    fn test_backoff_schedule_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn test_output_layout() {
        let config = ScraperConfig {
            output_dir: PathBuf::from("/tmp/archive"),
            ..ScraperConfig::default()
        };
        assert_eq!(config.pdf_dir(), PathBuf::from("/tmp/archive/pdfs"));
        assert_eq!(config.images_dir(), PathBuf::from("/tmp/archive/images"));
        assert_eq!(config.json_dir(), PathBuf::from("/tmp/archive/json"));
    }
}
