//! Command-line interface definitions.
//!
//! Flags override values from the optional YAML config file. Most options
//! can also be supplied through environment variables.

use crate::config::{DedupScope, SourceKind};
use clap::Parser;
use std::path::PathBuf;

/// Archive Dartmouth News articles within a date range.
///
/// # Examples
///
/// ```sh
/// # Everything published in 2024
/// dartmouth_news_archiver --start-date 2024-01-01 --end-date 2024-12-31
///
/// # Scrape the public HTML pages into ./archive, keeping image dedup across runs
/// dartmouth_news_archiver -o ./archive --source html --dedup-scope persistent
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Start date (inclusive) in YYYY-MM-DD format
    #[arg(long)]
    pub start_date: Option<String>,

    /// End date (inclusive) in YYYY-MM-DD format
    #[arg(long)]
    pub end_date: Option<String>,

    /// Directory that receives the pdfs/, images/ and json/ folders
    #[arg(short, long, env = "DNA_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Optional path to a YAML config file
    #[arg(short, long, env = "DNA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Where to list articles from
    #[arg(long, value_enum)]
    pub source: Option<SourceKind>,

    /// Site root, e.g. https://home.dartmouth.edu
    #[arg(long, env = "DNA_BASE_URL")]
    pub base_url: Option<String>,

    /// Verify TLS certificates (default: disabled)
    #[arg(long)]
    pub verify_ssl: bool,

    /// Keep image fingerprints for this run only, or persist them across runs
    #[arg(long, value_enum)]
    pub dedup_scope: Option<DedupScope>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "dartmouth_news_archiver",
            "--start-date",
            "2024-01-01",
            "--end-date",
            "2024-12-31",
        ]);

        assert_eq!(cli.start_date.as_deref(), Some("2024-01-01"));
        assert_eq!(cli.end_date.as_deref(), Some("2024-12-31"));
        assert!(!cli.verify_ssl);
        assert!(cli.source.is_none());
    }

    #[test]
    fn test_cli_short_flags_and_enums() {
        let cli = Cli::parse_from([
            "dartmouth_news_archiver",
            "-o",
            "/tmp/archive",
            "-c",
            "/tmp/config.yaml",
            "--source",
            "html",
            "--dedup-scope",
            "persistent",
        ]);

        assert_eq!(cli.output_dir, Some(PathBuf::from("/tmp/archive")));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/config.yaml")));
        assert_eq!(cli.source, Some(SourceKind::Html));
        assert_eq!(cli.dedup_scope, Some(DedupScope::Persistent));
    }

    #[test]
    fn test_cli_rejects_unknown_source() {
        let res = Cli::try_parse_from(["dartmouth_news_archiver", "--source", "rss"]);
        assert!(res.is_err());
    }
}
