//! # Dartmouth News Archiver
//!
//! Archives Dartmouth News articles published within a date range. Each
//! accepted article is saved as a JSON record; articles with at least 50
//! body words are also typeset as a PDF with their images.
//!
//! ## Usage
//!
//! ```sh
//! dartmouth_news_archiver --start-date 2024-01-01 --end-date 2024-12-31 -o ./archive
//! ```
//!
//! ## Architecture
//!
//! 1. **Listing**: page through the JSON:API endpoint or the HTML news index
//! 2. **Parsing**: build an article record per listing entry
//! 3. **Filtering**: drop articles published outside the range
//! 4. **Images**: download, normalize and deduplicate by content fingerprint
//! 5. **Output**: PDF (gated on word count) and JSON (always)

use clap::Parser;
use std::error::Error;
use std::io::IsTerminal;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod cli;
mod config;
mod date_filter;
mod error;
mod fetcher;
mod images;
mod models;
mod outputs;
mod pipeline;
mod render;
mod scrapers;
mod utils;

use cli::Cli;
use config::ScraperConfig;
use fetcher::{Fetcher, ReqwestClient};
use pipeline::{prepare_output_dirs, Pipeline};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("dartmouth_news_archiver starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    // Bad dates or config stop the run before any network traffic.
    let config = match ScraperConfig::resolve(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    info!(
        base_url = %config.base_url,
        source = ?config.source,
        range = %config.range,
        output_dir = %config.output_dir.display(),
        dedup_scope = ?config.dedup_scope,
        "Resolved configuration"
    );

    if let Err(e) = prepare_output_dirs(&config).await {
        error!(
            output_dir = %config.output_dir.display(),
            error = %e,
            "Output directories are not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }

    let client = ReqwestClient::new(&config)?;
    let fetcher = Fetcher::from_config(client, &config);
    info!(
        max_attempts = fetcher.policy().max_attempts,
        rate_limit_ms = config.rate_limit_ms,
        verify_ssl = config.verify_ssl,
        "HTTP client ready"
    );

    let mut pipeline = Pipeline::new(config, fetcher)?.with_progress(std::io::stderr().is_terminal());
    let summary = pipeline.run().await?;

    println!("\nScraping complete!");
    println!("{}", summary);

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}
