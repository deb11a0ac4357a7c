//! One archiving run.
//!
//! ```text
//! list ─► parse ─► date filter ─┬─► images ─► render (gated) ─► persist JSON
//!                               └─► (rejected: nothing written)
//! ```
//!
//! Articles are processed one at a time. Failures that belong to one
//! article (network, parse, render) are logged, counted and skipped; only
//! filesystem failures abort the run.

use crate::config::{DedupScope, ScraperConfig, SourceKind};
use crate::error::{Result, ScrapeError};
use crate::fetcher::{Fetcher, HttpGet};
use crate::images::{FingerprintStore, ImageManager, FINGERPRINT_FILE};
use crate::models::ArticleRecord;
use crate::outputs::json::Persister;
use crate::render::{RenderOutcome, Renderer, SkipReason};
use crate::scrapers::{html, jsonapi, ListedArticle};
use crate::utils::{ensure_writable_dir, truncate_for_log};
use kdam::{tqdm, BarExt};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// What happened to one listed article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleOutcome {
    OutOfRange,
    Archived { json: PathBuf, pdf: RenderOutcome },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub article: String,
    pub reason: String,
}

/// Counts for the completion report.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub listed: usize,
    pub out_of_range: usize,
    pub archived: usize,
    pub pdfs: usize,
    pub too_short: usize,
    pub render_failed: usize,
    pub failures: Vec<Failure>,
}

impl RunSummary {
    fn record(&mut self, article: &ListedArticle, outcome: &ArticleOutcome) {
        match outcome {
            ArticleOutcome::OutOfRange => self.out_of_range += 1,
            ArticleOutcome::Archived { pdf, .. } => {
                self.archived += 1;
                match pdf {
                    RenderOutcome::Rendered(_) => self.pdfs += 1,
                    RenderOutcome::Skipped(SkipReason::TooShort { .. }) => self.too_short += 1,
                    RenderOutcome::Skipped(SkipReason::Failed(reason)) => {
                        self.render_failed += 1;
                        self.failures.push(Failure {
                            article: article.label(),
                            reason: format!("PDF: {}", reason),
                        });
                    }
                }
            }
            ArticleOutcome::Failed(reason) => self.failures.push(Failure {
                article: article.label(),
                reason: reason.clone(),
            }),
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len() - self.render_failed
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Articles listed:        {}", self.listed)?;
        writeln!(f, "Outside date range:     {}", self.out_of_range)?;
        writeln!(f, "Archived (JSON):        {}", self.archived)?;
        writeln!(f, "PDFs written:           {}", self.pdfs)?;
        writeln!(f, "PDFs skipped (<50 words): {}", self.too_short)?;
        writeln!(f, "PDFs failed:            {}", self.render_failed)?;
        write!(f, "Articles failed:        {}", self.failed())?;
        for failure in &self.failures {
            write!(f, "\n  - {}: {}", failure.article, failure.reason)?;
        }
        Ok(())
    }
}

/// Create `pdfs/`, `images/` and `json/` and check they are writable.
pub async fn prepare_output_dirs(config: &ScraperConfig) -> Result<()> {
    for dir in [config.pdf_dir(), config.images_dir(), config.json_dir()] {
        ensure_writable_dir(&dir).await?;
    }
    Ok(())
}

/// Fingerprint store for the configured dedup scope.
pub fn open_fingerprint_store(config: &ScraperConfig) -> Result<FingerprintStore> {
    match config.dedup_scope {
        DedupScope::Run => Ok(FingerprintStore::in_memory()),
        DedupScope::Persistent => FingerprintStore::load(config.images_dir().join(FINGERPRINT_FILE)),
    }
}

pub struct Pipeline<C> {
    config: ScraperConfig,
    base: Url,
    fetcher: Fetcher<C>,
    images: ImageManager,
    renderer: Renderer,
    persister: Persister,
    show_progress: bool,
}

impl<C: HttpGet> Pipeline<C> {
    /// Build a pipeline over prepared output directories.
    pub fn new(config: ScraperConfig, fetcher: Fetcher<C>) -> Result<Self> {
        let base = Url::parse(&config.base_url).map_err(|e| ScrapeError::Config(e.to_string()))?;
        let store = open_fingerprint_store(&config)?;
        Ok(Self {
            base,
            images: ImageManager::new(config.images_dir(), store),
            renderer: Renderer::new(config.pdf_dir()),
            persister: Persister::new(config.json_dir()),
            fetcher,
            config,
            show_progress: true,
        })
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    async fn list(&self) -> Result<Vec<ListedArticle>> {
        match self.config.source {
            SourceKind::Jsonapi => jsonapi::index_articles(&self.fetcher, &self.config).await,
            SourceKind::Html => html::index_articles(&self.fetcher, &self.config).await,
        }
    }

    async fn parse(&self, article: &ListedArticle) -> Result<ArticleRecord> {
        match article {
            ListedArticle::Node(node) => jsonapi::parse_node(&self.fetcher, &self.base, node).await,
            ListedArticle::Page(url) => html::fetch_article(&self.fetcher, url).await,
        }
    }

    /// Run one article through the pipeline.
    ///
    /// # Arguments
    ///
    /// * `article` - One entry from the listing
    ///
    /// # Returns
    ///
    /// What happened to the article. Network, parse and render problems are
    /// reported here rather than as errors.
    ///
    /// # Errors
    ///
    /// Only fatal (filesystem) errors from storing images, the PDF or the JSON.
    pub async fn process(&mut self, article: &ListedArticle) -> Result<ArticleOutcome> {
        let record = match self.parse(article).await {
            Ok(record) => record,
            Err(e) => {
                warn!(article = %article.label(), error = %e, "Skipping article");
                return Ok(ArticleOutcome::Failed(e.to_string()));
            }
        };

        if !self.config.range.accepts(&record.published) {
            debug!(url = %record.url, published = %record.published, "Outside date range");
            return Ok(ArticleOutcome::OutOfRange);
        }

        info!(
            url = %record.url,
            title = %truncate_for_log(&record.title, 80),
            words = record.word_count(),
            images = record.images.len(),
            "Processing article"
        );

        let assets = self.images.collect(&self.fetcher, &record.images).await?;
        let pdf = self.renderer.render(&record, &assets).await?;

        match self.persister.persist(&record, &assets).await {
            Ok(json) => Ok(ArticleOutcome::Archived { json, pdf }),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                error!(url = %record.url, error = %e, "Failed to write article JSON");
                Ok(ArticleOutcome::Failed(e.to_string()))
            }
        }
    }

    async fn save_fingerprints(&self) {
        if let Err(e) = self.images.finish().await {
            error!(error = %e, "Failed to save image fingerprints");
        }
    }

    /// List, process every article, and save the fingerprint store.
    ///
    /// The store is saved even when a fatal error ends the run early.
    #[instrument(level = "info", skip_all, fields(source = ?self.config.source, range = %self.config.range))]
    pub async fn run(&mut self) -> Result<RunSummary> {
        if !self.config.range.is_bounded() {
            warn!("No date range given; every listed article will be archived");
        }
        let listed = self.list().await?;
        let mut summary = RunSummary {
            listed: listed.len(),
            ..RunSummary::default()
        };
        if listed.is_empty() {
            warn!("No articles found within the specified date range");
            return Ok(summary);
        }

        let mut pb = tqdm!(
            total = listed.len(),
            desc = "Processing articles",
            unit = " articles",
            disable = !self.show_progress
        );

        for article in &listed {
            let outcome = self.process(article).await;
            let _ = pb.update(1);
            match outcome {
                Ok(outcome) => summary.record(article, &outcome),
                Err(e) => {
                    error!(article = %article.label(), error = %e, "Aborting run");
                    self.save_fingerprints().await;
                    return Err(e);
                }
            }
        }
        if self.show_progress {
            eprintln!();
        }

        self.save_fingerprints().await;

        info!(
            listed = summary.listed,
            out_of_range = summary.out_of_range,
            archived = summary.archived,
            pdfs = summary.pdfs,
            too_short = summary.too_short,
            failed = summary.failures.len(),
            "Run complete"
        );
        Ok(summary)
    }
}
