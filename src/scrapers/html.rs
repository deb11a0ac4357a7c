//! Dartmouth News over the public HTML pages.
//!
//! The news listing at `/news?page=N` links to article pages shaped like
//! `/news/YYYY/MM/slug`. Listing pages carry no dates, so every linked article
//! is fetched and filtered after parsing.

use super::{element_text, extract_body_images, parse_published, resolve_url, BodyImage, ListedArticle};
use crate::config::ScraperConfig;
use crate::error::{Result, ScrapeError};
use crate::fetcher::{Fetcher, HttpGet};
use crate::models::{ArticleRecord, ImageRef};
use crate::utils::normalize_paragraphs;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::{debug, error, info, instrument};
use url::Url;

static ARTICLE_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/news/\d{4}/\d{2}/[^/]+/?$").unwrap());
static LINKS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static CANONICAL: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"link[rel="canonical"]"#).unwrap());
static OG_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());
static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());
static DATE_META: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[property="article:published_time"], meta[name="date"], meta[name="dcterms.date"]"#)
        .unwrap()
});
static TIME: Lazy<Selector> = Lazy::new(|| Selector::parse("time[datetime]").unwrap());
static AUTHOR: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"meta[name="author"]"#).unwrap());
static SUBTITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"[class*="subtitle"], [class*="subhead"]"#).unwrap());
static OG_IMAGE: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"meta[property="og:image"]"#).unwrap());
static CONTAINER: Lazy<Selector> = Lazy::new(|| Selector::parse("article, main").unwrap());
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").unwrap());

pub fn listing_page_url(config: &ScraperConfig, page: usize) -> String {
    format!("{}/news?page={}", config.base_url, page)
}

/// Article links on one listing page, absolute and in page order.
pub fn article_links(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    document
        .select(&LINKS)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| resolve_url(base, href))
        .filter_map(|u| Url::parse(&u).ok())
        .filter(|u| u.host_str() == base.host_str() && ARTICLE_PATH.is_match(u.path()))
        .map(|mut u| {
            u.set_query(None);
            u.set_fragment(None);
            u.to_string()
        })
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

/// Walk listing pages until one adds no new article links.
#[instrument(level = "info", skip_all, fields(base = %config.base_url))]
pub async fn index_articles<C: HttpGet>(
    fetcher: &Fetcher<C>,
    config: &ScraperConfig,
) -> Result<Vec<ListedArticle>> {
    let base = Url::parse(&config.base_url).map_err(|e| ScrapeError::Config(e.to_string()))?;
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for page in 0..config.max_listing_pages {
        let page_url = listing_page_url(config, page);
        let html = match fetcher.fetch_text(&page_url).await {
            Ok(html) => html,
            Err(e) => {
                error!(page, error = %e, "Listing page failed; ending listing");
                break;
            }
        };

        let fresh: Vec<String> = article_links(&html, &base)
            .into_iter()
            .filter(|u| seen.insert(u.clone()))
            .collect();
        info!(page, new = fresh.len(), total = urls.len() + fresh.len(), "Indexed listing page");
        if fresh.is_empty() {
            break;
        }
        urls.extend(fresh);
    }

    info!(count = urls.len(), "Indexed HTML article URLs");
    debug!(urls = ?urls, "Article URLs");
    Ok(urls.into_iter().map(ListedArticle::Page).collect())
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .filter_map(|m| m.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

/// Parse one article page.
///
/// `<drupal-media>` embeds are ignored here; public pages render them as
/// plain `<img>` elements.
pub fn parse_article(url: &str, html: &str) -> Result<ArticleRecord> {
    let document = Html::parse_document(html);
    let page_url = Url::parse(url).map_err(|e| ScrapeError::parse(url, e))?;

    let canonical = document
        .select(&CANONICAL)
        .filter_map(|l| l.value().attr("href"))
        .find_map(|href| resolve_url(&page_url, href))
        .unwrap_or_else(|| url.to_string());

    let title = meta_content(&document, &OG_TITLE)
        .or_else(|| document.select(&H1).map(element_text).find(|t| !t.is_empty()))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .ok_or_else(|| ScrapeError::parse(url, "missing title"))?;

    let raw_date = meta_content(&document, &DATE_META)
        .or_else(|| {
            document
                .select(&TIME)
                .filter_map(|t| t.value().attr("datetime"))
                .map(str::to_string)
                .next()
        })
        .ok_or_else(|| ScrapeError::parse(url, "missing publish date"))?;
    let published = parse_published(&raw_date)
        .ok_or_else(|| ScrapeError::parse(url, format!("unparseable publish date {:?}", raw_date)))?;

    let container = document.select(&CONTAINER).next();
    let paragraphs: Vec<String> = match container {
        Some(c) => c.select(&PARAGRAPH).map(element_text).collect(),
        None => document.select(&PARAGRAPH).map(element_text).collect(),
    };
    let body = normalize_paragraphs(paragraphs);

    let subtitle = document
        .select(&SUBTITLE)
        .map(element_text)
        .find(|t| !t.is_empty());
    let author = meta_content(&document, &AUTHOR);

    let image_scope = container
        .map(|c| c.html())
        .unwrap_or_else(|| document.root_element().html());
    let mut images: Vec<ImageRef> = extract_body_images(&image_scope, &page_url)
        .into_iter()
        .filter_map(|img| match img {
            BodyImage::Direct(r) => Some(r),
            BodyImage::Media { .. } => None,
        })
        .collect();
    if images.is_empty() {
        if let Some(og) = meta_content(&document, &OG_IMAGE).and_then(|u| resolve_url(&page_url, &u)) {
            images.push(ImageRef::new(og, None));
        }
    }

    Ok(ArticleRecord {
        url: canonical,
        title,
        published,
        author,
        subtitle,
        body,
        images,
        fetched_at: Utc::now(),
    })
}

/// Fetch and parse one article page.
#[instrument(level = "info", skip_all, fields(%url))]
pub async fn fetch_article<C: HttpGet>(fetcher: &Fetcher<C>, url: &str) -> Result<ArticleRecord> {
    let html = fetcher.fetch_text(url).await?;
    let record = parse_article(url, &html)?;
    info!(words = record.word_count(), images = record.images.len(), "Parsed article page");
    Ok(record)
}
