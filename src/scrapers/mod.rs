//! Article listing and parsing for Dartmouth News.
//!
//! Two sources are supported. Each follows the same two-phase pattern:
//!
//! 1. **Indexing**: discover articles from a listing
//! 2. **Parsing**: turn one listed article into an [`ArticleRecord`]
//!
//! | Source | Module | Listing | Article content |
//! |--------|--------|---------|-----------------|
//! | JSON:API | [`jsonapi`] | `/jsonapi/node/article`, paginated | embedded body HTML |
//! | HTML | [`html`] | `/news?page=N` | one article page per URL |
//!
//! This module holds the HTML helpers both parsers share: body text
//! extraction, image discovery, URL resolution and date parsing.
//!
//! [`ArticleRecord`]: crate::models::ArticleRecord

pub mod html;
pub mod jsonapi;

use crate::fetcher::{Fetcher, HttpGet};
use crate::models::ImageRef;
use crate::utils::normalize_paragraphs;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, warn};
use url::Url;

/// One article discovered by a listing.
#[derive(Debug, Clone)]
pub enum ListedArticle {
    /// A JSON:API `node--article` resource.
    Node(Box<serde_json::Value>),
    /// An article page URL.
    Page(String),
}

impl ListedArticle {
    /// Short label for logs and the failure summary.
    pub fn label(&self) -> String {
        match self {
            ListedArticle::Page(url) => url.clone(),
            ListedArticle::Node(node) => node
                .pointer("/attributes/path/alias")
                .and_then(|v| v.as_str())
                .or_else(|| node.pointer("/attributes/title").and_then(|v| v.as_str()))
                .or_else(|| node.get("id").and_then(|v| v.as_str()))
                .unwrap_or("<unidentified node>")
                .to_string(),
        }
    }
}

/// An image found in body HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyImage {
    Direct(ImageRef),
    /// A `<drupal-media>` embed whose file URL needs one more JSON:API lookup.
    Media {
        jsonapi_url: String,
        caption: Option<String>,
    },
}

const PLACEHOLDER_MARKERS: [&str; 6] = [
    "image-x-generic.png",
    "default/image-",
    "icon-",
    "placeholder",
    "transparent.gif",
    "blank.gif",
];

const BLOCK_TAGS: [&str; 16] = [
    "p", "div", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "section",
    "article", "table", "tr",
];

static IMAGE_CANDIDATES: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img, source[srcset], div[style], drupal-media").unwrap());
static FIGCAPTION: Lazy<Selector> = Lazy::new(|| Selector::parse("figcaption").unwrap());
static BACKGROUND_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"background-image:\s*url\(['"]?([^'")]+)['"]?\)"#).unwrap());

/// Resolve `href` against `base`, returning an absolute http(s) URL.
pub fn resolve_url(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("data:") {
        return None;
    }
    let resolved = base.join(href).ok()?;
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

pub fn is_placeholder(url: &str) -> bool {
    let lower = url.to_lowercase();
    PLACEHOLDER_MARKERS.iter().any(|m| lower.contains(m))
}

/// Parse a publish date in any of the formats the site emits.
///
/// Accepts RFC 3339, ISO 8601 without offset (taken as UTC), `YYYY-MM-DD`,
/// `Month D, YYYY`, and unix timestamps.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    for fmt in ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y"] {
        if let Ok(day) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN)));
        }
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
}

/// Plain text of an HTML fragment, one paragraph per block element.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    element_text(fragment.root_element())
}

pub fn element_text(element: ElementRef<'_>) -> String {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    collect_blocks(element, &mut current, &mut paragraphs);
    paragraphs.push(current);
    normalize_paragraphs(paragraphs)
}

fn collect_blocks(element: ElementRef<'_>, current: &mut String, out: &mut Vec<String>) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => current.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if matches!(name, "script" | "style" | "figcaption" | "noscript") {
                    continue;
                }
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                let block = BLOCK_TAGS.contains(&name);
                if block {
                    out.push(std::mem::take(current));
                }
                if name == "br" {
                    current.push(' ');
                }
                collect_blocks(child_el, current, out);
                if block {
                    out.push(std::mem::take(current));
                }
            }
            _ => {}
        }
    }
}

/// Caption for an image element: the enclosing `<figure>`'s `<figcaption>`,
/// else the element's `alt` text.
fn caption_for(element: ElementRef<'_>) -> Option<String> {
    let from_figure = element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "figure")
        .and_then(|fig| fig.select(&FIGCAPTION).next())
        .map(element_text)
        .filter(|c| !c.is_empty());
    from_figure.or_else(|| {
        element
            .value()
            .attr("alt")
            .map(|a| a.split_whitespace().join(" "))
            .filter(|a| !a.is_empty())
    })
}

/// The widest candidate of a `srcset`, falling back to the first.
fn best_srcset_candidate(srcset: &str) -> Option<&str> {
    srcset
        .split(',')
        .filter_map(|item| {
            let mut parts = item.split_whitespace();
            let url = parts.next()?;
            let width = parts
                .next()
                .and_then(|d| d.trim_end_matches(['w', 'x']).parse::<f32>().ok())
                .unwrap_or(0.0);
            Some((url, width))
        })
        .fold(None, |best: Option<(&str, f32)>, (url, width)| match best {
            Some((_, w)) if w >= width => best,
            _ => Some((url, width)),
        })
        .map(|(url, _)| url)
}

/// Discover images in body HTML, in document order.
///
/// Handles `<img src>` (or its best `srcset` candidate when `src` is missing),
/// `<source srcset>` inside `<picture>`, inline `background-image` styles and
/// `<drupal-media>` embeds. Placeholders and duplicate URLs are dropped.
pub fn extract_body_images(html: &str, base: &Url) -> Vec<BodyImage> {
    let document = Html::parse_fragment(html);
    let mut found = Vec::new();

    for element in document.select(&IMAGE_CANDIDATES) {
        let attrs = element.value();
        match attrs.name() {
            "img" => {
                let src = attrs
                    .attr("src")
                    .filter(|s| !s.trim().is_empty())
                    .or_else(|| attrs.attr("srcset").and_then(best_srcset_candidate))
                    .or_else(|| attrs.attr("data-src"));
                if let Some(url) = src.and_then(|s| resolve_url(base, s)) {
                    found.push(BodyImage::Direct(ImageRef::new(url, caption_for(element))));
                }
            }
            "source" => {
                let has_img_sibling = element
                    .parent()
                    .and_then(ElementRef::wrap)
                    .is_some_and(|p| p.children().filter_map(ElementRef::wrap).any(|c| c.value().name() == "img"));
                if has_img_sibling {
                    continue;
                }
                if let Some(url) = attrs
                    .attr("srcset")
                    .and_then(best_srcset_candidate)
                    .and_then(|s| resolve_url(base, s))
                {
                    found.push(BodyImage::Direct(ImageRef::new(url, caption_for(element))));
                }
            }
            "div" => {
                let style = attrs.attr("style").unwrap_or_default();
                if let Some(url) = BACKGROUND_IMAGE
                    .captures(style)
                    .and_then(|c| c.get(1))
                    .and_then(|m| resolve_url(base, m.as_str()))
                {
                    found.push(BodyImage::Direct(ImageRef::new(url, caption_for(element))));
                }
            }
            "drupal-media" => {
                if let Some(url) = attrs
                    .attr("data-entity-jsonapi-url")
                    .and_then(|s| resolve_url(base, s))
                {
                    let caption = attrs
                        .attr("data-caption")
                        .map(html_to_text)
                        .filter(|c| !c.is_empty());
                    found.push(BodyImage::Media {
                        jsonapi_url: url,
                        caption,
                    });
                } else {
                    debug!(uuid = ?attrs.attr("data-entity-uuid"), "drupal-media without JSON:API URL");
                }
            }
            _ => {}
        }
    }

    found
        .into_iter()
        .filter(|img| match img {
            BodyImage::Direct(r) => !is_placeholder(&r.url),
            BodyImage::Media { .. } => true,
        })
        .unique_by(|img| match img {
            BodyImage::Direct(r) => r.url.clone(),
            BodyImage::Media { jsonapi_url, .. } => jsonapi_url.clone(),
        })
        .collect()
}

/// File URL of a media entity as returned by its JSON:API endpoint.
pub fn media_file_url(media: &serde_json::Value) -> Option<&str> {
    [
        "/field_media_image/uri/url",
        "/data/attributes/field_media_image/uri/url",
        "/data/attributes/uri/url",
        "/included/0/attributes/uri/url",
    ]
    .iter()
    .find_map(|p| media.pointer(p).and_then(|v| v.as_str()))
}

/// Turn body images into plain references, looking up `<drupal-media>`
/// embeds through the fetcher. Failed lookups are skipped with a warning.
pub async fn resolve_body_images<C: HttpGet>(
    fetcher: &Fetcher<C>,
    base: &Url,
    images: Vec<BodyImage>,
) -> Vec<ImageRef> {
    let mut refs = Vec::with_capacity(images.len());
    for image in images {
        match image {
            BodyImage::Direct(r) => refs.push(r),
            BodyImage::Media {
                jsonapi_url,
                caption,
            } => {
                let json = match fetcher.fetch_text(&jsonapi_url).await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(url = %jsonapi_url, error = %e, "Media lookup failed");
                        continue;
                    }
                };
                let url = serde_json::from_str::<serde_json::Value>(&json)
                    .ok()
                    .and_then(|v| media_file_url(&v).and_then(|u| resolve_url(base, u)));
                match url {
                    Some(url) if !is_placeholder(&url) => refs.push(ImageRef::new(url, caption)),
                    Some(_) => {}
                    None => warn!(url = %jsonapi_url, "Media entity has no image URL"),
                }
            }
        }
    }
    refs.into_iter().unique_by(|r| r.url.clone()).collect()
}
