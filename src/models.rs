//! Data models shared across the pipeline.
//!
//! - [`ArticleRecord`]: one parsed article, immutable once built
//! - [`ImageRef`]: an image URL found in an article, with its caption
//! - [`ImageAsset`]: an image stored on disk, keyed by content fingerprint
//! - [`PersistedArticle`]: the JSON document written for every accepted article

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// An image reference in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    pub caption: Option<String>,
}

impl ImageRef {
    pub fn new(url: impl Into<String>, caption: Option<String>) -> Self {
        Self {
            url: url.into(),
            caption,
        }
    }
}

/// A structured news article as produced by a parser.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRecord {
    /// Canonical article URL; also the identifier.
    pub url: String,
    pub title: String,
    pub published: DateTime<Utc>,
    pub author: Option<String>,
    pub subtitle: Option<String>,
    /// Plain-text body, paragraphs separated by blank lines.
    pub body: String,
    pub images: Vec<ImageRef>,
    pub fetched_at: DateTime<Utc>,
}

impl ArticleRecord {
    pub fn word_count(&self) -> usize {
        word_count(&self.body)
    }

    /// Deterministic file stem derived from the identifier.
    ///
    /// The last URL path segment, slugified and capped at 60 characters,
    /// followed by the first 8 hex digits of the URL's SHA-256 so that two
    /// URLs sharing a final segment never collide.
    ///
    /// `https://home.dartmouth.edu/news/2024/06/commencement-2024`
    /// becomes `commencement-2024-<hash8>`.
    pub fn file_stem(&self) -> String {
        file_stem_for(&self.url)
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn file_stem_for(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let hash8: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();

    let segment = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.rfind(|s| !s.is_empty()).map(str::to_string))
        })
        .unwrap_or_default();
    let slug: String = crate::utils::slugify_title(&segment).chars().take(60).collect();
    let slug = slug.trim_matches('-');

    if slug.is_empty() {
        format!("article-{}", hash8)
    } else {
        format!("{}-{}", slug, hash8)
    }
}

/// An image stored under `images/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub source_url: String,
    pub local_path: PathBuf,
    /// Lower-hex SHA-256 of the stored (normalised) bytes.
    pub fingerprint: String,
    pub caption: Option<String>,
    pub width: u32,
    pub height: u32,
}

/// Image entry in the persisted JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedImage {
    pub url: String,
    pub caption: Option<String>,
    pub local_path: Option<String>,
}

/// JSON document written to `json/<stem>.json`.
///
/// Field order is fixed by the struct so repeated writes are byte-identical
/// apart from `fetched_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedArticle {
    pub url: String,
    pub title: String,
    /// Publication date, `YYYY-MM-DD`.
    pub date: String,
    pub published_at: DateTime<Utc>,
    pub author: Option<String>,
    pub subtitle: Option<String>,
    pub body: String,
    pub word_count: usize,
    pub images: Vec<PersistedImage>,
    pub fetched_at: DateTime<Utc>,
}

impl PersistedArticle {
    /// Combine a record with the assets downloaded for it. Every image
    /// reference is listed; `local_path` is `None` for images that were dropped.
    pub fn from_record(record: &ArticleRecord, assets: &[ImageAsset]) -> Self {
        let images = record
            .images
            .iter()
            .map(|img| PersistedImage {
                url: img.url.clone(),
                caption: img.caption.clone(),
                local_path: assets
                    .iter()
                    .find(|a| a.source_url == img.url)
                    .map(|a| a.local_path.display().to_string()),
            })
            .collect();

        Self {
            url: record.url.clone(),
            title: record.title.clone(),
            date: record.published.format("%Y-%m-%d").to_string(),
            published_at: record.published,
            author: record.author.clone(),
            subtitle: record.subtitle.clone(),
            body: record.body.clone(),
            word_count: record.word_count(),
            images,
            fetched_at: record.fetched_at,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    /// A record with `words` body words, published on the given UTC day.
    pub fn record(url: &str, words: usize, y: i32, m: u32, d: u32) -> ArticleRecord {
        let body = (0..words)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        ArticleRecord {
            url: url.to_string(),
            title: "Commencement Weekend Draws Record Crowds".to_string(),
            published: Utc.with_ymd_and_hms(y, m, d, 14, 30, 0).unwrap(),
            author: Some("Office of Communications".to_string()),
            subtitle: None,
            body,
            images: vec![],
            fetched_at: Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap(),
        }
    }
}
