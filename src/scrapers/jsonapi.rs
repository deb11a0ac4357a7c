//! Dartmouth News over the Drupal JSON:API.
//!
//! The listing endpoint returns article nodes newest first with the body HTML
//! embedded, so no per-article page fetch is needed. When both ends of the date
//! range are known the server filters on `created` as well; the client-side
//! DateFilter still applies.
//!
//! # URL Pattern
//!
//! ```text
//! https://home.dartmouth.edu/jsonapi/node/article?page[limit]=50&page[offset]=0&sort=-created&...
//! ```

use super::{extract_body_images, html_to_text, parse_published, resolve_body_images, resolve_url, ListedArticle};
use crate::config::ScraperConfig;
use crate::error::{Result, ScrapeError};
use crate::fetcher::{Fetcher, HttpGet};
use crate::models::{ArticleRecord, ImageRef};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

pub const ARTICLE_ENDPOINT: &str = "/jsonapi/node/article";

/// Listing URL for one page of results.
pub fn listing_url(config: &ScraperConfig, page: usize) -> Result<String> {
    let mut params: Vec<(&str, String)> = vec![
        ("page[limit]", config.page_size.to_string()),
        ("page[offset]", (page * config.page_size).to_string()),
        ("sort", "-created".to_string()),
        ("include", "article_image".to_string()),
    ];

    if let (Some(start), Some(end)) = (config.range.start_instant(), config.range.end_instant()) {
        params.extend([
            ("filter[created][condition][path]", "created".to_string()),
            ("filter[created][condition][operator]", "BETWEEN".to_string()),
            ("filter[created][condition][value][0]", start.timestamp().to_string()),
            ("filter[created][condition][value][1]", end.timestamp().to_string()),
        ]);
    }
    params.push(("filter[status][value]", "1".to_string()));

    let endpoint = format!("{}{}", config.base_url, ARTICLE_ENDPOINT);
    Url::parse_with_params(&endpoint, &params)
        .map(|u| u.to_string())
        .map_err(|e| ScrapeError::Config(format!("invalid listing URL {}: {}", endpoint, e)))
}

/// Walk the paginated listing and return every article node.
///
/// Stops on an empty or short page, after `max_listing_pages` pages, or once
/// a page reaches articles older than the range start (the listing is sorted
/// newest first). A page that still fails after retries ends the listing;
/// nodes collected so far are returned.
///
/// # Arguments
///
/// * `fetcher` - Retrying HTTP client
/// * `config` - Base URL, page size, page cap and date range
///
/// # Returns
///
/// Every listed node in listing order, or a `Config` error if the listing
/// URL cannot be built.
#[instrument(level = "info", skip_all, fields(base = %config.base_url, range = %config.range))]
pub async fn index_articles<C: HttpGet>(
    fetcher: &Fetcher<C>,
    config: &ScraperConfig,
) -> Result<Vec<ListedArticle>> {
    let mut nodes = Vec::new();
    let range_start = config.range.start_instant();

    for page in 0..config.max_listing_pages {
        let url = listing_url(config, page)?;
        debug!(%url, page, "Fetching listing page");

        let body = match fetcher.fetch_text(&url).await {
            Ok(body) => body,
            Err(e) => {
                error!(page, error = %e, "Listing page failed; ending listing");
                break;
            }
        };
        let data = match serde_json::from_str::<Value>(&body) {
            Ok(v) => v.get("data").and_then(|d| d.as_array()).cloned().unwrap_or_default(),
            Err(e) => {
                error!(page, error = %e, "Listing page is not valid JSON; ending listing");
                break;
            }
        };

        let count = data.len();
        let oldest = data
            .iter()
            .filter_map(|n| n.pointer("/attributes/created").and_then(|v| v.as_str()))
            .filter_map(parse_published)
            .min();
        nodes.extend(data.into_iter().map(|n| ListedArticle::Node(Box::new(n))));
        info!(page, count, total = nodes.len(), "Fetched listing page");

        if count < config.page_size {
            break;
        }
        if let (Some(oldest), Some(start)) = (oldest, range_start) {
            if oldest < start {
                debug!(page, %oldest, "Listing reached articles before the range start");
                break;
            }
        }
    }

    info!(count = nodes.len(), "Indexed JSON:API articles");
    Ok(nodes)
}

fn attr_str<'a>(attrs: &'a Value, key: &str) -> Option<&'a str> {
    attrs
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Rich-text fields are `{value, processed}` objects or plain strings.
fn rich_text<'a>(attrs: &'a Value, key: &str) -> Option<&'a str> {
    let field = attrs.get(key)?;
    field
        .get("value")
        .and_then(|v| v.as_str())
        .or_else(|| field.get("processed").and_then(|v| v.as_str()))
        .or_else(|| field.as_str())
        .filter(|s| !s.trim().is_empty())
}

/// Canonical URL of a node: path alias, node id, then the resource link.
fn identifier(node: &Value, base: &Url) -> Option<String> {
    let attrs = node.get("attributes")?;
    if let Some(alias) = attrs.pointer("/path/alias").and_then(|v| v.as_str()) {
        return resolve_url(base, alias);
    }
    if let Some(nid) = attrs.get("drupal_internal__nid").and_then(|v| v.as_u64()) {
        return resolve_url(base, &format!("/node/{}", nid));
    }
    node.pointer("/links/self/href")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// `og:image` URLs from the node's metatag list.
fn metatag_images(attrs: &Value, base: &Url) -> Vec<String> {
    let tags = match attrs.get("metatag") {
        Some(Value::Array(tags)) => tags.iter().collect::<Vec<_>>(),
        Some(tag @ Value::Object(_)) => vec![tag],
        _ => return Vec::new(),
    };
    tags.into_iter()
        .filter(|t| t.get("tag").and_then(|v| v.as_str()) == Some("meta"))
        .filter_map(|t| t.get("attributes"))
        .filter(|a| a.get("property").and_then(|v| v.as_str()) == Some("og:image"))
        .filter_map(|a| a.get("content").and_then(|v| v.as_str()))
        .filter_map(|c| resolve_url(base, c))
        .collect()
}

/// Build an [`ArticleRecord`] from one JSON:API article node.
///
/// Title and `created` are required; anything else missing is left empty.
/// `<drupal-media>` embeds are resolved through `fetcher`.
#[instrument(level = "info", skip_all)]
pub async fn parse_node<C: HttpGet>(
    fetcher: &Fetcher<C>,
    base: &Url,
    node: &Value,
) -> Result<ArticleRecord> {
    let url = identifier(node, base).ok_or_else(|| {
        ScrapeError::parse(
            node.get("id").and_then(|v| v.as_str()).unwrap_or("<unknown node>"),
            "node has no usable identifier",
        )
    })?;
    let attrs = node
        .get("attributes")
        .ok_or_else(|| ScrapeError::parse(&url, "node has no attributes"))?;

    let title = attr_str(attrs, "title")
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .ok_or_else(|| ScrapeError::parse(&url, "missing title"))?;
    let created = attr_str(attrs, "created").ok_or_else(|| ScrapeError::parse(&url, "missing created date"))?;
    let published = parse_published(created)
        .ok_or_else(|| ScrapeError::parse(&url, format!("unparseable created date {:?}", created)))?;

    let body_html = rich_text(attrs, "article_body").unwrap_or_default();
    let body = html_to_text(body_html);
    let subtitle = rich_text(attrs, "news_subtitle")
        .map(html_to_text)
        .filter(|s| !s.is_empty());
    let author = attr_str(attrs, "news_author").map(str::to_string);

    let mut images = resolve_body_images(fetcher, base, extract_body_images(body_html, base)).await;
    if images.is_empty() {
        let fallback = attr_str(attrs, "article_main_image_url")
            .and_then(|u| resolve_url(base, u))
            .into_iter()
            .chain(metatag_images(attrs, base));
        images = fallback
            .map(|u| ImageRef::new(u, None))
            .take(1)
            .collect();
        if !images.is_empty() {
            debug!(%url, "No body images; using main/meta image");
        }
    }
    if let Some(first) = images.first_mut().filter(|i| i.caption.is_none()) {
        first.caption = attr_str(attrs, "media_image_caption")
            .map(html_to_text)
            .filter(|c| !c.is_empty());
    }

    if body.is_empty() {
        warn!(%url, "Article has an empty body");
    }

    Ok(ArticleRecord {
        url,
        title,
        published,
        author,
        subtitle,
        body,
        images,
        fetched_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date_filter::DateRange;
    use crate::fetcher::testing::{fake_fetcher, FakeHttp, Scripted};
    use serde_json::json;

    fn config() -> ScraperConfig {
        ScraperConfig {
            page_size: 2,
            ..ScraperConfig::default()
        }
    }

    fn base() -> Url {
        Url::parse("https://home.dartmouth.edu").unwrap()
    }

    fn node(title: &str, created: &str, body: &str) -> Value {
        json!({
            "type": "node--article",
            "id": "0b6a2f4e",
            "attributes": {
                "title": title,
                "created": created,
                "news_author": "Office of Communications",
                "news_subtitle": {"value": "<p>A day to remember</p>"},
                "path": {"alias": "/news/2024/06/commencement-2024"},
                "article_body": {"value": body, "processed": body},
                "media_image_caption": "<p>Graduates on the Green</p>",
                "metatag": [
                    {"tag": "meta", "attributes": {"property": "og:image", "content": "https://home.dartmouth.edu/og.jpg"}},
                    {"tag": "link", "attributes": {"rel": "canonical", "href": "https://x"}}
                ]
            }
        })
    }

    #[test]
    fn test_listing_url_with_range() {
        let mut cfg = config();
        cfg.range = DateRange::parse(Some("2024-01-01"), Some("2024-12-31")).unwrap();
        let url = Url::parse(&listing_url(&cfg, 3).unwrap()).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |k: &str| pairs.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());

        assert_eq!(url.path(), "/jsonapi/node/article");
        assert_eq!(get("page[offset]"), Some("6"));
        assert_eq!(get("page[limit]"), Some("2"));
        assert_eq!(get("sort"), Some("-created"));
        assert_eq!(get("filter[created][condition][operator]"), Some("BETWEEN"));
        assert_eq!(get("filter[created][condition][value][0]"), Some("1704067200"));
        assert_eq!(get("filter[created][condition][value][1]"), Some("1735689599"));
        assert_eq!(get("filter[status][value]"), Some("1"));
    }

    #[test]
    fn test_listing_url_without_range_has_no_created_filter() {
        let url = listing_url(&config(), 0).unwrap();
        assert!(!url.contains("BETWEEN"));
    }

    #[tokio::test]
    async fn test_index_paginates_until_short_page() {
        let cfg = config();
        let page = |n: usize| json!({"data": (0..n).map(|i| json!({"id": i})).collect::<Vec<_>>()}).to_string();
        let http = FakeHttp::new()
            .route(&listing_url(&cfg, 0).unwrap(), vec![Scripted::json(&page(2))])
            .route(&listing_url(&cfg, 1).unwrap(), vec![Scripted::json(&page(1))]);
        let fetcher = fake_fetcher(http, 1);

        let listed = index_articles(&fetcher, &cfg).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(fetcher.transport().total_calls(), 2);
    }

    #[tokio::test]
    async fn test_index_stops_on_failed_page_keeping_results() {
        let cfg = config();
        let full = json!({"data": [{"id": "a"}, {"id": "b"}]}).to_string();
        let http = FakeHttp::new()
            .route(&listing_url(&cfg, 0).unwrap(), vec![Scripted::json(&full)])
            .route(&listing_url(&cfg, 1).unwrap(), vec![Scripted::Status(503)]);
        let fetcher = fake_fetcher(http, 2);

        let listed = index_articles(&fetcher, &cfg).await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn test_index_stops_at_page_cap() {
        let mut cfg = config();
        cfg.max_listing_pages = 3;
        let full = json!({"data": [{"id": "a"}, {"id": "b"}]}).to_string();
        let mut http = FakeHttp::new();
        for page in 0..6 {
            http = http.route(&listing_url(&cfg, page).unwrap(), vec![Scripted::json(&full)]);
        }
        let fetcher = fake_fetcher(http, 1);

        let listed = index_articles(&fetcher, &cfg).await.unwrap();
        assert_eq!(listed.len(), 6);
        assert_eq!(fetcher.transport().total_calls(), 3);
    }

    #[tokio::test]
    async fn test_index_stops_once_older_than_range_start() {
        let mut cfg = config();
        cfg.range = DateRange::parse(Some("2024-01-01"), None).unwrap();
        let first = json!({"data": [
            {"id": "a", "attributes": {"created": "2024-03-01T10:00:00+00:00"}},
            {"id": "b", "attributes": {"created": "2023-12-20T10:00:00+00:00"}}
        ]})
        .to_string();
        let second = json!({"data": [{"id": "c"}, {"id": "d"}]}).to_string();
        let http = FakeHttp::new()
            .route(&listing_url(&cfg, 0).unwrap(), vec![Scripted::json(&first)])
            .route(&listing_url(&cfg, 1).unwrap(), vec![Scripted::json(&second)]);
        let fetcher = fake_fetcher(http, 1);

        let listed = index_articles(&fetcher, &cfg).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(fetcher.transport().total_calls(), 1);
    }

    #[tokio::test]
    async fn test_parse_node_full() {
        let fetcher = fake_fetcher(FakeHttp::new(), 1);
        let body = r#"<p>Seniors gathered on the Green.</p><figure><img src="/files/grads.jpg"></figure><p>More text.</p>"#;
        let record = parse_node(&fetcher, &base(), &node("  Commencement   2024 ", "2024-06-09T14:00:00+00:00", body))
            .await
            .unwrap();

        assert_eq!(record.url, "https://home.dartmouth.edu/news/2024/06/commencement-2024");
        assert_eq!(record.title, "Commencement 2024");
        assert_eq!(record.published.to_rfc3339(), "2024-06-09T14:00:00+00:00");
        assert_eq!(record.author.as_deref(), Some("Office of Communications"));
        assert_eq!(record.subtitle.as_deref(), Some("A day to remember"));
        assert_eq!(record.body, "Seniors gathered on the Green.\n\nMore text.");
        assert_eq!(
            record.images,
            vec![ImageRef::new(
                "https://home.dartmouth.edu/files/grads.jpg",
                Some("Graduates on the Green".into())
            )]
        );
        assert_eq!(fetcher.transport().total_calls(), 0);
    }

    #[tokio::test]
    async fn test_parse_node_falls_back_to_og_image() {
        let fetcher = fake_fetcher(FakeHttp::new(), 1);
        let record = parse_node(&fetcher, &base(), &node("T", "2024-06-09T14:00:00+00:00", "<p>No pictures</p>"))
            .await
            .unwrap();
        assert_eq!(record.images.len(), 1);
        assert_eq!(record.images[0].url, "https://home.dartmouth.edu/og.jpg");
    }

    #[tokio::test]
    async fn test_parse_node_requires_title_and_date() {
        let fetcher = fake_fetcher(FakeHttp::new(), 1);

        let no_title = parse_node(&fetcher, &base(), &node("", "2024-06-09T14:00:00+00:00", "")).await;
        assert!(matches!(no_title, Err(ScrapeError::Parse { .. })));

        let bad_date = parse_node(&fetcher, &base(), &node("Title", "sometime in June", "")).await;
        assert!(matches!(bad_date, Err(ScrapeError::Parse { .. })));
    }

    #[test]
    fn test_identifier_fallbacks() {
        let by_nid = json!({"attributes": {"drupal_internal__nid": 42}});
        assert_eq!(identifier(&by_nid, &base()).as_deref(), Some("https://home.dartmouth.edu/node/42"));

        let by_link = json!({"attributes": {}, "links": {"self": {"href": "https://home.dartmouth.edu/jsonapi/node/article/u1"}}});
        assert_eq!(
            identifier(&by_link, &base()).as_deref(),
            Some("https://home.dartmouth.edu/jsonapi/node/article/u1")
        );

        assert_eq!(identifier(&json!({"id": "x"}), &base()), None);
    }
}
