//! Error taxonomy for the archiver.
//!
//! Per-article errors ([`ScrapeError::Network`], [`ScrapeError::Parse`],
//! [`ScrapeError::Render`]) are logged and recorded in the run summary.
//! [`ScrapeError::Filesystem`], [`ScrapeError::Config`] and
//! [`ScrapeError::InvalidDate`] abort the run during setup.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("network error fetching {url}: {message}")]
    Network {
        url: String,
        message: String,
        retryable: bool,
    },

    #[error("parse error for {url}: {message}")]
    Parse { url: String, message: String },

    #[error("render error: {0}")]
    Render(String),

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid date {0:?}: dates must be in YYYY-MM-DD format (e.g., 2024-12-31)")]
    InvalidDate(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScrapeError {
    pub fn network(url: impl Into<String>, message: impl ToString, retryable: bool) -> Self {
        ScrapeError::Network {
            url: url.into(),
            message: message.to_string(),
            retryable,
        }
    }

    pub fn parse(url: impl Into<String>, message: impl ToString) -> Self {
        ScrapeError::Parse {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn filesystem(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        ScrapeError::Filesystem {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// True for transient failures the fetcher may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScrapeError::Network { retryable: true, .. })
    }

    /// True for failures that must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScrapeError::Filesystem { .. } | ScrapeError::Config(_) | ScrapeError::InvalidDate(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ScrapeError::network("https://a", "503", true).is_retryable());
        assert!(!ScrapeError::network("https://a", "404", false).is_retryable());
        assert!(!ScrapeError::parse("https://a", "no title").is_retryable());
    }

    #[test]
    fn test_fatal_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(ScrapeError::filesystem("/out/json", io).is_fatal());
        assert!(ScrapeError::InvalidDate("2024-13-01".into()).is_fatal());
        assert!(!ScrapeError::Render("bad image".into()).is_fatal());
    }

    #[test]
    fn test_display_includes_url() {
        let e = ScrapeError::network("https://home.dartmouth.edu/news", "timed out", true);
        assert!(e.to_string().contains("https://home.dartmouth.edu/news"));
        assert!(e.to_string().contains("timed out"));
    }
}
