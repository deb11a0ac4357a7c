//! JSON persistence of article records.
//!
//! Every accepted article is written to `json/<stem>.json`, whatever happened
//! to its PDF. A later write for the same identifier replaces the file.
//!
//! ```text
//! json/
//! ├── commencement-2024-1a2b3c4d.json
//! └── green-key-weekend-9f8e7d6c.json
//! ```

use crate::error::Result;
use crate::models::{ArticleRecord, ImageAsset, PersistedArticle};
use crate::utils::write_atomic;
use std::path::PathBuf;
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct Persister {
    json_dir: PathBuf,
}

impl Persister {
    pub fn new(json_dir: impl Into<PathBuf>) -> Self {
        Self {
            json_dir: json_dir.into(),
        }
    }

    pub fn json_path(&self, record: &ArticleRecord) -> PathBuf {
        self.json_dir.join(format!("{}.json", record.file_stem()))
    }

    /// Serialize `record` with its stored images and write it.
    ///
    /// # Errors
    ///
    /// Serialization or filesystem errors; the caller treats them as a
    /// per-article failure.
    #[instrument(level = "info", skip_all, fields(url = %record.url))]
    pub async fn persist(&self, record: &ArticleRecord, assets: &[ImageAsset]) -> Result<PathBuf> {
        let document = PersistedArticle::from_record(record, assets);
        let mut json = serde_json::to_vec_pretty(&document)?;
        json.push(b'\n');

        let path = self.json_path(record);
        write_atomic(&path, &json).await?;
        info!(path = %path.display(), "Wrote article JSON");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::record;
    use crate::models::ImageRef;
    use chrono::{Duration, Utc};

    const URL: &str = "https://home.dartmouth.edu/news/2024/06/commencement-2024";

    #[tokio::test]
    async fn test_persist_schema() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = record(URL, 49, 2024, 6, 15);
        rec.images = vec![ImageRef::new("https://home.dartmouth.edu/a.jpg", Some("On the Green".into()))];

        let path = Persister::new(dir.path()).persist(&rec, &[]).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();

        assert_eq!(value["url"], URL);
        assert_eq!(value["title"], rec.title.as_str());
        assert_eq!(value["date"], "2024-06-15");
        assert_eq!(value["word_count"], 49);
        assert_eq!(value["images"][0]["url"], "https://home.dartmouth.edu/a.jpg");
        assert_eq!(value["images"][0]["caption"], "On the Green");
        assert!(value["images"][0]["local_path"].is_null());
    }

    #[tokio::test]
    async fn test_persist_is_idempotent_except_fetch_time() {
        let dir = tempfile::tempdir().unwrap();
        let persister = Persister::new(dir.path());
        let rec = record(URL, 200, 2024, 6, 15);

        let path = persister.persist(&rec, &[]).await.unwrap();
        let first = std::fs::read(&path).unwrap();
        persister.persist(&rec, &[]).await.unwrap();
        assert_eq!(first, std::fs::read(&path).unwrap());

        let mut later = rec.clone();
        later.fetched_at = Utc::now() + Duration::hours(1);
        persister.persist(&later, &[]).await.unwrap();
        let strip = |bytes: Vec<u8>| -> serde_json::Value {
            let mut v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            v.as_object_mut().unwrap().remove("fetched_at");
            v
        };
        assert_eq!(strip(first), strip(std::fs::read(&path).unwrap()));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
