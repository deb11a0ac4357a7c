//! Image download, normalisation and deduplication.
//!
//! Images are normalised before fingerprinting so that the same picture
//! served under different URLs or encodings is stored once:
//!
//! 1. decode (JPEG, PNG, GIF, WebP only; at least 10x10 pixels)
//! 2. flatten transparency onto white
//! 3. downscale to at most 1200 px wide
//! 4. re-encode as JPEG, quality 95
//!
//! The fingerprint is the SHA-256 of the normalised bytes. Known fingerprints
//! and already-resolved URLs live in a [`FingerprintStore`] that the caller
//! owns; its lifetime is one run or, when persisted, across runs.

use crate::error::{Result, ScrapeError};
use crate::fetcher::{Fetcher, HttpGet};
use crate::models::{ImageAsset, ImageRef};
use crate::utils::write_atomic;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};

pub const MIN_DIMENSION: u32 = 10;
pub const MAX_WIDTH: u32 = 1200;
pub const JPEG_QUALITY: u8 = 95;
pub const FINGERPRINT_FILE: &str = "fingerprints.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    pub local_path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Known image fingerprints and the URLs already resolved to them.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FingerprintStore {
    fingerprints: BTreeMap<String, StoredImage>,
    urls: BTreeMap<String, String>,
    #[serde(skip)]
    persist_path: Option<PathBuf>,
}

impl FingerprintStore {
    /// In-memory store scoped to one run.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Store backed by `path`. Existing entries are loaded; entries whose
    /// file has disappeared are forgotten.
    ///
    /// Stored paths are relative to the directory holding `path`, so an
    /// archive can be moved or reopened from another working directory.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut store = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| ScrapeError::filesystem(path, e))?;
            match serde_json::from_str::<FingerprintStore>(&raw) {
                Ok(store) => store,
                Err(e) => {
                    warn!(error = %e, "Fingerprint file unreadable; starting empty");
                    FingerprintStore::default()
                }
            }
        } else {
            FingerprintStore::default()
        };

        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        for img in store.fingerprints.values_mut() {
            if img.local_path.is_relative() {
                img.local_path = dir.join(&img.local_path);
            }
        }
        store.fingerprints.retain(|_, img| img.local_path.exists());
        let known = &store.fingerprints;
        store.urls.retain(|_, fp| known.contains_key(fp));
        store.persist_path = Some(path.to_path_buf());

        info!(fingerprints = store.fingerprints.len(), urls = store.urls.len(), "Loaded fingerprint store");
        Ok(store)
    }

    /// Write the store back to disk. No-op for in-memory stores.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        let on_disk = FingerprintStore {
            fingerprints: self
                .fingerprints
                .iter()
                .map(|(fp, img)| {
                    let local_path = img
                        .local_path
                        .strip_prefix(dir)
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|_| img.local_path.clone());
                    (fp.clone(), StoredImage { local_path, ..img.clone() })
                })
                .collect(),
            urls: self.urls.clone(),
            persist_path: None,
        };
        let json = serde_json::to_vec_pretty(&on_disk)?;
        write_atomic(path, &json).await?;
        debug!(path = %path.display(), "Saved fingerprint store");
        Ok(())
    }

    pub fn get(&self, fingerprint: &str) -> Option<&StoredImage> {
        self.fingerprints.get(fingerprint)
    }

    /// Resolve a URL seen before to its fingerprint and stored image.
    pub fn lookup_url(&self, url: &str) -> Option<(&str, &StoredImage)> {
        let fp = self.urls.get(url)?;
        self.fingerprints.get(fp).map(|img| (fp.as_str(), img))
    }

    pub fn insert(&mut self, fingerprint: String, image: StoredImage) {
        self.fingerprints.insert(fingerprint, image);
    }

    pub fn remember_url(&mut self, url: &str, fingerprint: &str) {
        self.urls.insert(url.to_string(), fingerprint.to_string());
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}

/// A decoded, flattened, resized image re-encoded as JPEG.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl NormalizedImage {
    pub fn fingerprint(&self) -> String {
        Sha256::digest(&self.jpeg)
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

/// Validate and normalise raw image bytes.
pub fn normalize(bytes: &[u8]) -> std::result::Result<NormalizedImage, String> {
    let format = image::guess_format(bytes).map_err(|e| format!("unknown image format: {}", e))?;
    if !matches!(
        format,
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif | ImageFormat::WebP
    ) {
        return Err(format!("unsupported image format: {:?}", format));
    }

    let img = image::load_from_memory_with_format(bytes, format).map_err(|e| e.to_string())?;
    if img.width() < MIN_DIMENSION || img.height() < MIN_DIMENSION {
        return Err(format!("image dimensions too small: {}x{}", img.width(), img.height()));
    }

    let mut rgb = flatten_on_white(&img);
    if rgb.width() > MAX_WIDTH {
        let height = ((rgb.height() as u64 * MAX_WIDTH as u64) / rgb.width() as u64).max(1) as u32;
        rgb = image::imageops::resize(&rgb, MAX_WIDTH, height, FilterType::Lanczos3);
    }

    let mut jpeg = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY))
        .map_err(|e| e.to_string())?;

    Ok(NormalizedImage {
        jpeg,
        width: rgb.width(),
        height: rgb.height(),
    })
}

fn flatten_on_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y).0;
        let a = p[3] as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a)) / 255) as u8;
        image::Rgb([blend(p[0]), blend(p[1]), blend(p[2])])
    })
}

/// File name for a stored image: fingerprint prefix plus a sanitised URL basename.
pub fn storage_name(url: &str, fingerprint: &str, index: usize) -> String {
    let base = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.rfind(|s| !s.is_empty()).map(str::to_string))
        })
        .map(|seg| {
            urlencoding::decode(&seg)
                .map(|s| s.into_owned())
                .unwrap_or(seg)
        })
        .unwrap_or_default();
    let stem = Path::new(&base)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(60)
        .collect();
    let stem = if stem.len() < 3 {
        format!("image_{}", index)
    } else {
        stem
    };
    let prefix: String = fingerprint.chars().take(12).collect();
    format!("{}_{}.jpg", prefix, stem)
}

/// Downloads an article's images into `images/`, reusing anything already stored.
#[derive(Debug)]
pub struct ImageManager {
    images_dir: PathBuf,
    store: FingerprintStore,
}

impl ImageManager {
    pub fn new(images_dir: impl Into<PathBuf>, store: FingerprintStore) -> Self {
        Self {
            images_dir: images_dir.into(),
            store,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    /// Persist the fingerprint store if it is disk-backed.
    pub async fn finish(&self) -> Result<()> {
        self.store.save().await
    }

    /// Resolve every reference to a stored asset, in order.
    ///
    /// Download and decode failures are per image: the image is dropped with
    /// a warning and the rest of the sequence continues. The same picture
    /// appears at most once in one article's output.
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Retrying HTTP client used for downloads
    /// * `refs` - The article's image references in document order
    ///
    /// # Returns
    ///
    /// The stored assets in document order.
    ///
    /// # Errors
    ///
    /// [`ScrapeError::Filesystem`] if an image cannot be written to `images/`.
    #[instrument(level = "info", skip_all, fields(count = refs.len()))]
    pub async fn collect<C: HttpGet>(
        &mut self,
        fetcher: &Fetcher<C>,
        refs: &[ImageRef],
    ) -> Result<Vec<ImageAsset>> {
        let mut assets: Vec<ImageAsset> = Vec::new();

        for (index, image_ref) in refs.iter().enumerate() {
            let asset = match self.resolve(fetcher, image_ref, index).await {
                Ok(asset) => asset,
                Err(e) if e.is_fatal() => {
                    error!(url = %image_ref.url, error = %e, "Cannot store image");
                    return Err(e);
                }
                Err(e) => {
                    warn!(url = %image_ref.url, error = %e, "Dropping image");
                    continue;
                }
            };
            if assets.iter().any(|a| a.fingerprint == asset.fingerprint) {
                debug!(url = %image_ref.url, "Same image already in this article; skipping");
                continue;
            }
            assets.push(asset);
        }

        info!(
            resolved = assets.len(),
            requested = refs.len(),
            known = self.store.len(),
            "Collected images"
        );
        Ok(assets)
    }

    async fn resolve<C: HttpGet>(
        &mut self,
        fetcher: &Fetcher<C>,
        image_ref: &ImageRef,
        index: usize,
    ) -> Result<ImageAsset> {
        let url = image_ref.url.replace(' ', "%20");

        if let Some((fp, stored)) = self.store.lookup_url(&url) {
            debug!(%url, "URL already resolved; reusing stored image");
            return Ok(asset_for(image_ref, fp, stored));
        }

        let resp = fetcher.fetch(&url).await?;
        if !resp.is_image() {
            return Err(ScrapeError::network(
                &url,
                format!(
                    "non-image response: {}",
                    resp.content_type.as_deref().unwrap_or("unknown")
                ),
                false,
            ));
        }

        let normalized = normalize(&resp.body).map_err(ScrapeError::Render)?;
        let fp = normalized.fingerprint();

        if let Some(stored) = self.store.get(&fp).cloned() {
            info!(%url, fingerprint = %fp, "Duplicate image content; reusing stored file");
            self.store.remember_url(&url, &fp);
            return Ok(asset_for(image_ref, &fp, &stored));
        }

        let local_path = self.images_dir.join(storage_name(&url, &fp, index));
        write_atomic(&local_path, &normalized.jpeg).await?;
        info!(%url, path = %local_path.display(), "Stored image");

        let stored = StoredImage {
            local_path,
            width: normalized.width,
            height: normalized.height,
        };
        let asset = asset_for(image_ref, &fp, &stored);
        self.store.insert(fp.clone(), stored);
        self.store.remember_url(&url, &fp);
        Ok(asset)
    }
}

fn asset_for(image_ref: &ImageRef, fingerprint: &str, stored: &StoredImage) -> ImageAsset {
    ImageAsset {
        source_url: image_ref.url.clone(),
        local_path: stored.local_path.clone(),
        fingerprint: fingerprint.to_string(),
        caption: image_ref.caption.clone(),
        width: stored.width,
        height: stored.height,
    }
}
