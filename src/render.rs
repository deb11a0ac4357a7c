//! PDF rendering, gated on body length.
//!
//! Articles with fewer than [`MIN_WORDS`] body words are skipped. Longer ones
//! become an A4 document:
//!
//! ```text
//!               DARTMOUTH NEWS
//!                 <title>
//!               By <author>
//!              <Month DD, YYYY>
//!               <subtitle>
//!   [image 1]  caption 1
//!   [image 2]  caption 2
//!   <body paragraphs>
//!                               Page N
//!              <attribution footnote>
//! ```
//!
//! Text is drawn with the PDF built-in Helvetica family, so it is passed
//! through [`clean_text`] first and wrapped with an average glyph width.

use crate::error::{Result, ScrapeError};
use crate::models::{ArticleRecord, ImageAsset};
use crate::utils::{clean_text, write_atomic};
use printpdf::{
    BuiltinFont, Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, Point, Pt, RawImage, RawImageData,
    RawImageFormat, TextItem, XObjectId, XObjectTransform,
};
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

pub const MIN_WORDS: usize = 50;

const PAGE_W: f32 = 210.0;
const PAGE_H: f32 = 297.0;
const MARGIN: f32 = 20.0;
const FOOTER_TOP: f32 = 30.0;
const IMAGE_MAX_W: f32 = 170.0;
const IMAGE_MAX_H: f32 = 120.0;
/// Average Helvetica advance width as a fraction of the font size.
const AVG_GLYPH: f32 = 0.5;
const PT_TO_MM: f32 = 0.352_778;

const MASTHEAD: &str = "DARTMOUTH NEWS";
const FOOTNOTE: &str = "Rauner Special Collections. Dartmouth College, Office of Communications records (DA-29). \
                        Copyright Trustees of Dartmouth College";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    TooShort { words: usize },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered(PathBuf),
    Skipped(SkipReason),
}

impl RenderOutcome {
    #[cfg(test)]
    pub fn is_rendered(&self) -> bool {
        matches!(self, RenderOutcome::Rendered(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Center,
}

/// Builds pages top-down, breaking when the cursor reaches the footer.
struct Composer {
    pages: Vec<PdfPage>,
    ops: Vec<Op>,
    /// Distance from the top edge, in mm.
    cursor: f32,
}

impl Composer {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            ops: Vec::new(),
            cursor: MARGIN,
        }
    }

    fn text_width(text: &str, size: f32) -> f32 {
        text.chars().count() as f32 * size * AVG_GLYPH * PT_TO_MM
    }

    fn ensure_room(&mut self, height: f32) {
        if self.cursor + height > PAGE_H - FOOTER_TOP && self.cursor > MARGIN {
            self.break_page();
        }
    }

    fn break_page(&mut self) {
        let number = self.pages.len() + 1;
        let mut ops = std::mem::take(&mut self.ops);
        ops.extend(footer_ops(number));
        self.pages.push(PdfPage::new(Mm(PAGE_W), Mm(PAGE_H), ops));
        self.cursor = MARGIN;
    }

    fn draw_line(&mut self, text: &str, size: f32, font: BuiltinFont, align: Align) {
        let line_h = size * PT_TO_MM * 1.4;
        self.ensure_room(line_h);
        let x = match align {
            Align::Left => MARGIN,
            Align::Center => ((PAGE_W - Self::text_width(text, size)) / 2.0).max(MARGIN),
        };
        self.cursor += line_h;
        self.ops.extend(text_ops(text, size, font, x, PAGE_H - self.cursor));
    }

    /// Word-wrapped paragraph.
    fn paragraph(&mut self, text: &str, size: f32, font: BuiltinFont, align: Align) {
        let max_w = PAGE_W - 2.0 * MARGIN;
        for line in wrap(text, size, max_w) {
            self.draw_line(&line, size, font, align);
        }
    }

    fn gap(&mut self, mm: f32) {
        self.cursor += mm;
    }

    fn image(&mut self, id: XObjectId, width_px: usize, height_px: usize) {
        let aspect = width_px as f32 / height_px.max(1) as f32;
        let (w, h) = if aspect > IMAGE_MAX_W / IMAGE_MAX_H {
            (IMAGE_MAX_W, IMAGE_MAX_W / aspect)
        } else {
            (IMAGE_MAX_H * aspect, IMAGE_MAX_H)
        };
        self.ensure_room(h);
        let x = (PAGE_W - w) / 2.0;
        let bottom = PAGE_H - self.cursor - h;
        // Natural size at `dpi` is width_px / dpi inches; pick dpi so that equals `w`.
        let dpi = width_px as f32 * 25.4 / w;
        self.ops.push(Op::UseXobject {
            id,
            transform: XObjectTransform {
                translate_x: Some(Mm(x).into()),
                translate_y: Some(Mm(bottom).into()),
                dpi: Some(dpi),
                ..Default::default()
            },
        });
        self.cursor += h;
    }

    fn finish(mut self) -> Vec<PdfPage> {
        self.break_page();
        self.pages
    }
}

fn text_ops(text: &str, size: f32, font: BuiltinFont, x: f32, y: f32) -> Vec<Op> {
    vec![
        Op::StartTextSection,
        Op::SetTextCursor {
            pos: Point::new(Mm(x), Mm(y)),
        },
        Op::SetFontSizeBuiltinFont {
            size: Pt(size),
            font,
        },
        Op::WriteTextBuiltinFont {
            items: vec![TextItem::Text(text.to_string())],
            font,
        },
        Op::EndTextSection,
    ]
}

fn footer_ops(page_number: usize) -> Vec<Op> {
    let mut ops = Vec::new();
    let label = format!("Page {}", page_number);
    let centered = |t: &str, size: f32| ((PAGE_W - Composer::text_width(t, size)) / 2.0).max(MARGIN);

    ops.extend(text_ops(&label, 8.0, BuiltinFont::Helvetica, centered(&label, 8.0), 22.0));
    let mut y = 17.0;
    for line in wrap(FOOTNOTE, 8.0, PAGE_W - 2.0 * MARGIN) {
        ops.extend(text_ops(&line, 8.0, BuiltinFont::Helvetica, centered(&line, 8.0), y));
        y -= 4.0;
    }
    ops
}

/// Greedy word wrap using the average glyph width. Paragraph breaks
/// (`\n\n`) become empty lines.
fn wrap(text: &str, size: f32, max_w: f32) -> Vec<String> {
    let max_chars = ((max_w / (size * AVG_GLYPH * PT_TO_MM)) as usize).max(1);
    let mut lines = Vec::new();

    for (i, para) in text.split("\n\n").enumerate() {
        if i > 0 {
            lines.push(String::new());
        }
        let mut line = String::new();
        for word in para.split_whitespace() {
            let needed = if line.is_empty() { word.chars().count() } else { line.chars().count() + 1 + word.chars().count() };
            if needed > max_chars && !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
        }
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

fn load_image(path: &Path) -> Result<RawImage> {
    let bytes = std::fs::read(path).map_err(|e| ScrapeError::Render(format!("{}: {}", path.display(), e)))?;
    let rgb = image::load_from_memory(&bytes)
        .map_err(|e| ScrapeError::Render(format!("{}: {}", path.display(), e)))?
        .to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    Ok(RawImage {
        pixels: RawImageData::U8(rgb.into_raw()),
        width,
        height,
        data_format: RawImageFormat::RGB8,
        tag: Vec::new(),
    })
}

/// Compose the PDF bytes for an article. Fails if any stored image cannot
/// be decoded.
pub fn compose(record: &ArticleRecord, assets: &[ImageAsset]) -> Result<Vec<u8>> {
    let title = clean_text(&record.title);
    let mut doc = PdfDocument::new(&title);
    let mut page = Composer::new();

    page.draw_line(MASTHEAD, 20.0, BuiltinFont::HelveticaBold, Align::Center);
    page.gap(8.0);
    page.paragraph(&title, 16.0, BuiltinFont::HelveticaBold, Align::Center);
    page.gap(4.0);

    let author = record
        .author
        .as_deref()
        .map(clean_text)
        .unwrap_or_else(|| "Unknown Author".to_string());
    page.draw_line(&format!("By {}", author), 12.0, BuiltinFont::Helvetica, Align::Center);
    page.draw_line(
        &record.published.format("%B %d, %Y").to_string(),
        12.0,
        BuiltinFont::Helvetica,
        Align::Center,
    );
    page.gap(8.0);

    if let Some(subtitle) = &record.subtitle {
        page.paragraph(&clean_text(subtitle), 12.0, BuiltinFont::HelveticaOblique, Align::Center);
        page.gap(8.0);
    }

    for asset in assets {
        let raw = load_image(&asset.local_path)?;
        let (w, h) = (raw.width, raw.height);
        let id = doc.add_image(&raw);
        page.image(id, w, h);
        page.gap(3.0);
        if let Some(caption) = &asset.caption {
            page.paragraph(&clean_text(caption), 10.0, BuiltinFont::HelveticaOblique, Align::Center);
        }
        page.gap(6.0);
    }

    page.paragraph(&clean_text(&record.body), 12.0, BuiltinFont::Helvetica, Align::Left);

    let mut warnings = Vec::new();
    let bytes = doc
        .with_pages(page.finish())
        .save(&PdfSaveOptions::default(), &mut warnings);
    if !warnings.is_empty() {
        warn!(count = warnings.len(), "PDF generation produced warnings");
    }
    Ok(bytes)
}

/// Writes `pdfs/<stem>.pdf` for articles long enough to render.
#[derive(Debug, Clone)]
pub struct Renderer {
    pdf_dir: PathBuf,
}

impl Renderer {
    pub fn new(pdf_dir: impl Into<PathBuf>) -> Self {
        Self {
            pdf_dir: pdf_dir.into(),
        }
    }

    pub fn pdf_path(&self, record: &ArticleRecord) -> PathBuf {
        self.pdf_dir.join(format!("{}.pdf", record.file_stem()))
    }

    /// Render the article, or skip it when the body is too short.
    ///
    /// # Arguments
    ///
    /// * `record` - The accepted article
    /// * `assets` - Its stored images, drawn in order with their captions
    ///
    /// # Returns
    ///
    /// [`RenderOutcome::Rendered`] with the PDF path, or
    /// [`RenderOutcome::Skipped`] for short bodies and compose failures
    /// (e.g. an image that no longer decodes).
    ///
    /// # Errors
    ///
    /// [`ScrapeError::Filesystem`] if the PDF cannot be written.
    #[instrument(level = "info", skip_all, fields(url = %record.url))]
    pub async fn render(&self, record: &ArticleRecord, assets: &[ImageAsset]) -> Result<RenderOutcome> {
        let words = record.word_count();
        if words < MIN_WORDS {
            info!(words, min = MIN_WORDS, "Skipping PDF; body too short");
            return Ok(RenderOutcome::Skipped(SkipReason::TooShort { words }));
        }

        let bytes = match compose(record, assets) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "PDF rendering failed; keeping JSON only");
                return Ok(RenderOutcome::Skipped(SkipReason::Failed(e.to_string())));
            }
        };

        let path = self.pdf_path(record);
        if let Err(e) = write_atomic(&path, &bytes).await {
            error!(path = %path.display(), error = %e, "Cannot write PDF");
            return Err(e);
        }
        info!(path = %path.display(), words, images = assets.len(), "Rendered PDF");
        Ok(RenderOutcome::Rendered(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::{normalize, testing::png};
    use crate::models::fixtures::record;

    const URL: &str = "https://home.dartmouth.edu/news/2024/06/commencement-2024";

    fn stored_image(dir: &Path, name: &str, caption: &str) -> ImageAsset {
        let normalized = normalize(&png(64, 48, [30, 120, 60])).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, &normalized.jpeg).unwrap();
        ImageAsset {
            source_url: format!("https://home.dartmouth.edu/files/{}", name),
            local_path: path,
            fingerprint: normalized.fingerprint(),
            caption: Some(caption.to_string()),
            width: normalized.width,
            height: normalized.height,
        }
    }

    #[tokio::test]
    async fn test_pdf_iff_at_least_fifty_words() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Renderer::new(dir.path());

        for words in [0usize, 1, 49, 50, 51, 200] {
            let rec = record(&format!("{}-{}", URL, words), words, 2024, 6, 15);
            let outcome = renderer.render(&rec, &[]).await.unwrap();
            assert_eq!(outcome.is_rendered(), words >= MIN_WORDS, "words = {}", words);
            assert_eq!(renderer.pdf_path(&rec).exists(), words >= MIN_WORDS, "words = {}", words);
        }
    }

    #[tokio::test]
    async fn test_short_article_reports_word_count() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = Renderer::new(dir.path()).render(&record(URL, 49, 2024, 6, 15), &[]).await.unwrap();
        assert_eq!(outcome, RenderOutcome::Skipped(SkipReason::TooShort { words: 49 }));
    }

    #[tokio::test]
    async fn test_renders_images_with_captions() {
        let dir = tempfile::tempdir().unwrap();
        let assets = vec![
            stored_image(dir.path(), "a.jpg", "The Class of 2024 on the Green"),
            stored_image(dir.path(), "b.jpg", "Baker Tower"),
        ];
        let rec = record(URL, 200, 2024, 6, 15);
        let outcome = Renderer::new(dir.path()).render(&rec, &assets).await.unwrap();

        let RenderOutcome::Rendered(path) = outcome else {
            panic!("expected a PDF, got {:?}", outcome);
        };
        assert_eq!(path.file_name().unwrap().to_string_lossy(), format!("{}.pdf", rec.file_stem()));
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_corrupt_image_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut asset = stored_image(dir.path(), "bad.jpg", "Broken");
        std::fs::write(&asset.local_path, b"not a jpeg").unwrap();
        asset.caption = None;

        let rec = record(URL, 120, 2024, 6, 15);
        let renderer = Renderer::new(dir.path());
        let outcome = renderer.render(&rec, &[asset]).await.unwrap();

        assert!(matches!(outcome, RenderOutcome::Skipped(SkipReason::Failed(_))));
        assert!(!renderer.pdf_path(&rec).exists());
    }

    #[tokio::test]
    async fn test_unwritable_pdf_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("pdfs");
        std::fs::write(&blocked, b"not a directory").unwrap();

        let err = Renderer::new(&blocked)
            .render(&record(URL, 200, 2024, 6, 15), &[])
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_long_body_spans_pages() {
        let rec = record(URL, 3000, 2024, 6, 15);
        let bytes = compose(&rec, &[]).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn test_wrap_respects_width_and_paragraphs() {
        let text = format!("{}\n\nsecond paragraph", "lorem ipsum ".repeat(40));
        let lines = wrap(&text, 12.0, 170.0);
        let max_chars = (170.0 / (12.0 * AVG_GLYPH * PT_TO_MM)) as usize;
        assert!(lines.iter().all(|l| l.chars().count() <= max_chars));
        assert!(lines.contains(&String::new()));
        assert_eq!(lines.last().map(String::as_str), Some("second paragraph"));
    }

    #[test]
    fn test_wrap_keeps_overlong_word_on_its_own_line() {
        let word = "x".repeat(500);
        let lines = wrap(&format!("a {} b", word), 12.0, 170.0);
        assert_eq!(lines, vec!["a".to_string(), word, "b".to_string()]);
    }
}
