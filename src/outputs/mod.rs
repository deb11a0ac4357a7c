//! Output writers.
//!
//! - [`json`]: one JSON record per accepted article
//!
//! PDFs are written by [`crate::render`]; images by [`crate::images`].
//!
//! ```text
//! output_dir/
//! ├── json/     # every accepted article
//! ├── pdfs/     # articles with at least 50 body words
//! └── images/   # deduplicated by content fingerprint
//! ```

pub mod json;
