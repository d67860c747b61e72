//! # newsletter-store
//!
//! Store HTML newsletters on the local filesystem or in Cloudinary, and turn
//! them into single-page PDFs through a remote headless browser.
//!
//! ## Storage
//!
//! ```text
//! upload("Report%202024.html")
//!  │
//!  ├─ 1. Sanitise   "Report 2024.html"
//!  ├─ 2. Partition  newsletters/{year}/{MonthName}/
//!  ├─ 3. Backend    local (safe join) | cloudinary (signed REST)
//!  └─ 4. Cache      per-backend list cache invalidated on every write
//! ```
//!
//! Local storage also resolves files written by older versions under their
//! percent-encoded names, and migrates them to the clean name on `save`.
//!
//! ## Conversion
//!
//! ```text
//! HTML ─▶ inject CSS ─▶ screenshot (PNG) ─▶ scale onto page ─▶ PDF
//! ```
//!
//! The page is never split: a tall newsletter produces one tall page.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use newsletter_store::{StorageConfig, StorageKind, StorageManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StorageConfig::builder()
//!         .kind(StorageKind::Local)
//!         .local_path("static/files")
//!         .build()?;
//!     let storage = StorageManager::new(&config)?;
//!
//!     let stored = storage.upload(b"<p>Hello</p>", "Report%202024.html").await.into_result()?;
//!     println!("{} → {}", stored.file_id, stored.url);
//!
//!     for file in storage.list_files("newsletters/").await {
//!         println!("{}  {}", file.created_at, file.display_name);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `newsletter` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! newsletter-store = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cleanup;
pub mod config;
pub mod convert;
pub mod download;
pub mod error;
pub mod options;
pub mod pipeline;
pub mod sanitize;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cleanup::{cleanup_directory, CleanupStats};
pub use config::{
    CloudinaryCredentials, ConversionConfig, ConversionConfigBuilder, ScreenshotConfig,
    StorageConfig, StorageConfigBuilder, StorageKind, UploadPolicy,
};
pub use convert::{convert_file, html_to_pdf, pdf_download_name, ConvertedPdf};
pub use download::{content_type_for, DownloadPayload};
pub use error::NewsletterError;
pub use options::conversion_config_from_options;
pub use pipeline::screenshot::ScreenshotClient;
pub use sanitize::{sanitize_filename, sanitize_relative_path};
pub use storage::{
    FileRecord, ListCache, StorageBackend, StorageManager, StoredFile, UploadOutcome,
};
