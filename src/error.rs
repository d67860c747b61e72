//! Error types for the newsletter-store library.
//!
//! A single enum covers the whole crate, grouped by the layer that fails:
//!
//! * **Storage**: a file could not be found after every candidate name was
//!   tried, or a key tried to escape the storage root.
//! * **Configuration**: fatal at construction time, never retried.
//! * **Validation**: rejected before any I/O happens.
//! * **Remote service**: the screenshot service or Cloudinary failed.
//! * **Rendering / I/O**: image decoding, PDF encoding, local writes.
//!
//! Mutating storage calls (`delete`, `save`) deliberately do not return this
//! type: they log the error and report a `bool` so callers must check it.
//! `download` returns `Err` because there is no sensible empty value.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the newsletter-store library.
#[derive(Debug, Error)]
pub enum NewsletterError {
    // ── Storage errors ────────────────────────────────────────────────────
    /// No stored file matched the id, even after trying every legacy spelling.
    #[error("File not found: '{file_id}'")]
    NotFound { file_id: String },

    /// A storage key resolved to a path outside the configured root.
    #[error("Path '{path}' resolves outside the storage root")]
    PathOutsideRoot { path: String },

    /// A Cloudinary API call failed (network error or non-2xx response).
    #[error("Cloud storage {operation} failed for '{file_id}': {detail}")]
    RemoteStorage {
        operation: &'static str,
        file_id: String,
        detail: String,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or environment validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// `STORAGE_TYPE` named a backend we do not have.
    #[error("Unsupported storage type: '{value}'\nUse 'local' or 'cloudinary'.")]
    UnsupportedStorage { value: String },

    /// Cloud backend selected without its credentials.
    #[error(
        "Missing required Cloudinary credentials for cloudinary storage: {}.\n\
Either set these environment variables or change STORAGE_TYPE to 'local'.",
        missing.join(", ")
    )]
    MissingCredentials { missing: Vec<&'static str> },

    // ── Validation errors ─────────────────────────────────────────────────
    /// The upload had no usable filename.
    #[error("No file selected")]
    EmptyFilename,

    /// The file extension is not in the allowed set.
    #[error("Invalid file type '{filename}'. Supported: {allowed}")]
    DisallowedFileType { filename: String, allowed: String },

    /// The upload exceeds the configured content length limit.
    #[error("File is {size} bytes, larger than the {limit} byte limit")]
    FileTooLarge { size: u64, limit: u64 },

    // ── Remote screenshot errors ──────────────────────────────────────────
    /// No screenshot token configured; there is no fallback renderer.
    #[error(
        "BROWSERLESS_TOKEN is required for PDF generation.\n\
Set BROWSERLESS_TOKEN in your environment (a free token is available at https://www.browserless.io/)."
    )]
    ScreenshotTokenMissing,

    /// The screenshot service answered with a non-2xx status.
    #[error("Screenshot request returned {status}: {body}")]
    ScreenshotFailed { status: u16, body: String },

    /// The request never produced a response.
    #[error("Screenshot request failed: {reason}")]
    ScreenshotRequest { reason: String },

    /// The request exceeded the configured timeout.
    #[error("Screenshot request timed out after {secs}s")]
    ScreenshotTimeout { secs: u64 },

    // ── Rendering errors ──────────────────────────────────────────────────
    /// The screenshot bytes are not a decodable image.
    #[error("Could not decode screenshot image: {0}")]
    ImageDecode(String),

    /// Writing the PDF document failed.
    #[error("PDF encoding failed: {0}")]
    PdfEncode(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// A local file operation failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl NewsletterError {
    /// Wrap an `io::Error` with the path it happened on.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        NewsletterError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the "file absent" failure, which callers usually map to 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, NewsletterError::NotFound { .. })
    }

    /// True for failures that are the caller's fault and happen before any I/O.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            NewsletterError::EmptyFilename
                | NewsletterError::DisallowedFileType { .. }
                | NewsletterError::FileTooLarge { .. }
                | NewsletterError::PathOutsideRoot { .. }
        )
    }
}
