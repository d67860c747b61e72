//! Storage backends for newsletter files.
//!
//! Two interchangeable implementations sit behind [`StorageBackend`]:
//!
//! ```text
//!                    ┌──────────────┐
//!   caller ────────▶ │StorageManager│ ── list cache (TTL, one mutex)
//!                    └──────┬───────┘
//!                           │ Arc<dyn StorageBackend>
//!              ┌────────────┴────────────┐
//!        LocalStorage              CloudinaryStorage
//!   (safe join, legacy names)     (signed REST calls)
//! ```
//!
//! Both backends share the upload policy: the sanitised filename is stored
//! under a `{folder}/{year}/{MonthName}` partition and re-uploading the same
//! name overwrites the existing file.

pub mod cache;
pub mod cloud;
pub mod local;
pub mod manager;

use crate::config::StorageKind;
use crate::error::NewsletterError;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub use cache::ListCache;
pub use cloud::CloudinaryStorage;
pub use local::LocalStorage;
pub use manager::StorageManager;

/// One stored file, as returned by `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Storage key, a `/`-separated relative path.
    pub public_id: String,
    /// Last segment of the key, as stored.
    pub filename: String,
    /// Sanitised name for display.
    pub display_name: String,
    /// Size in bytes.
    pub size: u64,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
    /// Extension without the dot.
    pub format: String,
    /// Where the file can be fetched from.
    pub secure_url: String,
}

/// Metadata for a file that was just uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub file_id: String,
    pub url: String,
    pub size: u64,
    pub created_at: String,
    pub format: String,
    pub display_name: String,
}

/// Result of an upload: either the stored file or the reason it failed.
///
/// Serialises to `{"success": true, "file_id": …}` or
/// `{"success": false, "error": "…"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub success: bool,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub file: Option<StoredFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadOutcome {
    pub fn stored(file: StoredFile) -> Self {
        Self {
            success: true,
            file: Some(file),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            file: None,
            error: Some(error.into()),
        }
    }

    /// Convert into a `Result`, for callers that prefer `?`.
    pub fn into_result(self) -> Result<StoredFile, String> {
        match (self.file, self.error) {
            (Some(file), _) if self.success => Ok(file),
            (_, Some(error)) => Err(error),
            _ => Err("upload failed".to_string()),
        }
    }
}

/// The capability set every storage backend provides.
///
/// Mutating calls report success as `bool` and log their own failures;
/// only `download` surfaces an error, because there is nothing sensible to
/// return in its place.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Which backend this is; the list cache is scoped by it.
    fn kind(&self) -> StorageKind;

    /// Store `content` under the current month partition with a sanitised name.
    async fn upload(&self, content: &[u8], filename: &str) -> UploadOutcome;

    /// Fetch a file's bytes.
    async fn download(&self, file_id: &str) -> Result<Vec<u8>, NewsletterError>;

    /// Remove a file. `false` when absent or on failure.
    async fn delete(&self, file_id: &str) -> bool;

    /// Create or overwrite a file.
    async fn save(&self, file_id: &str, content: &[u8]) -> bool;

    /// Files under `prefix`, newest first. Failures yield an empty list.
    async fn list(&self, prefix: &str) -> Vec<FileRecord>;

    /// Public or access URL for a file.
    fn file_url(&self, file_id: &str) -> String;
}

/// Partition for uploads made at `now`: `{folder}/{year}/{MonthName}`.
pub fn month_partition(folder: &str, now: DateTime<Utc>) -> String {
    let month = now.format("%B");
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        format!("{}/{}", now.year(), month)
    } else {
        format!("{}/{}/{}", folder, now.year(), month)
    }
}

/// ISO-8601 timestamp with microseconds, sortable as a string.
pub(crate) fn iso_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Newest first; ties broken by key so the order is stable.
pub(crate) fn sort_newest_first(files: &mut [FileRecord]) {
    files.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.public_id.cmp(&b.public_id))
    });
}
