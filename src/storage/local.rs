//! Local filesystem backend.
//!
//! ## Why several candidate names?
//!
//! Older uploads were written with their names still percent-encoded
//! (`Report%202024.html` on disk), while callers now hand us clean ids
//! (`Report 2024.html`) or encoded ones, depending on where the id came
//! from. Every lookup therefore tries, in order:
//!
//! 1. the raw id
//! 2. its percent-decoded form
//! 3. its re-encoded form
//! 4. its sanitised form
//! 5. the sanitised form re-encoded
//!
//! and, when none of those exist, scans the target directory for an entry
//! whose sanitised name equals the sanitised target. Directory entries are
//! scanned in name order so two legacy files that sanitise to the same name
//! resolve the same way on every filesystem.
//!
//! Every candidate goes through [`LocalStorage::safe_join`]. A raw id that
//! lands outside the storage root is rejected outright; a derived spelling
//! that does (decoding `%2F` can introduce `..`) is skipped.
//!
//! `save` only ever renames the file part: the canonical target keeps the
//! directory the file already lives in, so partitions are never moved.

use super::{
    iso_timestamp, month_partition, sort_newest_first, FileRecord, StorageBackend, StoredFile,
    UploadOutcome,
};
use crate::config::{StorageConfig, StorageKind};
use crate::error::NewsletterError;
use crate::sanitize::{
    file_format, percent_decode, percent_encode_path, sanitize_filename, sanitize_relative_path,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Files stored under a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    upload_folder: String,
    public_url_base: String,
}

impl LocalStorage {
    /// Open (creating if needed) a storage root.
    pub fn new(
        root: impl AsRef<Path>,
        upload_folder: impl Into<String>,
        public_url_base: impl Into<String>,
    ) -> Result<Self, NewsletterError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| NewsletterError::io(root, e))?;
        let root = root
            .canonicalize()
            .map_err(|e| NewsletterError::io(root, e))?;

        info!("Local storage root: {}", root.display());
        Ok(Self {
            root,
            upload_folder: upload_folder.into(),
            public_url_base: public_url_base.into(),
        })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, NewsletterError> {
        Self::new(
            &config.local_path,
            config.upload_folder.clone(),
            config.public_url_base.clone(),
        )
    }

    /// The canonical storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join `relative` onto the root, refusing anything that escapes it.
    ///
    /// Resolution is lexical: `..` pops a component and an absolute path
    /// replaces the root, so both are caught without touching the disk.
    pub fn safe_join(&self, relative: &str) -> Result<PathBuf, NewsletterError> {
        let joined = self.root.join(relative.replace('\\', "/"));

        let mut resolved = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::ParentDir => {
                    if !resolved.pop() {
                        return Err(outside(relative));
                    }
                }
                Component::CurDir => {}
                other => resolved.push(other.as_os_str()),
            }
        }

        if resolved == self.root || !resolved.starts_with(&self.root) {
            return Err(outside(relative));
        }
        Ok(resolved)
    }

    /// Storage key for an absolute path under the root.
    fn relative_id(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Find the on-disk file for `file_id`, trying every legacy spelling.
    async fn resolve_existing(&self, file_id: &str) -> Result<Option<PathBuf>, NewsletterError> {
        // The raw id comes first; if it escapes, so does the request.
        self.safe_join(file_id)?;

        let paths: Vec<PathBuf> = candidate_ids(file_id)
            .iter()
            .filter_map(|candidate| match self.safe_join(candidate) {
                Ok(path) => Some(path),
                Err(_) => {
                    debug!("Skipping candidate '{}' outside the root", candidate);
                    None
                }
            })
            .collect();

        for path in &paths {
            if is_file(path).await {
                debug!("Resolved '{}' → {}", file_id, path.display());
                return Ok(Some(path.clone()));
            }
        }

        let target = sanitize_filename(file_id);
        let mut scanned: Vec<&Path> = Vec::new();
        for path in &paths {
            let Some(dir) = path.parent() else { continue };
            if scanned.contains(&dir) {
                continue;
            }
            scanned.push(dir);

            if let Some(found) = scan_for_sanitized(dir, &target).await {
                debug!(
                    "Resolved '{}' by directory scan → {}",
                    file_id,
                    found.display()
                );
                return Ok(Some(found));
            }
        }

        Ok(None)
    }

    /// Remove now-empty directories from `dir` upward, stopping at the root.
    async fn prune_empty_parents(&self, dir: Option<&Path>) {
        let mut current = dir.map(Path::to_path_buf);
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if tokio::fs::remove_dir(&dir).await.is_err() {
                // Not empty (or already gone); either way we are done.
                break;
            }
            debug!("Removed empty directory {}", dir.display());
            current = dir.parent().map(Path::to_path_buf);
        }
    }

    async fn try_upload(&self, content: &[u8], filename: &str) -> Result<StoredFile, NewsletterError> {
        let display_name = sanitize_filename(filename);
        let partition = month_partition(&self.upload_folder, Utc::now());
        let file_id = format!("{partition}/{display_name}");
        let path = self.safe_join(&file_id)?;

        write_file(&path, content).await?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| NewsletterError::io(&path, e))?;

        info!("Uploaded '{}' ({} bytes)", file_id, meta.len());
        Ok(StoredFile {
            url: self.file_url(&file_id),
            size: meta.len(),
            created_at: iso_timestamp(created_time(&meta)),
            format: file_format(&display_name),
            display_name,
            file_id,
        })
    }

    async fn try_save(&self, file_id: &str, content: &[u8]) -> Result<(), NewsletterError> {
        let existing = self.resolve_existing(file_id).await?;
        let canonical = match &existing {
            Some(found) => found.with_file_name(sanitize_filename(file_id)),
            None => self.safe_join(&canonical_id(file_id))?,
        };

        write_file(&canonical, content).await?;

        if let Some(legacy) = existing {
            if legacy != canonical && !same_file(&legacy, &canonical).await {
                match tokio::fs::remove_file(&legacy).await {
                    Ok(()) => info!(
                        "Migrated legacy file {} → {}",
                        legacy.display(),
                        canonical.display()
                    ),
                    Err(e) => warn!(
                        "Saved '{}' but could not remove legacy file {}: {}",
                        file_id,
                        legacy.display(),
                        e
                    ),
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    async fn upload(&self, content: &[u8], filename: &str) -> UploadOutcome {
        match self.try_upload(content, filename).await {
            Ok(file) => UploadOutcome::stored(file),
            Err(e) => {
                error!(operation = "upload", filename, "Local upload failed: {}", e);
                UploadOutcome::failed(e.to_string())
            }
        }
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, NewsletterError> {
        let Some(path) = self.resolve_existing(file_id).await? else {
            return Err(NewsletterError::NotFound {
                file_id: file_id.to_string(),
            });
        };
        tokio::fs::read(&path)
            .await
            .map_err(|e| NewsletterError::io(&path, e))
    }

    async fn delete(&self, file_id: &str) -> bool {
        let path = match self.resolve_existing(file_id).await {
            Ok(Some(path)) => path,
            Ok(None) => {
                debug!("Delete of missing file '{}'", file_id);
                return false;
            }
            Err(e) => {
                error!(operation = "delete", file_id, "Local delete failed: {}", e);
                return false;
            }
        };

        if let Err(e) = tokio::fs::remove_file(&path).await {
            error!(operation = "delete", file_id, "Local delete failed: {}", e);
            return false;
        }
        self.prune_empty_parents(path.parent()).await;
        info!("Deleted '{}'", file_id);
        true
    }

    async fn save(&self, file_id: &str, content: &[u8]) -> bool {
        match self.try_save(file_id, content).await {
            Ok(()) => true,
            Err(e) => {
                error!(operation = "save", file_id, "Local save failed: {}", e);
                false
            }
        }
    }

    async fn list(&self, prefix: &str) -> Vec<FileRecord> {
        let prefix = prefix.trim_matches('/');
        let base = if prefix.is_empty() {
            self.root.clone()
        } else {
            match self.safe_join(prefix) {
                Ok(p) => p,
                Err(e) => {
                    warn!(operation = "list", prefix, "Rejected list prefix: {}", e);
                    return Vec::new();
                }
            }
        };

        let this = self.clone();
        let walked = tokio::task::spawn_blocking(move || this.walk(&base)).await;
        match walked {
            Ok(files) => files,
            Err(e) => {
                error!(operation = "list", prefix, "List task panicked: {}", e);
                Vec::new()
            }
        }
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("{}/{}", self.public_url_base, percent_encode_path(file_id))
    }
}

impl LocalStorage {
    /// Blocking walk of `base`, newest first.
    fn walk(&self, base: &Path) -> Vec<FileRecord> {
        if !base.exists() {
            return Vec::new();
        }

        let mut files: Vec<FileRecord> = WalkDir::new(base)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                let filename = entry.file_name().to_string_lossy().into_owned();
                let public_id = self.relative_id(entry.path());
                Some(FileRecord {
                    secure_url: self.file_url(&public_id),
                    display_name: sanitize_filename(&filename),
                    format: file_format(&filename),
                    size: meta.len(),
                    created_at: iso_timestamp(created_time(&meta)),
                    filename,
                    public_id,
                })
            })
            .collect();

        sort_newest_first(&mut files);
        files
    }
}

/// The five candidate spellings of `file_id`, de-duplicated in order.
fn candidate_ids(file_id: &str) -> Vec<String> {
    let decoded = percent_decode(file_id);
    let encoded = percent_encode_path(&decoded);
    let sanitized = sanitize_relative_path(file_id);
    let sanitized_encoded = percent_encode_path(&sanitized);

    let mut out: Vec<String> = Vec::with_capacity(5);
    for candidate in [file_id.to_string(), decoded, encoded, sanitized, sanitized_encoded] {
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

/// `file_id` with its directory percent-decoded and its filename sanitised.
///
/// Directory names are left as they are otherwise, so a key stored under
/// `news.v2/…` is saved back under `news.v2/…`.
fn canonical_id(file_id: &str) -> String {
    let normalised = file_id.replace('\\', "/");
    let name = sanitize_filename(&normalised);
    match normalised.rsplit_once('/') {
        Some((dir, _)) if !dir.trim_matches('/').is_empty() => {
            format!("{}/{}", percent_decode(dir.trim_matches('/')), name)
        }
        _ => name,
    }
}

/// First entry of `dir` (in name order) whose sanitised name is `target`.
async fn scan_for_sanitized(dir: &Path, target: &str) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut names = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            names.push(entry.file_name());
        }
    }
    names.sort();

    names
        .into_iter()
        .find(|name| sanitize_filename(&name.to_string_lossy()) == target)
        .map(|name| dir.join(name))
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

async fn write_file(path: &Path, content: &[u8]) -> Result<(), NewsletterError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| NewsletterError::io(parent, e))?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|e| NewsletterError::io(path, e))
}

/// Creation time where the filesystem records it, modification time otherwise.
fn created_time(meta: &Metadata) -> DateTime<Utc> {
    meta.created()
        .or_else(|_| meta.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

fn outside(relative: &str) -> NewsletterError {
    NewsletterError::PathOutsideRoot {
        path: relative.to_string(),
    }
}
