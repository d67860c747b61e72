//! One-off migration of legacy percent-encoded filenames.
//!
//! Walks a local storage tree and renames every file whose name contains
//! `%` to its sanitised form. Files are collected before any rename so the
//! walk never sees its own output.

use crate::error::NewsletterError;
use crate::sanitize::sanitize_filename;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Counters for one cleanup run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupStats {
    pub total_files: usize,
    /// Renamed, or that would be renamed in a dry run.
    pub renamed_files: usize,
    pub skipped: usize,
    pub errors: usize,
    /// `(from, to)` for every rename performed or planned.
    pub renames: Vec<(PathBuf, PathBuf)>,
}

/// Rename legacy files under `base`. With `dry_run` nothing is touched.
///
/// Blocking; call from `spawn_blocking` in async code.
pub fn cleanup_directory(base: &Path, dry_run: bool) -> Result<CleanupStats, NewsletterError> {
    if !base.is_dir() {
        return Err(NewsletterError::io(
            base,
            std::io::Error::new(std::io::ErrorKind::NotFound, "directory does not exist"),
        ));
    }

    info!(
        "Scanning {} ({})",
        base.display(),
        if dry_run { "dry run" } else { "live" }
    );

    let files: Vec<PathBuf> = WalkDir::new(base)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();

    let mut stats = CleanupStats {
        total_files: files.len(),
        ..Default::default()
    };

    for path in files {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if !name.contains('%') {
            continue;
        }

        let clean = sanitize_filename(&name);
        if clean == name {
            stats.skipped += 1;
            continue;
        }

        let target = path.with_file_name(&clean);
        if target.exists() {
            warn!("Skip (target exists): {} → {}", name, clean);
            stats.skipped += 1;
            continue;
        }

        if !dry_run {
            if let Err(e) = std::fs::rename(&path, &target) {
                warn!("Rename failed for {}: {}", path.display(), e);
                stats.errors += 1;
                continue;
            }
        }
        info!("{} → {}", name, clean);
        stats.renamed_files += 1;
        stats.renames.push((path, target));
    }

    info!(
        "Scanned {} file(s): {} renamed, {} skipped, {} error(s)",
        stats.total_files, stats.renamed_files, stats.skipped, stats.errors
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, rel: &str) -> PathBuf {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, rel).unwrap();
        path
    }

    #[test]
    fn renames_percent_encoded_names() {
        let dir = TempDir::new().unwrap();
        let legacy = touch(dir.path(), "newsletters/2025/May/Report%202024.html");
        touch(dir.path(), "newsletters/2025/May/clean.html");

        let stats = cleanup_directory(dir.path(), false).unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.renamed_files, 1);
        assert_eq!(stats.errors, 0);
        assert!(!legacy.exists());
        assert!(dir.path().join("newsletters/2025/May/Report 2024.html").exists());
    }

    #[test]
    fn dry_run_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let legacy = touch(dir.path(), "a/Spring%20Issue.html");

        let stats = cleanup_directory(dir.path(), true).unwrap();
        assert_eq!(stats.renamed_files, 1);
        assert_eq!(stats.renames.len(), 1);
        assert!(legacy.exists());
    }

    #[test]
    fn existing_target_is_skipped() {
        let dir = TempDir::new().unwrap();
        let legacy = touch(dir.path(), "a/Issue%201.html");
        touch(dir.path(), "a/Issue 1.html");

        let stats = cleanup_directory(dir.path(), false).unwrap();
        assert_eq!(stats.renamed_files, 0);
        assert_eq!(stats.skipped, 1);
        assert!(legacy.exists());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(cleanup_directory(&dir.path().join("nope"), false).is_err());
    }
}
