//! Attachment metadata for downloaded files.

use crate::error::NewsletterError;
use crate::sanitize::{file_format, sanitize_filename};
use crate::storage::StorageManager;
use std::path::{Path, PathBuf};

/// MIME type for a filename, by extension; `application/octet-stream` otherwise.
pub fn content_type_for(filename: &str) -> &'static str {
    match file_format(filename).to_ascii_lowercase().as_str() {
        "html" => "text/html",
        "txt" => "text/plain",
        "json" => "application/json",
        "xml" => "application/xml",
        "css" => "text/css",
        "js" => "application/javascript",
        _ => "application/octet-stream",
    }
}

/// A file's bytes plus everything needed to serve it as an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPayload {
    /// Sanitised last segment of the file id.
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl DownloadPayload {
    pub fn new(file_id: &str, bytes: Vec<u8>) -> Self {
        let filename = sanitize_filename(file_id);
        Self {
            content_type: content_type_for(&filename),
            filename,
            bytes,
        }
    }

    /// Download `file_id` through the manager.
    pub async fn fetch(manager: &StorageManager, file_id: &str) -> Result<Self, NewsletterError> {
        let bytes = manager.download(file_id).await?;
        Ok(Self::new(file_id, bytes))
    }

    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.filename)
    }

    /// Response headers, caching disabled.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Content-Type", self.content_type.to_string()),
            ("Content-Disposition", self.content_disposition()),
            ("Cache-Control", "no-cache, no-store, must-revalidate".to_string()),
            ("Pragma", "no-cache".to_string()),
            ("Expires", "0".to_string()),
        ]
    }

    /// Write the bytes to `target`, or to `target/filename` when it is a directory.
    pub async fn write_to(&self, target: &Path) -> Result<PathBuf, NewsletterError> {
        let path = if tokio::fs::metadata(target)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            target.join(&self.filename)
        } else {
            target.to_path_buf()
        };
        tokio::fs::write(&path, &self.bytes)
            .await
            .map_err(|e| NewsletterError::io(&path, e))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_table() {
        assert_eq!(content_type_for("a.HTML"), "text/html");
        assert_eq!(content_type_for("a.txt"), "text/plain");
        assert_eq!(content_type_for("a.json"), "application/json");
        assert_eq!(content_type_for("a.xml"), "application/xml");
        assert_eq!(content_type_for("a.css"), "text/css");
        assert_eq!(content_type_for("a.js"), "application/javascript");
        assert_eq!(content_type_for("a.htm"), "application/octet-stream");
        assert_eq!(content_type_for("README"), "application/octet-stream");
    }

    #[test]
    fn payload_uses_sanitised_last_segment() {
        let payload = DownloadPayload::new("newsletters/2026/October/Report%202024.html", b"x".to_vec());
        assert_eq!(payload.filename, "Report 2024.html");
        assert_eq!(payload.content_type, "text/html");
        assert_eq!(
            payload.content_disposition(),
            "attachment; filename=\"Report 2024.html\""
        );
    }

    #[test]
    fn headers_disable_caching() {
        let headers = DownloadPayload::new("a.json", vec![]).headers();
        let get = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("Content-Type"), Some("application/json"));
        assert_eq!(get("Cache-Control"), Some("no-cache, no-store, must-revalidate"));
        assert_eq!(get("Pragma"), Some("no-cache"));
        assert_eq!(get("Expires"), Some("0"));
    }

    #[tokio::test]
    async fn write_into_directory_uses_filename() {
        let dir = tempfile::TempDir::new().unwrap();
        let payload = DownloadPayload::new("x/Issue%201.html", b"<p/>".to_vec());
        let path = payload.write_to(dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("Issue 1.html"));
        assert_eq!(std::fs::read(path).unwrap(), b"<p/>");
    }
}
