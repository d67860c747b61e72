//! Backend selection plus the list cache.

use super::{CloudinaryStorage, FileRecord, ListCache, LocalStorage, StorageBackend, UploadOutcome};
use crate::config::{StorageConfig, StorageKind};
use crate::error::NewsletterError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// The one storage entry point callers hold for the life of the process.
///
/// Every mutating call invalidates the cached listings of the active
/// backend, whatever its outcome; `list_files` serves from the cache while
/// an entry is younger than the TTL.
#[derive(Clone)]
pub struct StorageManager {
    backend: Arc<dyn StorageBackend>,
    cache: Arc<ListCache>,
}

impl StorageManager {
    /// Construct the backend named by `config.kind`.
    pub fn new(config: &StorageConfig) -> Result<Self, NewsletterError> {
        config.validate()?;
        let backend: Arc<dyn StorageBackend> = match config.kind {
            StorageKind::Local => Arc::new(LocalStorage::from_config(config)?),
            StorageKind::Cloudinary => Arc::new(CloudinaryStorage::from_config(config)?),
        };
        info!(
            "Storage backend: {} (list cache TTL {}s)",
            config.kind, config.cache_ttl_secs
        );
        Ok(Self::with_backend(
            backend,
            Duration::from_secs(config.cache_ttl_secs),
        ))
    }

    /// Wrap an already-built backend.
    pub fn with_backend(backend: Arc<dyn StorageBackend>, cache_ttl: Duration) -> Self {
        Self {
            backend,
            cache: Arc::new(ListCache::new(cache_ttl)),
        }
    }

    pub fn kind(&self) -> StorageKind {
        self.backend.kind()
    }

    pub fn cache(&self) -> &ListCache {
        &self.cache
    }

    pub async fn upload(&self, content: &[u8], filename: &str) -> UploadOutcome {
        let outcome = self.backend.upload(content, filename).await;
        self.invalidate();
        outcome
    }

    pub async fn download(&self, file_id: &str) -> Result<Vec<u8>, NewsletterError> {
        self.backend.download(file_id).await
    }

    pub async fn delete(&self, file_id: &str) -> bool {
        let deleted = self.backend.delete(file_id).await;
        self.invalidate();
        deleted
    }

    pub async fn save(&self, file_id: &str, content: &[u8]) -> bool {
        let saved = self.backend.save(file_id, content).await;
        self.invalidate();
        saved
    }

    /// Files under `prefix`, newest first, cached for the configured TTL.
    pub async fn list_files(&self, prefix: &str) -> Vec<FileRecord> {
        let kind = self.kind();
        if let Some(files) = self.cache.get(kind, prefix) {
            return files;
        }

        // The lock is not held here; concurrent misses may both call through.
        // A mutation finishing while we wait bumps the generation and the
        // insert below is dropped.
        let generation = self.cache.generation(kind);
        let files = self.backend.list(prefix).await;
        debug!("Listed {} file(s) under '{}'", files.len(), prefix);
        self.cache.insert(kind, prefix, files.clone(), generation);
        files
    }

    pub fn file_url(&self, file_id: &str) -> String {
        self.backend.file_url(file_id)
    }

    fn invalidate(&self) {
        self.cache.invalidate(self.kind());
    }
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("kind", &self.kind())
            .field("cache_ttl", &self.cache.ttl())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoredFile;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct CountingBackend {
        lists: AtomicUsize,
    }

    #[async_trait]
    impl StorageBackend for CountingBackend {
        fn kind(&self) -> StorageKind {
            StorageKind::Local
        }

        async fn upload(&self, content: &[u8], filename: &str) -> UploadOutcome {
            UploadOutcome::stored(StoredFile {
                file_id: format!("x/{filename}"),
                url: String::new(),
                size: content.len() as u64,
                created_at: String::new(),
                format: "html".into(),
                display_name: filename.into(),
            })
        }

        async fn download(&self, file_id: &str) -> Result<Vec<u8>, NewsletterError> {
            Err(NewsletterError::NotFound {
                file_id: file_id.into(),
            })
        }

        async fn delete(&self, _file_id: &str) -> bool {
            true
        }

        async fn save(&self, _file_id: &str, _content: &[u8]) -> bool {
            true
        }

        async fn list(&self, prefix: &str) -> Vec<FileRecord> {
            let n = self.lists.fetch_add(1, Ordering::SeqCst);
            vec![FileRecord {
                public_id: format!("{prefix}{n}"),
                filename: n.to_string(),
                display_name: n.to_string(),
                size: 0,
                created_at: String::new(),
                format: String::new(),
                secure_url: String::new(),
            }]
        }

        fn file_url(&self, file_id: &str) -> String {
            format!("/files/{file_id}")
        }
    }

    fn manager(ttl: u64) -> (StorageManager, Arc<CountingBackend>) {
        let backend = Arc::new(CountingBackend::default());
        let manager = StorageManager::with_backend(backend.clone(), Duration::from_secs(ttl));
        (manager, backend)
    }

    #[tokio::test]
    async fn second_list_within_ttl_is_cached() {
        let (manager, backend) = manager(120);
        let first = manager.list_files("x").await;
        let second = manager.list_files("x").await;
        assert_eq!(first, second);
        assert_eq!(backend.lists.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn every_mutation_forces_a_fresh_list() {
        let (manager, backend) = manager(120);
        manager.list_files("x").await;

        assert!(manager.save("x/a.html", b"1").await);
        manager.list_files("x").await;
        assert_eq!(backend.lists.load(Ordering::SeqCst), 2);

        assert!(manager.upload(b"1", "b.html").await.success);
        manager.list_files("x").await;
        assert_eq!(backend.lists.load(Ordering::SeqCst), 3);

        assert!(manager.delete("x/a.html").await);
        manager.list_files("x").await;
        assert_eq!(backend.lists.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn prefixes_are_cached_separately() {
        let (manager, backend) = manager(120);
        manager.list_files("").await;
        manager.list_files("a/").await;
        manager.list_files("").await;
        assert_eq!(backend.lists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_ttl_always_calls_through() {
        let (manager, backend) = manager(0);
        manager.list_files("x").await;
        manager.list_files("x").await;
        assert_eq!(backend.lists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn download_errors_pass_through() {
        let (manager, _) = manager(120);
        assert!(manager.download("nope").await.unwrap_err().is_not_found());
        assert_eq!(manager.file_url("a b"), "/files/a b");
    }

    /// Holds its first `list` call open until released; `save` bumps the
    /// version every later listing reports.
    #[derive(Default)]
    struct GatedBackend {
        version: AtomicUsize,
        held: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl StorageBackend for GatedBackend {
        fn kind(&self) -> StorageKind {
            StorageKind::Local
        }

        async fn upload(&self, _content: &[u8], _filename: &str) -> UploadOutcome {
            self.version.fetch_add(1, Ordering::SeqCst);
            UploadOutcome::failed("not stored")
        }

        async fn download(&self, file_id: &str) -> Result<Vec<u8>, NewsletterError> {
            Err(NewsletterError::NotFound {
                file_id: file_id.into(),
            })
        }

        async fn delete(&self, _file_id: &str) -> bool {
            self.version.fetch_add(1, Ordering::SeqCst);
            true
        }

        async fn save(&self, _file_id: &str, _content: &[u8]) -> bool {
            self.version.fetch_add(1, Ordering::SeqCst);
            true
        }

        async fn list(&self, _prefix: &str) -> Vec<FileRecord> {
            let version = self.version.load(Ordering::SeqCst);
            if !self.held.swap(true, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            vec![FileRecord {
                public_id: format!("v{version}"),
                filename: String::new(),
                display_name: String::new(),
                size: 0,
                created_at: String::new(),
                format: String::new(),
                secure_url: String::new(),
            }]
        }

        fn file_url(&self, file_id: &str) -> String {
            file_id.to_string()
        }
    }

    #[tokio::test]
    async fn save_during_an_in_flight_list_is_not_masked_by_the_cache() {
        let backend = Arc::new(GatedBackend::default());
        let manager = StorageManager::with_backend(backend.clone(), Duration::from_secs(120));

        let in_flight = tokio::spawn({
            let manager = manager.clone();
            async move { manager.list_files("x").await }
        });
        backend.entered.notified().await;

        assert!(manager.save("x/a.html", b"edited").await);
        backend.release.notify_one();

        // The listing that started first still reports what it saw.
        let stale = in_flight.await.unwrap();
        assert_eq!(stale[0].public_id, "v0");

        let after = manager.list_files("x").await;
        assert_eq!(after[0].public_id, "v1");
        assert_eq!(manager.list_files("x").await, after, "fresh listing is cached");
    }

    #[tokio::test]
    async fn delete_during_an_in_flight_list_is_not_masked_by_the_cache() {
        let backend = Arc::new(GatedBackend::default());
        let manager = StorageManager::with_backend(backend.clone(), Duration::from_secs(120));

        let in_flight = tokio::spawn({
            let manager = manager.clone();
            async move { manager.list_files("").await }
        });
        backend.entered.notified().await;
        assert!(manager.delete("x/a.html").await);
        backend.release.notify_one();
        in_flight.await.unwrap();

        assert_eq!(manager.list_files("").await[0].public_id, "v1");
    }

    #[test]
    fn local_backend_selected_from_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = StorageConfig::builder()
            .kind(StorageKind::Local)
            .local_path(dir.path())
            .build()
            .unwrap();
        let manager = StorageManager::new(&config).unwrap();
        assert_eq!(manager.kind(), StorageKind::Local);
    }

    #[test]
    fn cloud_without_credentials_fails_at_construction() {
        let config = StorageConfig {
            kind: StorageKind::Cloudinary,
            ..Default::default()
        };
        let err = StorageManager::new(&config).unwrap_err();
        assert!(matches!(err, NewsletterError::MissingCredentials { .. }));
    }
}
