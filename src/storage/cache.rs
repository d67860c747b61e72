//! Time-bounded cache of `list` results.
//!
//! Entries are keyed by `(backend kind, prefix)`; an empty prefix is stored
//! under `/`. One mutex guards the whole map and is never held across an
//! await point, so concurrent readers may both miss and both refill.
//!
//! Each backend kind also carries a generation number that
//! [`ListCache::invalidate`] bumps. A caller reads it with
//! [`ListCache::generation`] before asking the backend for a listing and
//! hands it back to [`ListCache::insert`]; a listing fetched before an
//! invalidation is then discarded instead of outliving the mutation.

use super::FileRecord;
use crate::config::StorageKind;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// Key used for the whole-store listing.
const ROOT_KEY: &str = "/";

#[derive(Debug, Clone)]
struct CacheEntry {
    stored_at: Instant,
    files: Vec<FileRecord>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<(StorageKind, String), CacheEntry>,
    generations: HashMap<StorageKind, u64>,
}

impl State {
    fn generation(&self, kind: StorageKind) -> u64 {
        self.generations.get(&kind).copied().unwrap_or(0)
    }
}

/// Process-wide list cache.
#[derive(Debug)]
pub struct ListCache {
    ttl: Duration,
    state: Mutex<State>,
}

impl ListCache {
    /// A cache whose entries live for `ttl`. A zero TTL disables caching.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(State::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Cached files for `(kind, prefix)`, if present and fresh.
    pub fn get(&self, kind: StorageKind, prefix: &str) -> Option<Vec<FileRecord>> {
        self.get_at(kind, prefix, Instant::now())
    }

    /// Current generation of `kind`. Read it before fetching a listing.
    pub fn generation(&self, kind: StorageKind) -> u64 {
        self.lock().generation(kind)
    }

    /// Store a listing fetched while `kind` was at `generation`.
    ///
    /// Returns `false` (and stores nothing) when `kind` has been invalidated
    /// since, or when caching is disabled.
    pub fn insert(
        &self,
        kind: StorageKind,
        prefix: &str,
        files: Vec<FileRecord>,
        generation: u64,
    ) -> bool {
        self.insert_at(kind, prefix, files, generation, Instant::now())
    }

    pub(crate) fn get_at(
        &self,
        kind: StorageKind,
        prefix: &str,
        now: Instant,
    ) -> Option<Vec<FileRecord>> {
        if !self.is_enabled() {
            return None;
        }
        let mut state = self.lock();
        let key = (kind, cache_key(prefix));
        match state.entries.get(&key) {
            Some(entry) if now.saturating_duration_since(entry.stored_at) < self.ttl => {
                debug!("List cache hit for {}:{}", kind, key.1);
                Some(entry.files.clone())
            }
            Some(_) => {
                state.entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub(crate) fn insert_at(
        &self,
        kind: StorageKind,
        prefix: &str,
        files: Vec<FileRecord>,
        generation: u64,
        now: Instant,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut state = self.lock();
        let current = state.generation(kind);
        if current != generation {
            debug!(
                "Discarding {}:{} listing from generation {} (now {})",
                kind, prefix, generation, current
            );
            return false;
        }
        state.entries.insert(
            (kind, cache_key(prefix)),
            CacheEntry {
                stored_at: now,
                files,
            },
        );
        true
    }

    /// Drop every entry belonging to `kind` and start a new generation.
    pub fn invalidate(&self, kind: StorageKind) {
        let mut state = self.lock();
        *state.generations.entry(kind).or_insert(0) += 1;

        let before = state.entries.len();
        state.entries.retain(|(k, _), _| *k != kind);
        let dropped = before - state.entries.len();
        if dropped > 0 {
            debug!("Invalidated {} cached listing(s) for {}", dropped, kind);
        }
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while holding the lock leaves the map consistent, so keep using it.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn cache_key(prefix: &str) -> String {
    if prefix.is_empty() {
        ROOT_KEY.to_string()
    } else {
        prefix.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> FileRecord {
        FileRecord {
            public_id: id.into(),
            filename: id.into(),
            display_name: id.into(),
            size: 1,
            created_at: "2026-10-19T00:00:00.000000Z".into(),
            format: "html".into(),
            secure_url: String::new(),
        }
    }

    #[test]
    fn hit_within_ttl_and_miss_after() {
        let cache = ListCache::new(Duration::from_secs(120));
        let t0 = Instant::now();
        cache.insert_at(StorageKind::Local, "newsletters/", vec![record("a")], 0, t0);

        let hit = cache.get_at(StorageKind::Local, "newsletters/", t0 + Duration::from_secs(119));
        assert_eq!(hit.unwrap().len(), 1);

        let miss = cache.get_at(StorageKind::Local, "newsletters/", t0 + Duration::from_secs(120));
        assert!(miss.is_none());
        assert!(cache.is_empty(), "expired entry is evicted on read");
    }

    #[test]
    fn empty_prefix_uses_root_key() {
        let cache = ListCache::new(Duration::from_secs(60));
        cache.insert(StorageKind::Local, "", vec![record("a")], 0);
        assert!(cache.get(StorageKind::Local, "").is_some());
        assert!(cache.get(StorageKind::Local, "/").is_some());
    }

    #[test]
    fn keys_are_scoped_by_kind() {
        let cache = ListCache::new(Duration::from_secs(60));
        cache.insert(StorageKind::Local, "x", vec![record("local")], 0);
        assert!(cache.get(StorageKind::Cloudinary, "x").is_none());
    }

    #[test]
    fn invalidate_drops_only_that_kind() {
        let cache = ListCache::new(Duration::from_secs(60));
        cache.insert(StorageKind::Local, "a", vec![], 0);
        cache.insert(StorageKind::Local, "b", vec![], 0);
        cache.insert(StorageKind::Cloudinary, "a", vec![], 0);

        cache.invalidate(StorageKind::Local);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(StorageKind::Cloudinary, "a").is_some());
    }

    #[test]
    fn zero_ttl_disables_caching() {
        let cache = ListCache::new(Duration::ZERO);
        assert!(!cache.insert(StorageKind::Local, "a", vec![record("a")], 0));
        assert!(cache.get(StorageKind::Local, "a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn listing_from_before_an_invalidation_is_discarded() {
        let cache = ListCache::new(Duration::from_secs(60));
        let generation = cache.generation(StorageKind::Local);

        cache.invalidate(StorageKind::Local);
        assert!(!cache.insert(StorageKind::Local, "x", vec![record("stale")], generation));
        assert!(cache.get(StorageKind::Local, "x").is_none());

        let fresh = cache.generation(StorageKind::Local);
        assert_eq!(fresh, generation + 1);
        assert!(cache.insert(StorageKind::Local, "x", vec![record("fresh")], fresh));
        assert_eq!(cache.get(StorageKind::Local, "x").unwrap()[0].public_id, "fresh");
    }

    #[test]
    fn generations_are_per_kind() {
        let cache = ListCache::new(Duration::from_secs(60));
        let cloud = cache.generation(StorageKind::Cloudinary);
        cache.invalidate(StorageKind::Local);
        assert!(cache.insert(StorageKind::Cloudinary, "x", vec![], cloud));
    }
}
