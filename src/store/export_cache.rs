//! Cache of encoded model downloads.
//!
//! Encoding a bundle walks every vertex and face, so repeated downloads of
//! the same model reuse the encoded payload.
//!
//! # Cache Key
//!
//! Entries are keyed by series id and [`MeshFormat`]. A new bundle for a
//! series invalidates every format of that series.
//!
//! # Size-Based Eviction
//!
//! The cache tracks the total size of cached payloads in bytes and evicts
//! least-recently-used entries when the capacity is exceeded.

use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;

use crate::mesh::MeshFormat;

/// Default cache capacity: 256MB
pub const DEFAULT_EXPORT_CACHE_CAPACITY: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExportKey {
    pub series_id: Arc<str>,
    pub format: MeshFormat,
}

impl ExportKey {
    pub fn new(series_id: impl Into<Arc<str>>, format: MeshFormat) -> Self {
        Self {
            series_id: series_id.into(),
            format,
        }
    }
}

struct Entries {
    lru: LruCache<ExportKey, Bytes>,
    size: usize,
}

/// LRU cache for encoded downloads with size-based capacity.
pub struct ExportCache {
    entries: Mutex<Entries>,
    max_size: usize,
}

impl ExportCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EXPORT_CACHE_CAPACITY)
    }

    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(Entries {
                lru: LruCache::unbounded(),
                size: 0,
            }),
            max_size,
        }
    }

    /// Cached payload; marks the entry as recently used.
    pub async fn get(&self, key: &ExportKey) -> Option<Bytes> {
        self.entries.lock().await.lru.get(key).cloned()
    }

    pub async fn contains(&self, key: &ExportKey) -> bool {
        self.entries.lock().await.lru.contains(key)
    }

    /// Store a payload, evicting least-recently-used entries while over
    /// capacity. A payload larger than the whole cache is not stored.
    pub async fn put(&self, key: ExportKey, data: Bytes) {
        if data.len() > self.max_size {
            return;
        }

        let mut entries = self.entries.lock().await;
        let data_size = data.len();

        if let Some(old) = entries.lru.put(key, data) {
            entries.size = entries.size.saturating_sub(old.len());
        }
        entries.size += data_size;

        while entries.size > self.max_size {
            match entries.lru.pop_lru() {
                Some((_, evicted)) => entries.size = entries.size.saturating_sub(evicted.len()),
                None => break,
            }
        }
    }

    /// Drop every format cached for a series.
    pub async fn invalidate_series(&self, series_id: &str) {
        let mut entries = self.entries.lock().await;
        let stale: Vec<ExportKey> = entries
            .lru
            .iter()
            .filter(|(k, _)| &*k.series_id == series_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            if let Some(data) = entries.lru.pop(&key) {
                entries.size = entries.size.saturating_sub(data.len());
            }
        }
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.lru.clear();
        entries.size = 0;
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.lru.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.lru.is_empty()
    }

    /// Current total size in bytes.
    pub async fn size(&self) -> usize {
        self.entries.lock().await.size
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for ExportCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
