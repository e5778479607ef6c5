//! TTL-bounded result cache: an LRU in memory, optionally backed by disk.

use std::{
    num::NonZeroUsize,
    path::Path,
    sync::RwLock,
    time::{Duration, SystemTime},
};

use lru::LruCache;
use metrics::counter;
use tracing::{debug, warn};

use crate::domain::{OutputFormat, RenderContent};

use super::{
    config::CacheConfig,
    disk::{CacheError, DiskStore},
    keys::CacheKey,
    lock::rw_write,
};

const SOURCE: &str = "cache::store";

pub const CACHE_HIT_TOTAL: &str = "diagram_relay_cache_hit_total";
pub const CACHE_MISS_TOTAL: &str = "diagram_relay_cache_miss_total";
pub const CACHE_EXPIRED_TOTAL: &str = "diagram_relay_cache_expired_total";
pub const CACHE_EVICT_TOTAL: &str = "diagram_relay_cache_evict_total";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub content: RenderContent,
    pub format: OutputFormat,
    pub renderer_name: String,
    pub created_at: SystemTime,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(
        content: RenderContent,
        format: OutputFormat,
        renderer_name: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            content,
            format,
            renderer_name: renderer_name.into(),
            created_at: SystemTime::now(),
            ttl,
        }
    }

    /// Entries stamped in the future (clock skew) count as fresh.
    pub fn is_fresh_at(&self, now: SystemTime) -> bool {
        match now.duration_since(self.created_at) {
            Ok(age) => age < self.ttl,
            Err(_) => true,
        }
    }
}

pub struct ResultCache {
    entries: RwLock<LruCache<CacheKey, CacheEntry>>,
    ttl: Duration,
    disk: Option<DiskStore>,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        let disk = config.directory.as_ref().map(DiskStore::open).transpose()?;
        Ok(Self {
            entries: RwLock::new(LruCache::new(config.capacity_non_zero())),
            ttl: config.ttl(),
            disk,
        })
    }

    pub fn in_memory(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            ttl,
            disk: None,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn disk_root(&self) -> Option<&Path> {
        self.disk.as_ref().map(DiskStore::root)
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.get_at(key, SystemTime::now())
    }

    /// Looks `key` up as of `now`. Stale entries are dropped on the way, from
    /// memory and from disk.
    pub fn get_at(&self, key: &CacheKey, now: SystemTime) -> Option<CacheEntry> {
        let expired_in_memory = {
            let mut entries = rw_write(&self.entries, SOURCE, "get");
            match entries.get(key) {
                Some(entry) if entry.is_fresh_at(now) => {
                    counter!(CACHE_HIT_TOTAL).increment(1);
                    return Some(entry.clone());
                }
                Some(_) => {
                    entries.pop(key);
                    true
                }
                None => false,
            }
        };

        if expired_in_memory {
            counter!(CACHE_EXPIRED_TOTAL).increment(1);
            self.remove_from_disk(key);
        } else if let Some(entry) = self.load_from_disk(key, now) {
            counter!(CACHE_HIT_TOTAL).increment(1);
            self.insert_memory(key.clone(), entry.clone());
            return Some(entry);
        }

        counter!(CACHE_MISS_TOTAL).increment(1);
        None
    }

    /// Stores a freshly rendered result with the cache's TTL.
    pub fn put(
        &self,
        key: CacheKey,
        content: RenderContent,
        format: OutputFormat,
        renderer_name: &str,
    ) -> CacheEntry {
        let entry = CacheEntry::new(content, format, renderer_name, self.ttl);
        self.insert(key, entry.clone());
        entry
    }

    pub fn insert(&self, key: CacheKey, entry: CacheEntry) {
        if let Some(disk) = &self.disk {
            if let Err(err) = disk.store(&key, &entry) {
                warn!(
                    target = "application::cache",
                    op = "store",
                    result = "disk_error",
                    key = %key,
                    error = %err,
                    "Failed to persist cache entry"
                );
            }
        }
        self.insert_memory(key, entry);
    }

    pub fn remove(&self, key: &CacheKey) {
        rw_write(&self.entries, SOURCE, "remove").pop(key);
        self.remove_from_disk(key);
    }

    /// Empties memory and disk, returning how many disk entries were removed.
    pub fn purge(&self) -> Result<usize, CacheError> {
        rw_write(&self.entries, SOURCE, "purge").clear();
        match &self.disk {
            Some(disk) => disk.purge(),
            None => Ok(0),
        }
    }

    /// In-memory entry count.
    pub fn len(&self) -> usize {
        rw_write(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_memory(&self, key: CacheKey, entry: CacheEntry) {
        let displaced = rw_write(&self.entries, SOURCE, "insert").push(key.clone(), entry);
        if let Some((evicted, _)) = displaced
            && evicted != key
        {
            counter!(CACHE_EVICT_TOTAL).increment(1);
            debug!(
                target = "application::cache",
                op = "insert",
                result = "evicted",
                key = %evicted,
                "Evicted least recently used entry"
            );
        }
    }

    fn load_from_disk(&self, key: &CacheKey, now: SystemTime) -> Option<CacheEntry> {
        let disk = self.disk.as_ref()?;
        match disk.load(key) {
            Ok(Some(entry)) if entry.is_fresh_at(now) => Some(entry),
            Ok(Some(_)) => {
                counter!(CACHE_EXPIRED_TOTAL).increment(1);
                self.remove_from_disk(key);
                None
            }
            Ok(None) => None,
            Err(err) => {
                warn!(
                    target = "application::cache",
                    op = "load",
                    result = "evicted",
                    key = %key,
                    error = %err,
                    "Dropping unreadable cache entry"
                );
                self.remove_from_disk(key);
                None
            }
        }
    }

    fn remove_from_disk(&self, key: &CacheKey) {
        let Some(disk) = &self.disk else {
            return;
        };
        if let Err(err) = disk.remove(key) {
            warn!(
                target = "application::cache",
                op = "remove",
                result = "disk_error",
                key = %key,
                error = %err,
                "Failed to remove cache entry"
            );
        }
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("ttl", &self.ttl)
            .field("disk", &self.disk_root())
            .finish_non_exhaustive()
    }
}
