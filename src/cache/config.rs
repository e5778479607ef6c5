//! Result-cache configuration.

use std::{num::NonZeroUsize, path::PathBuf, time::Duration};

use serde::Deserialize;

const DEFAULT_TTL_SECONDS: u64 = 3_600;
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve and store results at all.
    pub enabled: bool,
    /// Freshness window for new entries.
    pub ttl_seconds: u64,
    /// Maximum in-memory entries before LRU eviction.
    pub capacity: usize,
    /// Persist entries under this directory when set.
    pub directory: Option<PathBuf>,
    /// Re-run structural checks on cache hits.
    pub revalidate_hits: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            capacity: DEFAULT_CAPACITY,
            directory: None,
            revalidate_hits: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl_seconds: settings.ttl_seconds,
            capacity: settings.capacity,
            directory: settings.directory.clone(),
            revalidate_hits: settings.revalidate_hits,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Capacity as `NonZeroUsize`, clamping zero to one.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
