//! Render result cache.
//!
//! Validated renderer output is keyed by a fingerprint of the normalized
//! request and kept in an in-memory LRU with a TTL checked on read. When a
//! directory is configured, entries are also written to disk so they survive
//! restarts.
//!
//! ```toml
//! [cache]
//! enabled = true
//! ttl_seconds = 3600
//! capacity = 256
//! directory = "/var/cache/diagram-relay"
//! revalidate_hits = true
//! ```

mod config;
mod disk;
mod keys;
pub(crate) mod lock;
mod store;

pub use config::CacheConfig;
pub use disk::{CacheError, DiskStore};
pub use keys::{AUTO_RENDERER, CacheKey};
pub use store::{
    CACHE_EVICT_TOTAL, CACHE_EXPIRED_TOTAL, CACHE_HIT_TOTAL, CACHE_MISS_TOTAL, CacheEntry,
    ResultCache,
};
