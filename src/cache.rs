use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache as MokaStore;
use moka::Expiry;

use crate::config::CacheConfig;
use crate::metadata::ImageRecord;

/// A value held by the cache.
#[derive(Debug, Clone)]
pub enum CacheValue {
    Record(Arc<ImageRecord>),
    Exists(bool),
}

/// How readily an entry may be evicted when the cache is under pressure.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CachePriority {
    Low,
    Normal,
    High,
}

/// The expiration policy of a single entry.
///
/// If both expirations are set the entry expires at whichever
/// deadline comes first.
#[derive(Debug, Copy, Clone)]
pub struct EntryOptions {
    /// Expire the entry once it has not been read for this long.
    pub sliding: Option<Duration>,

    /// Expire the entry this long after it was written regardless of reads.
    pub absolute: Option<Duration>,

    pub priority: CachePriority,
}

impl EntryOptions {
    pub fn sliding(ttl: Duration, priority: CachePriority) -> Self {
        Self {
            sliding: Some(ttl),
            absolute: None,
            priority,
        }
    }

    pub fn absolute(ttl: Duration, priority: CachePriority) -> Self {
        Self {
            sliding: None,
            absolute: Some(ttl),
            priority,
        }
    }

    fn ttl_on_write(&self) -> Option<Duration> {
        match (self.sliding, self.absolute) {
            (Some(sliding), Some(absolute)) => Some(sliding.min(absolute)),
            (sliding, absolute) => sliding.or(absolute),
        }
    }
}

/// A non-authoritative key value cache.
///
/// Implementations may lose entries at any time, callers must always be
/// able to fall back to the backing stores.
#[async_trait]
pub trait Cache: Sync + Send + 'static {
    async fn get(&self, key: &str) -> Option<CacheValue>;

    async fn set(&self, key: String, value: CacheValue, options: EntryOptions);

    async fn remove(&self, key: &str);
}

/// Builds the cache described by the config.
///
/// A capacity of `0` disables caching.
pub fn from_config(cfg: &CacheConfig) -> Arc<dyn Cache> {
    if cfg.capacity == 0 {
        Arc::new(NoopCache)
    } else {
        Arc::new(TieredCache::new(
            cfg.capacity,
            cfg.pinned_capacity,
            cfg.volatile_capacity,
        ))
    }
}

#[derive(Clone)]
struct Entry {
    value: CacheValue,
    options: EntryOptions,
}

struct EntryExpiry;

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, entry: &Entry, _created_at: Instant) -> Option<Duration> {
        entry.options.ttl_on_write()
    }

    fn expire_after_read(
        &self,
        _key: &String,
        entry: &Entry,
        read_at: Instant,
        duration_until_expiry: Option<Duration>,
        last_modified_at: Instant,
    ) -> Option<Duration> {
        let sliding = match entry.options.sliding {
            None => return duration_until_expiry,
            Some(sliding) => sliding,
        };

        match entry.options.absolute {
            None => Some(sliding),
            Some(absolute) => {
                let elapsed = read_at.saturating_duration_since(last_modified_at);
                Some(sliding.min(absolute.saturating_sub(elapsed)))
            },
        }
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.options.ttl_on_write()
    }
}

/// A moka backed cache split into one tier per priority.
///
/// Each tier is bounded on its own, so entries only ever compete for space
/// with entries of the same priority. A flood of normal or low priority
/// writes cannot evict a high priority entry.
pub struct TieredCache {
    pinned: MokaStore<String, Entry>,
    retained: MokaStore<String, Entry>,
    volatile: MokaStore<String, Entry>,
}

impl TieredCache {
    pub fn new(capacity: u64, pinned_capacity: u64, volatile_capacity: u64) -> Self {
        Self {
            pinned: build_store(pinned_capacity),
            retained: build_store(capacity),
            volatile: build_store(volatile_capacity),
        }
    }

    #[inline]
    fn tier(&self, priority: CachePriority) -> &MokaStore<String, Entry> {
        match priority {
            CachePriority::High => &self.pinned,
            CachePriority::Normal => &self.retained,
            CachePriority::Low => &self.volatile,
        }
    }

    #[inline]
    fn all_tiers(&self) -> [&MokaStore<String, Entry>; 3] {
        [&self.pinned, &self.retained, &self.volatile]
    }
}

fn build_store(capacity: u64) -> MokaStore<String, Entry> {
    MokaStore::builder()
        .max_capacity(capacity)
        .expire_after(EntryExpiry)
        .build()
}

#[async_trait]
impl Cache for TieredCache {
    async fn get(&self, key: &str) -> Option<CacheValue> {
        for tier in self.all_tiers() {
            if let Some(entry) = tier.get(key).await {
                return Some(entry.value);
            }
        }

        None
    }

    async fn set(&self, key: String, value: CacheValue, options: EntryOptions) {
        let target = self.tier(options.priority);

        // A key only ever lives in one tier.
        for tier in self.all_tiers() {
            if !std::ptr::eq(tier, target) {
                tier.invalidate(&key).await;
            }
        }

        target.insert(key, Entry { value, options }).await;
    }

    async fn remove(&self, key: &str) {
        for tier in self.all_tiers() {
            tier.invalidate(key).await;
        }
    }
}

/// Used when caching is disabled.
pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Option<CacheValue> {
        None
    }

    async fn set(&self, _key: String, _value: CacheValue, _options: EntryOptions) {}

    async fn remove(&self, _key: &str) {}
}
