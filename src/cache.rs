/// Holder Set Caching
///
/// In-memory LRU cache for holder lists so repeat analyses of the same
/// assets skip the provider round-trips.
///
/// Only complete or capped fetches are stored, keyed by asset identity.
/// Holder lists can be large (up to the per-asset cap), so the default
/// capacity is small. A disabled cache stores nothing and always misses.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::constants::{HOLDER_CACHE_CAPACITY, HOLDER_CACHE_TTL};
use crate::metrics;
use crate::types::AssetIdentity;

/// Cache entry with TTL
#[derive(Debug, Clone)]
struct CachedEntry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> CachedEntry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn value(&self) -> &T {
        &self.value
    }
}

/// Holder list of one asset
#[derive(Debug, Clone)]
pub struct CachedHolders {
    pub addresses: Arc<Vec<String>>,
    /// Pagination stopped at the cap; the list is a sample
    pub capped: bool,
}

pub struct HolderCache {
    /// None when caching is disabled
    holders: Option<RwLock<LruCache<AssetIdentity, CachedEntry<CachedHolders>>>>,
    holder_ttl: Duration,
}

impl HolderCache {
    pub fn new(capacity: usize, holder_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            holders: Some(RwLock::new(LruCache::new(capacity))),
            holder_ttl,
        }
    }

    pub fn disabled() -> Self {
        Self {
            holders: None,
            holder_ttl: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.holders.is_some()
    }

    // ========== Holder Lists ==========

    /// Holder list for an asset, if cached and not expired
    pub async fn get_holders(&self, identity: &AssetIdentity) -> Option<CachedHolders> {
        let mut cache = self.holders.as_ref()?.write().await;

        let hit = match cache.get(identity) {
            Some(entry) if !entry.is_expired() => Some(entry.value().clone()),
            Some(_) => {
                // Expired, remove it
                cache.pop(identity);
                None
            }
            None => None,
        };

        if hit.is_some() {
            metrics::increment_cache_hits();
        } else {
            metrics::increment_cache_misses();
        }
        hit
    }

    pub async fn put_holders(&self, identity: &AssetIdentity, holders: CachedHolders) {
        if let Some(store) = &self.holders {
            let entry = CachedEntry::new(holders, self.holder_ttl);
            store.write().await.put(identity.clone(), entry);
        }
    }

    // ========== Cache Statistics ==========

    pub async fn get_stats(&self) -> CacheStats {
        match &self.holders {
            Some(store) => {
                let holders = store.read().await;
                let holder_addresses = holders.iter().map(|(_, e)| e.value().addresses.len()).sum();
                CacheStats {
                    enabled: true,
                    holder_sets: holders.len(),
                    holder_addresses,
                }
            }
            None => CacheStats::default(),
        }
    }
}

impl Default for HolderCache {
    fn default() -> Self {
        Self::new(HOLDER_CACHE_CAPACITY, HOLDER_CACHE_TTL)
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub holder_sets: usize,
    pub holder_addresses: usize,
}
