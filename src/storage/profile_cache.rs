// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache for upstream OAuth profiles.
//!
//! Caches the raw user-info document per address so repeated profile reads
//! don't hit the provider on every request.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use serde_json::Value;

use crate::clock::SharedClock;

/// Cached entry: raw profile document + insertion timestamp.
struct CacheEntry {
    profile: Value,
    inserted_at_ms: i64,
}

/// In-process LRU cache for fetched provider profiles.
pub struct ProfileCache {
    cache: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
    clock: SharedClock,
}

impl ProfileCache {
    /// Create a new cache with the given capacity and TTL.
    ///
    /// - `capacity`: Max number of addresses to cache.
    /// - `ttl`: Time-to-live for each cache entry.
    pub fn new(capacity: usize, ttl: Duration, clock: SharedClock) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
            clock,
        }
    }

    /// Get the cached profile for an address entity.
    ///
    /// Returns `None` if not cached or expired.
    pub fn get(&self, entity_id: &str) -> Option<Value> {
        let mut cache = self.cache.lock().ok()?;
        let now = self.clock.now_ms();
        if let Some(entry) = cache.get(entity_id) {
            if now - entry.inserted_at_ms < self.ttl.as_millis() as i64 {
                return Some(entry.profile.clone());
            }
            cache.pop(entity_id);
        }
        None
    }

    pub fn put(&self, entity_id: &str, profile: Value) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                entity_id.to_string(),
                CacheEntry {
                    profile,
                    inserted_at_ms: self.clock.now_ms(),
                },
            );
        }
    }

    /// Drop the cached profile, e.g. after new tokens were stored.
    pub fn invalidate(&self, entity_id: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(entity_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;
    use std::sync::Arc;

    fn cache(ttl: Duration) -> (ManualClock, ProfileCache) {
        let clock = ManualClock::new(0);
        let cache = ProfileCache::new(2, ttl, Arc::new(clock.clone()));
        (clock, cache)
    }

    #[test]
    fn cache_put_and_get() {
        let (_clock, cache) = cache(Duration::from_secs(300));
        assert!(cache.get("address/a").is_none());

        cache.put("address/a", json!({"login": "octocat"}));
        assert_eq!(cache.get("address/a").unwrap()["login"], "octocat");
    }

    #[test]
    fn cache_invalidate() {
        let (_clock, cache) = cache(Duration::from_secs(300));
        cache.put("address/a", json!({}));
        cache.invalidate("address/a");
        assert!(cache.get("address/a").is_none());
    }

    #[test]
    fn cache_ttl_expiry() {
        let (clock, cache) = cache(Duration::from_secs(300));
        cache.put("address/a", json!({}));

        clock.advance(Duration::from_secs(299));
        assert!(cache.get("address/a").is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get("address/a").is_none());
    }

    #[test]
    fn cache_evicts_least_recently_used() {
        let (_clock, cache) = cache(Duration::from_secs(300));
        cache.put("address/a", json!(1));
        cache.put("address/b", json!(2));
        let _ = cache.get("address/a");
        cache.put("address/c", json!(3));

        assert!(cache.get("address/b").is_none());
        assert!(cache.get("address/a").is_some());
        assert!(cache.get("address/c").is_some());
    }
}
