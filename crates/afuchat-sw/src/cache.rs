//! Cache buckets and cache storage.
//!
//! A [`Cache`] maps request keys to response snapshots and remembers write
//! order, so an entry-count cap evicts the oldest written entries first.
//! Reads never change that order. Expiration is supplied per call: routes that
//! share a bucket can apply different caps, and the route doing the write
//! decides.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use afuchat_common::{Clock, SystemClock};
use afuchat_net::Response;
use hashbrown::HashMap;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// Cache storage shared by every in-flight request and every worker version.
pub type SharedStorage = Arc<RwLock<CacheStorage>>;

/// Entry-count and age limits for a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpirationPolicy {
    /// Maximum number of entries kept after a write.
    pub max_entries: Option<usize>,
    /// Maximum entry age in seconds.
    pub max_age_secs: Option<u64>,
}

impl ExpirationPolicy {
    pub fn new(max_entries: usize, max_age: Duration) -> Self {
        Self {
            max_entries: Some(max_entries),
            max_age_secs: Some(max_age.as_secs()),
        }
    }

    /// No limits.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }

    /// Whether an entry written at `cached_at` is past its age limit at `now`.
    pub fn is_expired(&self, cached_at: u64, now: u64) -> bool {
        match self.max_age_secs {
            Some(max_age) => now.saturating_sub(cached_at) > max_age.saturating_mul(1000),
            None => false,
        }
    }
}

/// A cached request/response pair.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Request key (URL without fragment).
    pub key: String,

    /// Response snapshot.
    pub response: Response,

    /// Write timestamp (ms since epoch).
    pub cached_at: u64,
}

/// A cache bucket.
pub struct Cache {
    /// Bucket name.
    pub name: String,

    /// Entries, most recently written first.
    entries: LruCache<String, CacheEntry>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl Cache {
    /// Create an empty bucket.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: LruCache::unbounded(),
        }
    }

    /// Look up an entry, ignoring age.
    pub fn match_request(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.peek(key)
    }

    /// Look up an entry that is still fresh under `policy`.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn match_fresh(
        &mut self,
        key: &str,
        policy: &ExpirationPolicy,
        now: u64,
    ) -> Option<&CacheEntry> {
        let expired = match self.entries.peek(key) {
            Some(entry) => policy.is_expired(entry.cached_at, now),
            None => return None,
        };
        if expired {
            trace!(cache = %self.name, key, "Dropping expired entry");
            self.entries.pop(key);
            return None;
        }
        self.entries.peek(key)
    }

    /// Store a response under `key`, replacing any previous entry.
    ///
    /// Responses that are not cacheable (anything but status 200 or an opaque
    /// response) are refused and `false` is returned. Returns `true` once
    /// stored, after evicting the oldest entries beyond `policy.max_entries`.
    pub fn put(
        &mut self,
        key: &str,
        response: &Response,
        policy: &ExpirationPolicy,
        now: u64,
    ) -> bool {
        if !response.is_cacheable() {
            debug!(cache = %self.name, key, status = response.status, "Refusing to cache response");
            return false;
        }

        let mut snapshot = response.clone();
        snapshot.from_cache = false;
        self.entries.put(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                response: snapshot,
                cached_at: now,
            },
        );

        if let Some(max_entries) = policy.max_entries {
            while self.entries.len() > max_entries {
                if let Some((evicted, _)) = self.entries.pop_lru() {
                    trace!(cache = %self.name, key = %evicted, "Evicted oldest entry");
                }
            }
        }
        true
    }

    /// Remove every entry past the age limit. Returns how many were removed.
    pub fn expire_entries(&mut self, policy: &ExpirationPolicy, now: u64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| policy.is_expired(entry.cached_at, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key.as_str());
        }
        expired.len()
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.pop(key).is_some()
    }

    /// All keys, oldest write first.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().rev().map(|(k, _)| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cache storage (the `caches` global).
#[derive(Debug)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    clock: Arc<dyn Clock>,
}

impl Default for CacheStorage {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl CacheStorage {
    /// Create empty storage using `clock` for entry timestamps.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            caches: HashMap::new(),
            clock,
        }
    }

    /// Wrap storage for sharing between tasks.
    pub fn shared(self) -> SharedStorage {
        Arc::new(RwLock::new(self))
    }

    /// Current time according to the storage clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// All cache names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Delete every cache. Returns the deleted names.
    pub fn clear(&mut self) -> Vec<String> {
        let names = self.keys();
        self.caches.clear();
        names
    }

    /// Store a response in `bucket`, creating the bucket on first write.
    ///
    /// Non-cacheable responses never create a bucket.
    pub fn put(
        &mut self,
        bucket: &str,
        key: &str,
        response: &Response,
        policy: &ExpirationPolicy,
    ) -> bool {
        if !response.is_cacheable() {
            debug!(cache = bucket, key, status = response.status, "Refusing to cache response");
            return false;
        }
        let now = self.now_ms();
        self.open(bucket).put(key, response, policy, now)
    }

    /// Fresh response for `key` in `bucket`, marked as served from cache.
    pub fn match_in(
        &mut self,
        bucket: &str,
        key: &str,
        policy: &ExpirationPolicy,
    ) -> Option<Response> {
        let now = self.now_ms();
        self.caches
            .get_mut(bucket)?
            .match_fresh(key, policy, now)
            .map(|entry| entry.response.clone().served_from_cache())
    }

    /// Match across all caches, ignoring age.
    pub fn match_request(&self, key: &str) -> Option<&CacheEntry> {
        self.caches
            .values()
            .find_map(|cache| cache.match_request(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afuchat_common::ManualClock;

    const MINUTE: Duration = Duration::from_secs(60);

    fn storage_with_clock() -> (CacheStorage, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        (CacheStorage::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_cache_put_and_match() {
        let mut cache = Cache::new("afuchat-static-v1");
        let policy = ExpirationPolicy::none();

        assert!(cache.put("https://afuchat.com/app.js", &Response::new(200, "js"), &policy, 0));
        assert!(cache.match_request("https://afuchat.com/app.js").is_some());
        assert!(cache.match_request("https://afuchat.com/other.js").is_none());
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let mut cache = Cache::new("afuchat-api-v1");
        let policy = ExpirationPolicy::none();
        let key = "https://afuchat.supabase.co/rest/v1/posts";

        cache.put(key, &Response::new(200, "old"), &policy, 1);
        cache.put(key, &Response::new(200, "new"), &policy, 2);

        assert_eq!(cache.len(), 1);
        let entry = cache.match_request(key).unwrap();
        assert_eq!(entry.response.text().unwrap(), "new");
        assert_eq!(entry.cached_at, 2);
    }

    #[test]
    fn test_refuses_error_statuses() {
        let mut cache = Cache::new("afuchat-images-v1");
        let policy = ExpirationPolicy::none();

        assert!(!cache.put("https://afuchat.com/a.png", &Response::new(404, ""), &policy, 0));
        assert!(!cache.put("https://afuchat.com/b.png", &Response::new(500, ""), &policy, 0));
        assert!(!cache.put("https://afuchat.com/c.png", &Response::network_error(), &policy, 0));
        assert!(cache.put("https://cdn.example/d.png", &Response::opaque(""), &policy, 0));
        assert_eq!(cache.keys(), vec!["https://cdn.example/d.png"]);
    }

    #[test]
    fn test_count_cap_evicts_oldest_write() {
        let mut cache = Cache::new("afuchat-fonts-v1");
        let policy = ExpirationPolicy {
            max_entries: Some(2),
            max_age_secs: None,
        };

        cache.put("a", &Response::new(200, "a"), &policy, 1);
        cache.put("b", &Response::new(200, "b"), &policy, 2);
        // Reads do not refresh write order.
        assert!(cache.match_request("a").is_some());
        cache.put("c", &Response::new(200, "c"), &policy, 3);

        assert_eq!(cache.keys(), vec!["b", "c"]);
    }

    #[test]
    fn test_rewrite_moves_entry_to_newest() {
        let mut cache = Cache::new("afuchat-pages-v1");
        let policy = ExpirationPolicy {
            max_entries: Some(2),
            max_age_secs: None,
        };

        cache.put("a", &Response::new(200, "a"), &policy, 1);
        cache.put("b", &Response::new(200, "b"), &policy, 2);
        cache.put("a", &Response::new(200, "a2"), &policy, 3);
        cache.put("c", &Response::new(200, "c"), &policy, 4);

        assert_eq!(cache.keys(), vec!["a", "c"]);
    }

    #[test]
    fn test_expired_entry_is_a_miss_and_removed() {
        let mut cache = Cache::new("afuchat-api-v1");
        let policy = ExpirationPolicy::new(100, 5 * MINUTE);

        cache.put("k", &Response::new(200, "v"), &policy, 0);
        assert!(cache.match_fresh("k", &policy, 5 * 60 * 1000).is_some());
        assert!(cache.match_fresh("k", &policy, 5 * 60 * 1000 + 1).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expire_entries() {
        let mut cache = Cache::new("afuchat-images-v1");
        let policy = ExpirationPolicy::new(10, MINUTE);
        cache.put("old", &Response::new(200, ""), &policy, 0);
        cache.put("new", &Response::new(200, ""), &policy, 50_000);

        assert_eq!(cache.expire_entries(&policy, 70_000), 1);
        assert_eq!(cache.keys(), vec!["new"]);
    }

    #[test]
    fn test_cache_storage() {
        let mut storage = CacheStorage::default();

        assert!(!storage.has("v1"));

        storage.open("v1");
        assert!(storage.has("v1"));

        assert!(storage.delete("v1"));
        assert!(!storage.has("v1"));
    }

    #[test]
    fn test_storage_put_is_lazy_and_filtered() {
        let (mut storage, _clock) = storage_with_clock();
        let policy = ExpirationPolicy::none();

        assert!(!storage.put("afuchat-api-v1", "k", &Response::new(404, ""), &policy));
        assert!(!storage.has("afuchat-api-v1"));

        assert!(storage.put("afuchat-api-v1", "k", &Response::new(200, "v"), &policy));
        assert!(storage.has("afuchat-api-v1"));
    }

    #[test]
    fn test_storage_match_uses_clock() {
        let (mut storage, clock) = storage_with_clock();
        let policy = ExpirationPolicy::new(10, MINUTE);
        storage.put("afuchat-api-v1", "k", &Response::new(200, "v"), &policy);

        let hit = storage.match_in("afuchat-api-v1", "k", &policy).unwrap();
        assert!(hit.from_cache);

        clock.advance(2 * MINUTE);
        assert!(storage.match_in("afuchat-api-v1", "k", &policy).is_none());
        assert!(storage.match_request("k").is_none());
    }

    #[test]
    fn test_clear_returns_names() {
        let mut storage = CacheStorage::default();
        storage.open("b");
        storage.open("a");
        assert_eq!(storage.clear(), vec!["a".to_string(), "b".to_string()]);
        assert!(storage.keys().is_empty());
    }
}
