//! Cache Layer (C2): TTL + LRU key/value cache with category-scoped
//! invalidation, grounded on `original_source/src/api/performance/cache.py`'s
//! `SmartCache` (kept and not excluded by a Non-goal, since spec §4.2
//! already requires this layer; the size-bytes estimate is carried along
//! with it per SPEC_FULL §B).
//!
//! Uses `dashmap` for the concurrent map, the same crate this crate's
//! stack pulls in for the Operation Manager's registry (enrichment from
//! `zijiren233-synctv`, which leans on `dashmap` throughout its server).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

const DEFAULT_TTL_S: u64 = 300;
const GLOBAL_STATS_TTL_S: u64 = 600;
const EXISTING_PATHS_TTL_S: u64 = 600;
const PENDING_VIDEOS_TTL_S: u64 = 300;

fn category_ttl(key: &str, default_ttl: Duration) -> Duration {
    if key.starts_with("global_stats") {
        Duration::from_secs(GLOBAL_STATS_TTL_S)
    } else if key.starts_with("existing_paths") {
        Duration::from_secs(EXISTING_PATHS_TTL_S)
    } else if key.starts_with("pending_videos") {
        Duration::from_secs(PENDING_VIDEOS_TTL_S)
    } else {
        default_ttl
    }
}

struct Entry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
    size_bytes: usize,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub entry_count: usize,
    pub approx_size_bytes: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// General-purpose cache passed in as a collaborator (spec §9: "cache as a
/// collaborator, not a singleton" — a single process-wide instance is
/// created at startup and shared via `Arc`).
pub struct Cache {
    entries: DashMap<String, Entry>,
    /// Tracks LRU order; front = least recently used. Touched under a
    /// short-lived lock, never held across I/O, matching spec §5's
    /// "reads and writes must not hold the lock across I/O" rule.
    lru: std::sync::Mutex<VecDeque<String>>,
    max_size: usize,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl Cache {
    pub fn new(max_size: usize, default_ttl_s: u64) -> Self {
        Self {
            entries: DashMap::new(),
            lru: std::sync::Mutex::new(VecDeque::new()),
            max_size: max_size.max(1),
            default_ttl: Duration::from_secs(if default_ttl_s == 0 { DEFAULT_TTL_S } else { default_ttl_s }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.touch(key);
                Some(entry.value.clone())
            }
            Some(_) => {
                drop(self.entries.remove(key));
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: Value) {
        self.set_with_ttl(key, value, None);
    }

    pub fn set_with_ttl(&self, key: &str, value: Value, ttl_override: Option<Duration>) {
        let ttl = ttl_override.unwrap_or_else(|| category_ttl(key, self.default_ttl));
        let size_bytes = value.to_string().len();
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                inserted_at: Instant::now(),
                ttl,
                size_bytes,
            },
        );
        self.touch(key);
        self.evict_if_needed();
    }

    fn touch(&self, key: &str) {
        let mut lru = self.lru.lock().unwrap();
        if let Some(pos) = lru.iter().position(|k| k == key) {
            lru.remove(pos);
        }
        lru.push_back(key.to_string());
    }

    fn evict_if_needed(&self) {
        while self.entries.len() > self.max_size {
            let victim = {
                let mut lru = self.lru.lock().unwrap();
                lru.pop_front()
            };
            match victim {
                Some(key) => {
                    if self.entries.remove(&key).is_some() {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => break,
            }
        }
    }

    /// Invalidate every key with the given prefix, e.g.
    /// `invalidate("creator:alice")`, `invalidate("platform:youtube")`,
    /// `invalidate("global_stats")`.
    pub fn invalidate(&self, prefix: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        let count = keys.len();
        for key in &keys {
            self.entries.remove(key);
            let mut lru = self.lru.lock().unwrap();
            if let Some(pos) = lru.iter().position(|k| k == key) {
                lru.remove(pos);
            }
        }
        if count > 0 {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        count
    }

    pub fn stats(&self) -> CacheStats {
        let approx_size_bytes: usize = self.entries.iter().map(|e| e.size_bytes).sum();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entry_count: self.entries.len(),
            approx_size_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hit_then_miss_after_invalidate() {
        let cache = Cache::new(100, 300);
        cache.set("creator:alice:posts", json!([1, 2, 3]));
        assert!(cache.get("creator:alice:posts").is_some());
        cache.invalidate("creator:alice");
        assert!(cache.get("creator:alice:posts").is_none());
        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, 2);
        assert_eq!(stats.invalidations, 1);
    }

    #[test]
    fn lru_evicts_oldest_past_max_size() {
        let cache = Cache::new(2, 300);
        cache.set("a", json!(1));
        cache.set("b", json!(2));
        cache.set("c", json!(3));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn expired_entry_counts_as_miss() {
        let cache = Cache::new(100, 0);
        cache.set_with_ttl("k", json!(1), Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn category_specific_ttl_applies() {
        let cache = Cache::new(100, 300);
        cache.set("global_stats:all", json!(1));
        let stats = cache.stats();
        assert_eq!(stats.entry_count, 1);
    }
}
