//! LRU cache for resolved contexts with dependency-tracked invalidation.
//!
//! One mutex protects both the LRU order and the dependency index; every
//! operation is short and never touches I/O while holding the lock.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::models::{ContextLevel, ResolvedContext};

/// Cache key: the `(level, id)` pair a resolution was requested for
pub type CacheKey = (ContextLevel, String);

/// Default capacity when none is configured
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

struct CacheEntry {
    resolved: ResolvedContext,
    dependency_hash: u64,
    inserted_at: Instant,
}

struct CacheState {
    entries: LruCache<CacheKey, CacheEntry>,
    /// context id -> cache keys whose chain includes that context
    dependents: HashMap<String, HashSet<CacheKey>>,
    hits: u64,
    misses: u64,
    evictions: u64,
    invalidations: u64,
    resolution_count: u64,
    resolution_total: Duration,
}

/// Counters exposed through the health surface
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub hit_ratio: f64,
    pub miss_ratio: f64,
    pub mean_resolution_ms: f64,
    pub len: usize,
    pub capacity: usize,
}

/// Process-wide cache of resolved contexts.
pub struct ContextCache {
    state: Mutex<CacheState>,
    capacity: usize,
    ttl: Option<Duration>,
}

impl ContextCache {
    /// Create a cache with the given capacity and optional entry TTL.
    /// A zero capacity falls back to the default.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_CACHE_CAPACITY
        } else {
            capacity
        };
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(
                    NonZeroUsize::new(capacity).expect("capacity is non-zero"),
                ),
                dependents: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
                invalidations: 0,
                resolution_count: 0,
                resolution_total: Duration::ZERO,
            }),
            capacity,
            ttl,
        }
    }

    /// Look up a resolved context, refreshing its LRU position.
    pub fn get(&self, key: &CacheKey) -> Option<ResolvedContext> {
        let mut state = self.state.lock().expect("context cache poisoned");

        let expired = match state.entries.get(key) {
            Some(entry) => match self.ttl {
                Some(ttl) => entry.inserted_at.elapsed() > ttl,
                None => false,
            },
            None => {
                state.misses += 1;
                return None;
            }
        };

        if expired {
            if let Some(entry) = state.entries.pop(key) {
                detach_dependents(&mut state.dependents, key, &entry);
            }
            state.misses += 1;
            return None;
        }

        state.hits += 1;
        state.entries.get(key).map(|entry| {
            let mut resolved = entry.resolved.clone();
            resolved.from_cache = true;
            resolved
        })
    }

    /// Store a resolution result and index every context in its chain.
    pub fn put(&self, resolved: &ResolvedContext, elapsed: Duration) {
        let key: CacheKey = (resolved.level, resolved.context_id.clone());
        let entry = CacheEntry {
            resolved: resolved.clone(),
            dependency_hash: resolved.dependency_hash(),
            inserted_at: Instant::now(),
        };

        let mut state = self.state.lock().expect("context cache poisoned");
        state.resolution_count += 1;
        state.resolution_total += elapsed;

        for link in &resolved.chain {
            state
                .dependents
                .entry(link.context_id.clone())
                .or_default()
                .insert(key.clone());
        }

        if let Some((evicted_key, evicted_entry)) = state.entries.push(key.clone(), entry) {
            if evicted_key != key {
                state.evictions += 1;
                detach_dependents(&mut state.dependents, &evicted_key, &evicted_entry);
            }
        }
    }

    /// Invalidate every entry whose chain includes `context_id`.
    ///
    /// Called synchronously after any write to that context commits.
    pub fn invalidate_dependents(&self, context_id: &str) -> usize {
        let mut state = self.state.lock().expect("context cache poisoned");
        let keys: Vec<CacheKey> = state
            .dependents
            .remove(context_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        let mut removed = 0;
        for key in keys {
            if let Some(entry) = state.entries.pop(&key) {
                removed += 1;
                detach_dependents(&mut state.dependents, &key, &entry);
            }
        }
        state.invalidations += removed as u64;
        removed
    }

    /// Drop a single entry without touching its downstream dependents.
    pub fn invalidate_key(&self, key: &CacheKey) -> bool {
        let mut state = self.state.lock().expect("context cache poisoned");
        match state.entries.pop(key) {
            Some(entry) => {
                detach_dependents(&mut state.dependents, key, &entry);
                state.invalidations += 1;
                true
            }
            None => false,
        }
    }

    /// Invalidate a batch of context ids (cascading deletes).
    pub fn invalidate_many(&self, context_ids: &[String]) -> usize {
        context_ids
            .iter()
            .map(|id| self.invalidate_dependents(id))
            .sum()
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut state = self.state.lock().expect("context cache poisoned");
        state.entries.clear();
        state.dependents.clear();
    }

    /// The dependency hash stored for a key, if cached.
    pub fn dependency_hash(&self, key: &CacheKey) -> Option<u64> {
        let mut state = self.state.lock().expect("context cache poisoned");
        state.entries.get(key).map(|entry| entry.dependency_hash)
    }

    /// Current counters.
    pub fn metrics(&self) -> CacheMetrics {
        let state = self.state.lock().expect("context cache poisoned");
        let lookups = state.hits + state.misses;
        let hit_ratio = if lookups == 0 {
            0.0
        } else {
            state.hits as f64 / lookups as f64
        };
        let mean_resolution_ms = if state.resolution_count == 0 {
            0.0
        } else {
            state.resolution_total.as_secs_f64() * 1000.0 / state.resolution_count as f64
        };
        CacheMetrics {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            invalidations: state.invalidations,
            hit_ratio,
            miss_ratio: if lookups == 0 { 0.0 } else { 1.0 - hit_ratio },
            mean_resolution_ms,
            len: state.entries.len(),
            capacity: self.capacity,
        }
    }
}

fn detach_dependents(
    dependents: &mut HashMap<String, HashSet<CacheKey>>,
    key: &CacheKey,
    entry: &CacheEntry,
) {
    for link in &entry.resolved.chain {
        if let Some(set) = dependents.get_mut(&link.context_id) {
            set.remove(key);
            if set.is_empty() {
                dependents.remove(&link.context_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChainLink, GLOBAL_SINGLETON_ID};
    use chrono::Utc;

    fn resolved(level: ContextLevel, id: &str, chain_ids: &[(ContextLevel, &str)]) -> ResolvedContext {
        ResolvedContext {
            level,
            context_id: id.to_string(),
            data: serde_json::json!({"k": id}),
            inheritance_chain: chain_ids.iter().map(|(l, _)| *l).collect(),
            chain: chain_ids
                .iter()
                .map(|(l, cid)| ChainLink {
                    level: *l,
                    context_id: cid.to_string(),
                    version: 1,
                })
                .collect(),
            from_cache: false,
            resolved_at: Utc::now(),
        }
    }

    fn task_chain<'a>(task_id: &'a str, branch_id: &'a str) -> Vec<(ContextLevel, &'a str)> {
        vec![
            (ContextLevel::Global, GLOBAL_SINGLETON_ID),
            (ContextLevel::Branch, branch_id),
            (ContextLevel::Task, task_id),
        ]
    }

    #[test]
    fn test_hit_after_put() {
        let cache = ContextCache::new(10, None);
        let r = resolved(ContextLevel::Task, "t1", &task_chain("t1", "b1"));
        cache.put(&r, Duration::from_millis(2));

        let hit = cache.get(&(ContextLevel::Task, "t1".to_string())).unwrap();
        assert!(hit.from_cache);
        assert_eq!(hit.data, serde_json::json!({"k": "t1"}));

        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 0);
        assert!(metrics.hit_ratio > 0.99);
    }

    #[test]
    fn test_miss_counted() {
        let cache = ContextCache::new(10, None);
        assert!(cache.get(&(ContextLevel::Task, "nope".to_string())).is_none());
        assert_eq!(cache.metrics().misses, 1);
    }

    #[test]
    fn test_invalidation_walks_dependency_index() {
        let cache = ContextCache::new(10, None);
        cache.put(
            &resolved(ContextLevel::Task, "t1", &task_chain("t1", "b1")),
            Duration::ZERO,
        );
        cache.put(
            &resolved(ContextLevel::Task, "t2", &task_chain("t2", "b1")),
            Duration::ZERO,
        );
        cache.put(
            &resolved(ContextLevel::Task, "t3", &task_chain("t3", "b2")),
            Duration::ZERO,
        );

        // A write to the shared branch context drops both dependents
        let removed = cache.invalidate_dependents("b1");
        assert_eq!(removed, 2);
        assert!(cache.get(&(ContextLevel::Task, "t1".to_string())).is_none());
        assert!(cache.get(&(ContextLevel::Task, "t2".to_string())).is_none());
        assert!(cache.get(&(ContextLevel::Task, "t3".to_string())).is_some());
    }

    #[test]
    fn test_invalidating_leaf_only_drops_leaf() {
        let cache = ContextCache::new(10, None);
        cache.put(
            &resolved(ContextLevel::Task, "t1", &task_chain("t1", "b1")),
            Duration::ZERO,
        );
        cache.put(
            &resolved(ContextLevel::Task, "t2", &task_chain("t2", "b1")),
            Duration::ZERO,
        );

        assert_eq!(cache.invalidate_dependents("t1"), 1);
        assert!(cache.get(&(ContextLevel::Task, "t2".to_string())).is_some());
    }

    #[test]
    fn test_lru_eviction_updates_index() {
        let cache = ContextCache::new(2, None);
        cache.put(
            &resolved(ContextLevel::Task, "t1", &task_chain("t1", "b1")),
            Duration::ZERO,
        );
        cache.put(
            &resolved(ContextLevel::Task, "t2", &task_chain("t2", "b1")),
            Duration::ZERO,
        );
        // t1 is the LRU entry and gets evicted
        cache.put(
            &resolved(ContextLevel::Task, "t3", &task_chain("t3", "b1")),
            Duration::ZERO,
        );

        assert_eq!(cache.metrics().evictions, 1);
        assert!(cache.get(&(ContextLevel::Task, "t1".to_string())).is_none());
        // Invalidating b1 only touches the two live entries
        assert_eq!(cache.invalidate_dependents("b1"), 2);
    }

    #[test]
    fn test_ttl_expiry_counts_as_miss() {
        let cache = ContextCache::new(10, Some(Duration::ZERO));
        cache.put(
            &resolved(ContextLevel::Task, "t1", &task_chain("t1", "b1")),
            Duration::ZERO,
        );
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&(ContextLevel::Task, "t1".to_string())).is_none());
        assert_eq!(cache.metrics().misses, 1);
    }

    #[test]
    fn test_dependency_hash_stored() {
        let cache = ContextCache::new(10, None);
        let r = resolved(ContextLevel::Task, "t1", &task_chain("t1", "b1"));
        cache.put(&r, Duration::ZERO);
        assert_eq!(
            cache.dependency_hash(&(ContextLevel::Task, "t1".to_string())),
            Some(r.dependency_hash())
        );
    }
}
