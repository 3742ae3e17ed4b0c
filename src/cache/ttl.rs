//! In-memory key/value store with per-entry expiry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

struct CacheEntry<V> {
  value: V,
  expires_at: Instant,
}

impl<V> CacheEntry<V> {
  fn is_live(&self, now: Instant) -> bool {
    now < self.expires_at
  }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
  pub entries: usize,
  pub hits: u64,
  pub misses: u64,
}

/// Thread-safe TTL cache.
///
/// Expiry is lazy: an expired entry is never returned by `get`, but it stays in
/// the map until `cleanup_expired` runs or the key is overwritten.
pub struct TtlCache<V> {
  entries: RwLock<HashMap<String, CacheEntry<V>>>,
  hits: AtomicU64,
  misses: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
  pub fn new() -> Self {
    Self {
      entries: RwLock::new(HashMap::new()),
      hits: AtomicU64::new(0),
      misses: AtomicU64::new(0),
    }
  }

  /// Get a live value for `key`.
  pub fn get(&self, key: &str) -> Option<V> {
    let now = Instant::now();
    let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

    match entries.get(key) {
      Some(entry) if entry.is_live(now) => {
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value.clone())
      }
      _ => {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
      }
    }
  }

  /// Store `value` under `key` for `ttl`, replacing any previous entry.
  pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
    let entry = CacheEntry {
      value,
      expires_at: Instant::now() + ttl,
    };
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    entries.insert(key.into(), entry);
  }

  /// Remove every key matching a glob pattern such as `simple_metrics_*`.
  /// Returns the number of entries removed.
  pub fn invalidate_pattern(&self, pattern: &str) -> usize {
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    let before = entries.len();
    entries.retain(|key, _| !glob_match(pattern, key));
    let removed = before - entries.len();

    debug!(pattern, removed, "Invalidated cache entries");
    removed
  }

  /// Drop entries whose TTL has passed. Returns the number removed.
  pub fn cleanup_expired(&self) -> usize {
    let now = Instant::now();
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    let before = entries.len();
    entries.retain(|_, entry| entry.is_live(now));
    before - entries.len()
  }

  pub fn stats(&self) -> CacheStats {
    let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
    CacheStats {
      entries: entries.len(),
      hits: self.hits.load(Ordering::Relaxed),
      misses: self.misses.load(Ordering::Relaxed),
    }
  }
}

impl<V: Clone> Default for TtlCache<V> {
  fn default() -> Self {
    Self::new()
  }
}

/// Match `key` against a pattern where `*` stands for any run of characters.
/// A pattern without `*` must match exactly.
fn glob_match(pattern: &str, key: &str) -> bool {
  let mut parts = pattern.split('*');

  // split always yields at least one item
  let first = parts.next().unwrap_or("");
  let Some(mut rest) = key.strip_prefix(first) else {
    return false;
  };

  let middle: Vec<&str> = parts.collect();
  let Some((last, middle)) = middle.split_last() else {
    return rest.is_empty();
  };

  for part in middle {
    match rest.find(part) {
      Some(idx) => rest = &rest[idx + part.len()..],
      None => return false,
    }
  }

  rest.len() >= last.len() && rest.ends_with(last)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[test]
  fn test_get_within_ttl() {
    let cache = TtlCache::new();
    cache.set("a", 42, Duration::from_secs(1));
    assert_eq!(cache.get("a"), Some(42));
  }

  #[test]
  fn test_get_after_ttl_is_absent() {
    let cache = TtlCache::new();
    cache.set("a", 42, Duration::from_millis(30));
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(cache.get("a"), None);
  }

  #[test]
  fn test_set_overwrites() {
    let cache = TtlCache::new();
    cache.set("a", 1, Duration::from_secs(5));
    cache.set("a", 2, Duration::from_secs(5));
    assert_eq!(cache.get("a"), Some(2));
    assert_eq!(cache.stats().entries, 1);
  }

  #[test]
  fn test_invalidate_pattern_only_touches_prefix() {
    let cache = TtlCache::new();
    let ttl = Duration::from_secs(60);
    cache.set("simple_metrics_abc", 1, ttl);
    cache.set("simple_metrics_def", 2, ttl);
    cache.set("technician_ranking_abc", 3, ttl);
    cache.set("metrics_baseline_abc", 4, ttl);

    let removed = cache.invalidate_pattern("simple_metrics_*");

    assert_eq!(removed, 2);
    assert_eq!(cache.get("simple_metrics_abc"), None);
    assert_eq!(cache.get("simple_metrics_def"), None);
    assert_eq!(cache.get("technician_ranking_abc"), Some(3));
    assert_eq!(cache.get("metrics_baseline_abc"), Some(4));
  }

  #[test]
  fn test_cleanup_expired_counts_and_is_idempotent() {
    let cache = TtlCache::new();
    cache.set("short", 1, Duration::from_millis(10));
    cache.set("long", 2, Duration::from_secs(60));
    std::thread::sleep(Duration::from_millis(30));

    assert_eq!(cache.cleanup_expired(), 1);
    assert_eq!(cache.cleanup_expired(), 0);
    assert_eq!(cache.get("long"), Some(2));
  }

  #[test]
  fn test_hit_and_miss_counters() {
    let cache = TtlCache::new();
    cache.set("a", "x".to_string(), Duration::from_secs(5));
    let _ = cache.get("a");
    let _ = cache.get("b");
    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
  }

  #[test]
  fn test_concurrent_access() {
    let cache = Arc::new(TtlCache::new());
    let handles: Vec<_> = (0..8)
      .map(|t| {
        let cache = Arc::clone(&cache);
        std::thread::spawn(move || {
          for i in 0..200 {
            let key = format!("k{}", i % 20);
            cache.set(key.clone(), t * 1000 + i, Duration::from_secs(5));
            let _ = cache.get(&key);
            if i % 50 == 0 {
              cache.cleanup_expired();
            }
          }
        })
      })
      .collect();

    for handle in handles {
      handle.join().unwrap();
    }
    assert_eq!(cache.stats().entries, 20);
  }

  #[test]
  fn test_glob_match() {
    assert!(glob_match("simple_metrics_*", "simple_metrics_"));
    assert!(glob_match("simple_metrics_*", "simple_metrics_123"));
    assert!(!glob_match("simple_metrics_*", "xsimple_metrics_123"));
    assert!(glob_match("*_abc", "ranking_abc"));
    assert!(glob_match("a*b*c", "a-x-b-y-c"));
    assert!(!glob_match("a*b*c", "a-x-c"));
    assert!(glob_match("exact", "exact"));
    assert!(!glob_match("exact", "exactly"));
    assert!(glob_match("*", "anything"));
    assert!(!glob_match("ab*ba", "aba"));
  }
}
