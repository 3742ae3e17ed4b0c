//! Cache layer that orchestrates cache lookups with upstream fetching.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::traits::{CacheResult, Stamped};
use super::ttl::{CacheStats, TtlCache};
use crate::error::Result;

/// Cache-first access to a shared `TtlCache` with a fixed TTL tier.
///
/// Several layers can share one store (each with its own TTL), so that
/// pattern invalidation on the store reaches every tier.
pub struct CacheLayer<V> {
  store: Arc<TtlCache<Stamped<V>>>,
  ttl: Duration,
}

impl<V: Clone> CacheLayer<V> {
  pub fn new(store: Arc<TtlCache<Stamped<V>>>, ttl: Duration) -> Self {
    Self { store, ttl }
  }

  /// Same store, different TTL tier.
  pub fn with_ttl(&self, ttl: Duration) -> Self {
    Self {
      store: Arc::clone(&self.store),
      ttl,
    }
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Check cache - if live, return immediately
  /// 2. On miss, fetch from upstream
  /// 3. Store the fresh value; errors are never cached
  pub async fn fetch<F, Fut>(&self, key: &str, fetcher: F) -> Result<CacheResult<V>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V>>,
  {
    if let Some(cached) = self.store.get(key) {
      debug!(key, "Cache hit");
      return Ok(CacheResult::from_cache(cached.value, cached.fetched_at));
    }

    debug!(key, "Cache miss, fetching from upstream");
    self.refresh(key, fetcher).await
  }

  /// Fetch from upstream unconditionally and overwrite the cached value.
  pub async fn refresh<F, Fut>(&self, key: &str, fetcher: F) -> Result<CacheResult<V>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V>>,
  {
    let data = fetcher().await?;
    let result = CacheResult::from_network(data);
    self.put(key, result.data.clone());
    Ok(result)
  }

  /// Peek at a live value without fetching.
  pub fn get(&self, key: &str) -> Option<V> {
    self.store.get(key).map(|stamped| stamped.value)
  }

  pub fn put(&self, key: &str, value: V) {
    let stamped = Stamped {
      value,
      fetched_at: chrono::Utc::now(),
    };
    self.store.set(key, stamped, self.ttl);
  }

  pub fn invalidate_pattern(&self, pattern: &str) -> usize {
    self.store.invalidate_pattern(pattern)
  }

  pub fn cleanup_expired(&self) -> usize {
    self.store.cleanup_expired()
  }

  pub fn stats(&self) -> CacheStats {
    self.store.stats()
  }
}

impl<V> Clone for CacheLayer<V> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      ttl: self.ttl,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Error;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn layer() -> CacheLayer<u32> {
    CacheLayer::new(Arc::new(TtlCache::new()), Duration::from_secs(60))
  }

  #[tokio::test]
  async fn test_second_fetch_is_served_from_cache() {
    let layer = layer();
    let calls = AtomicUsize::new(0);

    let first = layer
      .fetch("k", || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(7)
      })
      .await
      .unwrap();
    let second = layer
      .fetch("k", || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(8)
      })
      .await
      .unwrap();

    assert!(!first.is_cached());
    assert!(second.is_cached());
    assert_eq!(second.data, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_errors_are_not_cached() {
    let layer = layer();
    let result = layer
      .fetch("k", || async { Err(Error::unavailable(Some(503), "down")) })
      .await;
    assert!(result.is_err());
    assert_eq!(layer.get("k"), None);
  }

  #[tokio::test]
  async fn test_refresh_overwrites() {
    let layer = layer();
    layer.put("k", 1);
    let refreshed = layer.refresh("k", || async { Ok(2) }).await.unwrap();
    assert_eq!(refreshed.data, 2);
    assert_eq!(layer.get("k"), Some(2));
  }

  #[test]
  fn test_tiers_share_store() {
    let short = layer();
    let long = short.with_ttl(Duration::from_secs(600));
    long.put("simple_metrics_x", 1);
    assert_eq!(short.invalidate_pattern("simple_metrics_*"), 1);
    assert_eq!(long.get("simple_metrics_x"), None);
  }
}
