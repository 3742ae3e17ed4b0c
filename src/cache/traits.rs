//! Core types shared by the cache layer.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone, Serialize)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was fetched from upstream
  pub fetched_at: DateTime<Utc>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh upstream data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      fetched_at: Utc::now(),
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, fetched_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      fetched_at,
    }
  }

  pub fn is_cached(&self) -> bool {
    self.source == CacheSource::Cache
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
  /// Fresh data from upstream (the cache missed)
  Network,
  /// Data served from cache within its TTL
  Cache,
}

/// A cached value stamped with the time it was fetched.
#[derive(Debug, Clone)]
pub struct Stamped<T> {
  pub value: T,
  pub fetched_at: DateTime<Utc>,
}
