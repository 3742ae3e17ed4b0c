//! Generic in-memory caching.
//!
//! This module provides a domain-agnostic caching mechanism that:
//! - Stores values with a per-entry TTL (lazy expiry plus an eager sweep)
//! - Supports glob-prefix invalidation such as `simple_metrics_*`
//! - Layers cache-first fetching over any async upstream call
//! - Keeps hot keys warm from a cancellable background task

mod layer;
mod traits;
mod ttl;
pub mod warming;

pub use layer::CacheLayer;
pub use traits::CacheResult;
pub use ttl::{CacheStats, TtlCache};
