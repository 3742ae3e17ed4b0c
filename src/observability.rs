//! Operator-facing payloads for the pagination engine and caches.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::CacheStats;
use crate::metrics::MetricsAggregator;
use crate::pagination::{AdaptivePaginationEngine, EngineStats, HistoryEntry};

#[derive(Debug, Clone, Serialize)]
pub struct PaginationDetail {
  pub entity_id: String,
  pub name: String,
  pub last_range: usize,
  pub last_count: usize,
  pub optimal_range: usize,
  pub fallback_triggered: bool,
  pub history: Vec<HistoryEntry>,
  pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
  pub before: usize,
  pub after: usize,
  pub removed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
  pub pagination: EngineStats,
  pub caches: BTreeMap<&'static str, CacheStats>,
}

pub fn pagination_stats(engine: &AdaptivePaginationEngine) -> EngineStats {
  engine.get_stats()
}

pub fn pagination_detail(
  engine: &AdaptivePaginationEngine,
  entity_id: &str,
) -> Option<PaginationDetail> {
  engine.detail(entity_id).map(|state| PaginationDetail {
    entity_id: state.entity_id,
    name: state.display_name,
    last_range: state.last_range,
    last_count: state.last_count,
    optimal_range: state.optimal_range,
    fallback_triggered: state.fallback_triggered,
    history: state.history.into_iter().collect(),
    last_updated: state.last_updated,
  })
}

/// Run the staleness sweep and report entity counts around it.
pub fn trigger_cleanup(engine: &AdaptivePaginationEngine) -> CleanupReport {
  let before = engine.len();
  engine.cleanup_old_entries();
  let after = engine.len();
  CleanupReport {
    before,
    after,
    removed: before.saturating_sub(after),
  }
}

pub fn snapshot(aggregator: &MetricsAggregator) -> Snapshot {
  Snapshot {
    pagination: pagination_stats(aggregator.engine()),
    caches: aggregator.cache_stats(),
  }
}
