use std::collections::BTreeMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::state::{Adjustment, Observation, PaginationState};
use crate::config::PaginationConfig;
use crate::error::Result;
use crate::glpi::types::SearchResult;

/// Aggregate view of the engine, for observability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
  pub entities: usize,
  pub fallback_triggered: usize,
  /// optimal_range -> number of entities currently using it
  pub range_distribution: BTreeMap<usize, usize>,
  pub average_range: f64,
}

/// Learns, per entity, the page size that neither truncates nor over-fetches.
///
/// State lives in a sharded map: updates to one entity are atomic, and
/// different entities never contend on the same lock. No lock is held while
/// the fetch itself runs.
pub struct AdaptivePaginationEngine {
  states: DashMap<String, PaginationState>,
  config: PaginationConfig,
}

impl AdaptivePaginationEngine {
  pub fn new(config: PaginationConfig) -> Self {
    Self {
      states: DashMap::new(),
      config,
    }
  }

  pub fn config(&self) -> &PaginationConfig {
    &self.config
  }

  /// Page size the next fetch for `entity_id` would request.
  pub fn range_for(&self, entity_id: &str) -> usize {
    self
      .states
      .get(entity_id)
      .map(|state| state.optimal_range)
      .unwrap_or_else(|| self.config.clamp(self.config.default_range))
  }

  /// Fetch one page for `entity_id` at its current optimal range, then
  /// update the belief from what came back. The result is returned unchanged.
  pub async fn fetch_page<R, F, Fut>(
    &self,
    entity_id: &str,
    display_name: &str,
    fetch_fn: F,
  ) -> Result<SearchResult<R>>
  where
    F: FnOnce(usize) -> Fut,
    Fut: Future<Output = Result<SearchResult<R>>>,
  {
    let requested = {
      let state = self
        .states
        .entry(entity_id.to_string())
        .or_insert_with(|| PaginationState::new(entity_id, display_name, &self.config));
      state.optimal_range
    };

    let result = fetch_fn(requested).await?;

    let observation = Observation {
      requested,
      count: result.count,
      total_count: result.total_count,
      is_partial: result.is_partial,
    };
    self.record(entity_id, display_name, observation, Utc::now());

    Ok(result)
  }

  fn record(&self, entity_id: &str, display_name: &str, obs: Observation, now: DateTime<Utc>) {
    // a cleanup sweep may have dropped the entry while the fetch ran
    let mut state = self
      .states
      .entry(entity_id.to_string())
      .or_insert_with(|| PaginationState::new(entity_id, display_name, &self.config));

    match state.observe(obs, &self.config, now) {
      Adjustment::Grew { from, to } => {
        debug!(entity_id, from, to, total = obs.total_count, "Page range grown")
      }
      Adjustment::Shrank { from, to } => {
        debug!(entity_id, from, to, count = obs.count, "Page range shrunk")
      }
      Adjustment::FellBack { to } => warn!(
        entity_id,
        range = to,
        streak = state.consecutive_truncations,
        "Repeated truncation, holding conservative page range"
      ),
      Adjustment::Unchanged => {}
    }
  }

  /// Drop states not updated within the staleness horizon.
  pub fn cleanup_old_entries(&self) {
    let horizon = chrono::Duration::from_std(self.config.stale_after())
      .unwrap_or_else(|_| chrono::Duration::hours(1));
    self.cleanup_before(Utc::now() - horizon);
  }

  fn cleanup_before(&self, cutoff: DateTime<Utc>) {
    let before = self.states.len();
    self.states.retain(|_, state| state.last_updated >= cutoff);
    let removed = before.saturating_sub(self.states.len());
    if removed > 0 {
      info!(removed, "Dropped stale pagination states");
    }
  }

  pub fn len(&self) -> usize {
    self.states.len()
  }

  /// Snapshot of one entity's state.
  pub fn detail(&self, entity_id: &str) -> Option<PaginationState> {
    self.states.get(entity_id).map(|state| state.clone())
  }

  pub fn entity_ids(&self) -> Vec<String> {
    let mut ids: Vec<String> = self.states.iter().map(|e| e.key().clone()).collect();
    ids.sort();
    ids
  }

  pub fn get_stats(&self) -> EngineStats {
    let mut range_distribution = BTreeMap::new();
    let mut fallback_triggered = 0;
    let mut sum = 0usize;

    for entry in self.states.iter() {
      *range_distribution.entry(entry.optimal_range).or_insert(0) += 1;
      if entry.fallback_triggered {
        fallback_triggered += 1;
      }
      sum += entry.optimal_range;
    }

    let entities: usize = range_distribution.values().sum();
    EngineStats {
      entities,
      fallback_triggered,
      range_distribution,
      average_range: if entities == 0 {
        0.0
      } else {
        sum as f64 / entities as f64
      },
    }
  }

  #[cfg(test)]
  fn backdate(&self, entity_id: &str, at: DateTime<Utc>) {
    if let Some(mut state) = self.states.get_mut(entity_id) {
      state.last_updated = at;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Error;
  use std::sync::Arc;

  fn page(count: usize, total_count: usize) -> SearchResult<()> {
    SearchResult {
      records: vec![(); count],
      count,
      total_count,
      is_partial: false,
    }
  }

  fn engine() -> AdaptivePaginationEngine {
    AdaptivePaginationEngine::new(PaginationConfig::default())
  }

  #[tokio::test]
  async fn test_unseen_entity_requests_default() {
    let engine = engine();
    let mut seen = 0;
    engine
      .fetch_page("tech:1", "Alice", |range| {
        seen = range;
        async move { Ok(page(10, 10)) }
      })
      .await
      .unwrap();
    assert_eq!(seen, 50);
    assert_eq!(engine.len(), 1);
  }

  #[tokio::test]
  async fn test_truncation_scenario() {
    let engine = engine();

    let first = engine
      .fetch_page("E1", "E1", |range| async move { Ok(page(range, 200)) })
      .await
      .unwrap();
    assert_eq!(first.count, 50);
    assert_eq!(engine.range_for("E1"), 75);

    engine
      .fetch_page("E1", "E1", |range| async move { Ok(page(range, 200)) })
      .await
      .unwrap();
    let state = engine.detail("E1").unwrap();
    assert!(state.fallback_triggered);
    assert_eq!(state.optimal_range, 50);

    engine
      .fetch_page("E1", "E1", |_| async move { Ok(page(20, 20)) })
      .await
      .unwrap();
    assert!(!engine.detail("E1").unwrap().fallback_triggered);
  }

  #[tokio::test]
  async fn test_result_is_returned_unchanged() {
    let engine = engine();
    let result = engine
      .fetch_page("E1", "E1", |_| async move {
        Ok(SearchResult {
          records: vec![1, 2, 3],
          count: 3,
          total_count: 900,
          is_partial: true,
        })
      })
      .await
      .unwrap();
    assert_eq!(result.records, vec![1, 2, 3]);
    assert_eq!(result.total_count, 900);
    assert!(result.is_partial);
  }

  #[tokio::test]
  async fn test_failed_fetch_leaves_state_alone() {
    let engine = engine();
    let result: Result<SearchResult<()>> = engine
      .fetch_page("E1", "E1", |_| async move { Err(Error::unavailable(None, "timeout")) })
      .await;
    assert!(result.is_err());

    let state = engine.detail("E1").unwrap();
    assert!(state.history.is_empty());
    assert_eq!(state.optimal_range, 50);
  }

  #[tokio::test]
  async fn test_history_after_six_fetches() {
    let engine = engine();
    for count in [30, 31, 32, 33, 34, 35] {
      engine
        .fetch_page("E1", "E1", |_| async move { Ok(page(count, count)) })
        .await
        .unwrap();
    }
    let counts: Vec<usize> = engine
      .detail("E1")
      .unwrap()
      .history
      .iter()
      .map(|h| h.count)
      .collect();
    assert_eq!(counts, vec![31, 32, 33, 34, 35]);
  }

  #[tokio::test]
  async fn test_cleanup_removes_only_stale_states() {
    let engine = engine();
    for id in ["old", "fresh"] {
      engine
        .fetch_page(id, id, |_| async move { Ok(page(40, 40)) })
        .await
        .unwrap();
    }
    engine.backdate("old", Utc::now() - chrono::Duration::hours(2));

    engine.cleanup_old_entries();

    assert!(engine.detail("old").is_none());
    assert!(engine.detail("fresh").is_some());
  }

  #[tokio::test]
  async fn test_cleanup_boundary() {
    let engine = engine();
    for id in ["before", "at", "after"] {
      engine
        .fetch_page(id, id, |_| async move { Ok(page(40, 40)) })
        .await
        .unwrap();
    }
    let cutoff = Utc::now() - chrono::Duration::minutes(30);
    engine.backdate("before", cutoff - chrono::Duration::seconds(1));
    engine.backdate("at", cutoff);
    engine.backdate("after", cutoff + chrono::Duration::seconds(1));

    engine.cleanup_before(cutoff);

    assert_eq!(engine.entity_ids(), vec!["after".to_string(), "at".to_string()]);
  }

  #[tokio::test]
  async fn test_stats_do_not_mutate() {
    let engine = engine();
    engine
      .fetch_page("a", "a", |r| async move { Ok(page(r, 1_000)) })
      .await
      .unwrap();
    engine
      .fetch_page("a", "a", |r| async move { Ok(page(r, 1_000)) })
      .await
      .unwrap();
    engine
      .fetch_page("b", "b", |_| async move { Ok(page(40, 40)) })
      .await
      .unwrap();

    let stats = engine.get_stats();
    assert_eq!(stats.entities, 2);
    assert_eq!(stats.fallback_triggered, 1);
    assert_eq!(stats.range_distribution.get(&50), Some(&2));
    assert_eq!(stats.average_range, 50.0);
    assert_eq!(engine.get_stats(), stats);
  }

  #[tokio::test]
  async fn test_concurrent_entities() {
    let engine = Arc::new(engine());
    let handles: Vec<_> = (0..16)
      .map(|i| {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
          let id = format!("tech:{}", i % 4);
          for round in 0..10 {
            let total = (i * 37 + round * 11) % 300;
            engine
              .fetch_page(&id, &id, |r| async move { Ok(page(total.min(r), total)) })
              .await
              .unwrap();
          }
        })
      })
      .collect();

    for handle in handles {
      handle.await.unwrap();
    }

    assert_eq!(engine.len(), 4);
    for id in engine.entity_ids() {
      let state = engine.detail(&id).unwrap();
      assert!(state.history.len() <= 5);
      assert!((10..=1000).contains(&state.optimal_range));
    }
  }
}
