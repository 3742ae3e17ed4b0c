//! Per-entity pagination belief and the update rule applied after each fetch.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::PaginationConfig;

/// One past fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
  pub range: usize,
  pub count: usize,
  pub timestamp: DateTime<Utc>,
}

/// What a fetch told us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
  pub requested: usize,
  pub count: usize,
  pub total_count: usize,
  pub is_partial: bool,
}

impl Observation {
  /// Upstream had more rows than the page carried.
  pub fn is_truncated(&self) -> bool {
    self.is_partial || (self.count >= self.requested && self.total_count > self.requested)
  }

  /// Less than half the requested page was used.
  fn is_overfetch(&self) -> bool {
    self.count.saturating_mul(2) < self.requested
  }
}

/// How the belief moved after an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
  Grew { from: usize, to: usize },
  Shrank { from: usize, to: usize },
  FellBack { to: usize },
  Unchanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginationState {
  pub entity_id: String,
  pub display_name: String,
  pub last_range: usize,
  pub last_count: usize,
  pub optimal_range: usize,
  pub fallback_triggered: bool,
  /// Truncated fetches in a row; reset by any complete fetch
  pub consecutive_truncations: u32,
  pub history: VecDeque<HistoryEntry>,
  pub last_updated: DateTime<Utc>,
}

impl PaginationState {
  pub fn new(entity_id: &str, display_name: &str, config: &PaginationConfig) -> Self {
    Self {
      entity_id: entity_id.to_string(),
      display_name: display_name.to_string(),
      last_range: 0,
      last_count: 0,
      optimal_range: config.clamp(config.default_range),
      fallback_triggered: false,
      consecutive_truncations: 0,
      history: VecDeque::with_capacity(config.history_len + 1),
      last_updated: Utc::now(),
    }
  }

  /// Fold one observation into the state.
  ///
  /// Truncation grows the range multiplicatively; the `fallback_threshold`-th
  /// truncation in a row pins it to `fallback_range` instead. A page less than
  /// half used shrinks it. `optimal_range` always ends within
  /// `[min_range, max_range]`.
  pub fn observe(
    &mut self,
    obs: Observation,
    config: &PaginationConfig,
    now: DateTime<Utc>,
  ) -> Adjustment {
    let before = self.optimal_range;

    let adjustment = if obs.is_truncated() {
      self.consecutive_truncations = self.consecutive_truncations.saturating_add(1);

      if self.consecutive_truncations >= config.fallback_threshold {
        self.fallback_triggered = true;
        self.optimal_range = config.clamp(config.fallback_range);
        Adjustment::FellBack {
          to: self.optimal_range,
        }
      } else {
        let grown = (obs.requested as f64 * config.growth_factor).ceil() as usize;
        self.optimal_range = config.clamp(grown.max(obs.requested));
        changed(before, self.optimal_range)
      }
    } else {
      self.consecutive_truncations = 0;
      self.fallback_triggered = false;

      if obs.is_overfetch() && obs.requested > config.min_range {
        let shrunk = (obs.requested as f64 * config.shrink_factor).floor() as usize;
        self.optimal_range = config.clamp(shrunk);
      } else {
        self.optimal_range = config.clamp(self.optimal_range);
      }
      changed(before, self.optimal_range)
    };

    self.history.push_back(HistoryEntry {
      range: obs.requested,
      count: obs.count,
      timestamp: now,
    });
    while self.history.len() > config.history_len {
      self.history.pop_front();
    }

    self.last_range = obs.requested;
    self.last_count = obs.count;
    self.last_updated = now;

    adjustment
  }
}

fn changed(from: usize, to: usize) -> Adjustment {
  match to.cmp(&from) {
    std::cmp::Ordering::Greater => Adjustment::Grew { from, to },
    std::cmp::Ordering::Less => Adjustment::Shrank { from, to },
    std::cmp::Ordering::Equal => Adjustment::Unchanged,
  }
}
