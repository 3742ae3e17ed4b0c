use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use tracing::{info, warn};

use super::filters::{DashboardFilters, RawFilters};
use super::keys::MetricsKey;
use crate::cache::{CacheLayer, CacheResult, CacheStats, TtlCache};
use crate::config::{CacheConfig, LevelsConfig};
use crate::error::Result;
use crate::glpi::client::{GlpiClient, SearchQuery, SearchType};
use crate::glpi::types::{EntityType, Level, PageRange, StatusBucket, Ticket, TicketRecord, User};
use crate::pagination::AdaptivePaginationEngine;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
  pub new: usize,
  pub pending: usize,
  pub in_progress: usize,
  pub resolved: usize,
}

impl StatusCounts {
  pub fn from_tickets<'a>(tickets: impl IntoIterator<Item = &'a TicketRecord>) -> Self {
    let mut counts = Self::default();
    for ticket in tickets {
      counts.add(ticket.status);
    }
    counts
  }

  pub fn add(&mut self, bucket: StatusBucket) {
    match bucket {
      StatusBucket::New => self.new += 1,
      StatusBucket::Pending => self.pending += 1,
      StatusBucket::InProgress => self.in_progress += 1,
      StatusBucket::Resolved => self.resolved += 1,
    }
  }

  pub fn merge(&mut self, other: &StatusCounts) {
    self.new += other.new;
    self.pending += other.pending;
    self.in_progress += other.in_progress;
    self.resolved += other.resolved;
  }

  pub fn total(&self) -> usize {
    self.new + self.pending + self.in_progress + self.resolved
  }
}

/// Signed change since the previous aggregation, e.g. "+12", "-3", "0".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trends {
  pub new: String,
  pub pending: String,
  pub in_progress: String,
  pub resolved: String,
  pub total: String,
}

impl Trends {
  pub fn between(current: &StatusCounts, previous: Option<&StatusCounts>) -> Self {
    let delta = |now: usize, before: Option<usize>| match before {
      Some(before) => format_delta(now as i64 - before as i64),
      None => "0".to_string(),
    };
    Self {
      new: delta(current.new, previous.map(|p| p.new)),
      pending: delta(current.pending, previous.map(|p| p.pending)),
      in_progress: delta(current.in_progress, previous.map(|p| p.in_progress)),
      resolved: delta(current.resolved, previous.map(|p| p.resolved)),
      total: delta(current.total(), previous.map(|p| p.total())),
    }
  }
}

fn format_delta(delta: i64) -> String {
  if delta > 0 {
    format!("+{}", delta)
  } else {
    delta.to_string()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardMetrics {
  /// Filter set this aggregation answers
  pub filters: String,
  pub levels: BTreeMap<Level, StatusCounts>,
  pub totals: StatusCounts,
  pub trends: Trends,
  pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingEntry {
  pub technician_id: u64,
  pub name: String,
  pub counts: StatusCounts,
  pub total: usize,
}

/// Turns paginated ticket searches into dashboard numbers.
///
/// Cache tiers: dashboard counts use the short TTL, rankings and technician
/// names the long one, trend baselines the baseline TTL.
pub struct MetricsAggregator {
  client: GlpiClient,
  engine: Arc<AdaptivePaginationEngine>,
  metrics: CacheLayer<DashboardMetrics>,
  baselines: CacheLayer<DashboardMetrics>,
  rankings: CacheLayer<Vec<RankingEntry>>,
  names: CacheLayer<String>,
  levels: LevelsConfig,
  technicians: Vec<u64>,
}

impl MetricsAggregator {
  pub fn new(
    client: GlpiClient,
    engine: Arc<AdaptivePaginationEngine>,
    cache: &CacheConfig,
    levels: LevelsConfig,
    technicians: Vec<u64>,
  ) -> Self {
    let metrics = CacheLayer::new(Arc::new(TtlCache::new()), cache.metrics_ttl());
    let baselines = metrics.with_ttl(cache.baseline_ttl());
    let rankings = CacheLayer::new(Arc::new(TtlCache::new()), cache.ranking_ttl());
    let names = CacheLayer::new(Arc::new(TtlCache::new()), cache.ranking_ttl());

    Self {
      client,
      engine,
      metrics,
      baselines,
      rankings,
      names,
      levels,
      technicians,
    }
  }

  pub fn engine(&self) -> &Arc<AdaptivePaginationEngine> {
    &self.engine
  }

  /// Level-bucketed counts for a filter set, from cache when possible.
  /// Filters are validated before anything is sent upstream.
  pub async fn dashboard_metrics(&self, raw: &RawFilters) -> Result<CacheResult<DashboardMetrics>> {
    let filters = raw.parse()?;
    let key = MetricsKey::Dashboard(&filters).cache_key();
    self
      .metrics
      .fetch(&key, || self.compute_dashboard(&filters))
      .await
  }

  /// Recompute and overwrite the cached dashboard for a filter set.
  pub async fn refresh_dashboard(&self, filters: &DashboardFilters) -> Result<DashboardMetrics> {
    let key = MetricsKey::Dashboard(filters).cache_key();
    let result = self
      .metrics
      .refresh(&key, || self.compute_dashboard(filters))
      .await?;
    Ok(result.data)
  }

  pub async fn technician_ranking(
    &self,
    raw: &RawFilters,
  ) -> Result<CacheResult<Vec<RankingEntry>>> {
    let filters = raw.parse()?;
    let key = MetricsKey::Ranking(&filters).cache_key();
    self
      .rankings
      .fetch(&key, || self.compute_ranking(&filters))
      .await
  }

  pub async fn refresh_ranking(&self, filters: &DashboardFilters) -> Result<Vec<RankingEntry>> {
    let key = MetricsKey::Ranking(filters).cache_key();
    let result = self
      .rankings
      .refresh(&key, || self.compute_ranking(filters))
      .await?;
    Ok(result.data)
  }

  pub async fn ticket(&self, id: u64) -> Result<Option<Ticket>> {
    self.client.get_item(EntityType::Ticket, id).await
  }

  /// Remove cached entries matching `pattern` from every tier.
  pub fn invalidate_pattern(&self, pattern: &str) -> usize {
    self.metrics.invalidate_pattern(pattern)
      + self.rankings.invalidate_pattern(pattern)
      + self.names.invalidate_pattern(pattern)
  }

  pub fn cleanup_expired(&self) -> usize {
    self.metrics.cleanup_expired() + self.rankings.cleanup_expired() + self.names.cleanup_expired()
  }

  pub fn cache_stats(&self) -> BTreeMap<&'static str, CacheStats> {
    BTreeMap::from([
      ("metrics", self.metrics.stats()),
      ("rankings", self.rankings.stats()),
      ("names", self.names.stats()),
    ])
  }

  async fn compute_dashboard(&self, filters: &DashboardFilters) -> Result<DashboardMetrics> {
    let per_level = try_join_all(filters.levels.iter().map(|&level| async move {
      let group = self.levels.group_for(level);
      let query = filters.apply_dates(
        SearchQuery::new().and(self.client.fields().group, SearchType::Equals, group),
        self.client.fields(),
      );
      let entity_id = format!("level:{}", level);
      let tickets = self.collect_tickets(&entity_id, level.as_str(), &query).await?;
      Ok::<_, crate::error::Error>((level, StatusCounts::from_tickets(&tickets)))
    }))
    .await?;

    let mut totals = StatusCounts::default();
    for (_, counts) in &per_level {
      totals.merge(counts);
    }

    let baseline_key = MetricsKey::Baseline(filters).cache_key();
    let previous = self.baselines.get(&baseline_key);
    let trends = Trends::between(&totals, previous.as_ref().map(|p| &p.totals));

    let metrics = DashboardMetrics {
      filters: filters.describe(),
      levels: per_level.into_iter().collect(),
      totals,
      trends,
      generated_at: Utc::now(),
    };
    self.baselines.put(&baseline_key, metrics.clone());

    info!(
      filters = %metrics.filters,
      total = metrics.totals.total(),
      "Dashboard metrics aggregated"
    );
    Ok(metrics)
  }

  async fn compute_ranking(&self, filters: &DashboardFilters) -> Result<Vec<RankingEntry>> {
    if self.technicians.is_empty() {
      warn!("No technicians configured for ranking");
    }

    let mut ranking = try_join_all(self.technicians.iter().map(|&id| async move {
      let name = self.technician_name(id).await;
      let query = filters.apply_dates(
        SearchQuery::new().and(self.client.fields().technician, SearchType::Equals, id),
        self.client.fields(),
      );
      let tickets = self
        .collect_tickets(&format!("tech:{}", id), &name, &query)
        .await?;
      let counts = StatusCounts::from_tickets(&tickets);
      Ok::<_, crate::error::Error>(RankingEntry {
        technician_id: id,
        name,
        total: counts.total(),
        counts,
      })
    }))
    .await?;

    ranking.sort_by(|a, b| {
      b.total
        .cmp(&a.total)
        .then(a.technician_id.cmp(&b.technician_id))
    });
    Ok(ranking)
  }

  /// Display name for a technician; falls back to `#id` when the lookup fails.
  async fn technician_name(&self, id: u64) -> String {
    let key = MetricsKey::TechnicianName(id).cache_key();
    let result = self
      .names
      .fetch(&key, || async move {
        let user: Option<User> = self.client.get_item(EntityType::User, id).await?;
        Ok(user.map_or_else(|| format!("#{}", id), |u| u.display_name()))
      })
      .await;

    match result {
      Ok(name) => name.data,
      Err(e) => {
        warn!(technician = id, "Failed to resolve technician name: {}", e);
        format!("#{}", id)
      }
    }
  }

  /// First page through the engine; if it came back truncated, fetch the
  /// remaining windows directly so counts are complete.
  async fn collect_tickets(
    &self,
    entity_id: &str,
    display_name: &str,
    query: &SearchQuery,
  ) -> Result<Vec<TicketRecord>> {
    let first = self
      .engine
      .fetch_page(entity_id, display_name, |range| {
        self.client.search_tickets(query, PageRange::first(range))
      })
      .await?;

    let total = first.total_count;
    let mut fetched = first.count;
    let mut tickets = first.records;

    let size = self.engine.range_for(entity_id);
    let mut window = PageRange {
      start: fetched,
      size,
    };
    let mut pages = 1;

    while fetched < total && pages < self.engine.config().max_pages {
      let page = self.client.search_tickets(query, window).await?;
      if page.count == 0 {
        break;
      }
      fetched = fetched.saturating_add(page.count);
      tickets.extend(page.records);
      window = PageRange {
        start: fetched,
        size,
      };
      pages += 1;
    }

    if fetched < total {
      warn!(
        entity_id,
        fetched, total, "Stopped before the end of the result set, counts are partial"
      );
    }
    Ok(tickets)
  }
}
