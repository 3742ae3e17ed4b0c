//! Cache keys for aggregation results.

use sha2::{Digest, Sha256};

use super::filters::DashboardFilters;

pub const DASHBOARD_PREFIX: &str = "simple_metrics_";
pub const BASELINE_PREFIX: &str = "metrics_baseline_";
pub const RANKING_PREFIX: &str = "technician_ranking_";
pub const TECHNICIAN_NAME_PREFIX: &str = "technician_name_";

/// Query key types for aggregation results.
#[derive(Debug, Clone)]
pub enum MetricsKey<'a> {
  /// Level-bucketed counts for a filter set
  Dashboard(&'a DashboardFilters),
  /// Previous aggregation for the same filter set, used for trends
  Baseline(&'a DashboardFilters),
  Ranking(&'a DashboardFilters),
  TechnicianName(u64),
}

impl MetricsKey<'_> {
  /// Prefix plus a short digest of the filter set, e.g. `simple_metrics_3fa1...`.
  pub fn cache_key(&self) -> String {
    let (prefix, input) = match self {
      Self::Dashboard(filters) => (DASHBOARD_PREFIX, filters.describe()),
      Self::Baseline(filters) => (BASELINE_PREFIX, filters.describe()),
      Self::Ranking(filters) => (RANKING_PREFIX, filters.describe()),
      Self::TechnicianName(id) => return format!("{}{}", TECHNICIAN_NAME_PREFIX, id),
    };

    // SHA256 for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}{}", prefix, &digest[..16])
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::metrics::filters::RawFilters;

  #[test]
  fn test_same_filters_same_key() {
    let a = RawFilters {
      levels: vec!["n2".into(), "n1".into()],
      ..RawFilters::default()
    }
    .parse()
    .unwrap();
    let b = RawFilters {
      levels: vec!["N1".into(), "N2".into()],
      ..RawFilters::default()
    }
    .parse()
    .unwrap();

    assert_eq!(
      MetricsKey::Dashboard(&a).cache_key(),
      MetricsKey::Dashboard(&b).cache_key()
    );
  }

  #[test]
  fn test_prefixes_differ_per_kind() {
    let filters = DashboardFilters::default();
    let dashboard = MetricsKey::Dashboard(&filters).cache_key();
    let baseline = MetricsKey::Baseline(&filters).cache_key();

    assert!(dashboard.starts_with("simple_metrics_"));
    assert!(baseline.starts_with("metrics_baseline_"));
    assert_eq!(dashboard.len(), DASHBOARD_PREFIX.len() + 16);
    assert_eq!(MetricsKey::TechnicianName(7).cache_key(), "technician_name_7");
  }
}
