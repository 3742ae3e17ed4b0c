//! Dashboard aggregation: per-level ticket counts, totals, trends and the
//! technician ranking, cached per filter set.

mod aggregator;
pub mod filters;
pub mod keys;

pub use aggregator::MetricsAggregator;
pub use filters::{DashboardFilters, RawFilters};
