//! Dashboard filter parsing and validation.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::glpi::client::{SearchQuery, SearchType};
use crate::glpi::fields::FieldMap;
use crate::glpi::types::Level;

/// Filters as supplied by a caller (CLI flags, config file).
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RawFilters {
  /// YYYY-MM-DD, inclusive, on ticket creation date
  pub start_date: Option<String>,
  /// YYYY-MM-DD, inclusive
  pub end_date: Option<String>,
  /// Subset of levels ("n1", "N2", ...); all levels when empty
  pub levels: Vec<String>,
}

/// Validated filters. Levels are sorted and deduplicated so equal filter
/// sets produce equal cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DashboardFilters {
  pub start_date: Option<NaiveDate>,
  pub end_date: Option<NaiveDate>,
  pub levels: Vec<Level>,
}

impl Default for DashboardFilters {
  fn default() -> Self {
    Self {
      start_date: None,
      end_date: None,
      levels: Level::ALL.to_vec(),
    }
  }
}

impl RawFilters {
  /// Validate everything, collecting every problem before failing.
  pub fn parse(&self) -> Result<DashboardFilters> {
    let mut problems = Vec::new();

    let start_date = parse_date("start_date", self.start_date.as_deref(), &mut problems);
    let end_date = parse_date("end_date", self.end_date.as_deref(), &mut problems);

    if let (Some(start), Some(end)) = (start_date, end_date) {
      if start > end {
        problems.push(format!("start_date {} is after end_date {}", start, end));
      }
    }

    let mut levels = Vec::new();
    for raw in &self.levels {
      match raw.parse::<Level>() {
        Ok(level) => levels.push(level),
        Err(e) => problems.push(e),
      }
    }
    if levels.is_empty() {
      levels = Level::ALL.to_vec();
    }
    levels.sort();
    levels.dedup();

    if !problems.is_empty() {
      return Err(Error::Validation {
        message: format!("{} problem(s) in dashboard filters", problems.len()),
        details: problems,
      });
    }

    Ok(DashboardFilters {
      start_date,
      end_date,
      levels,
    })
  }
}

fn parse_date(name: &str, value: Option<&str>, problems: &mut Vec<String>) -> Option<NaiveDate> {
  let value = value.map(str::trim).filter(|v| !v.is_empty())?;
  match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
    Ok(date) => Some(date),
    Err(_) => {
      problems.push(format!("{} '{}' is not a YYYY-MM-DD date", name, value));
      None
    }
  }
}

impl DashboardFilters {
  /// Stable, human-readable form used for cache keys and logs.
  pub fn describe(&self) -> String {
    let levels: Vec<&str> = self.levels.iter().map(|l| l.as_str()).collect();
    format!(
      "start={};end={};levels={}",
      self.start_date.map(|d| d.to_string()).unwrap_or_default(),
      self.end_date.map(|d| d.to_string()).unwrap_or_default(),
      levels.join(",")
    )
  }

  /// Add creation-date criteria to `query`.
  pub fn apply_dates(&self, query: SearchQuery, fields: &FieldMap) -> SearchQuery {
    let mut query = query;
    if let Some(start) = self.start_date {
      query = query.and(
        fields.date_creation,
        SearchType::MoreThan,
        format!("{} 00:00:00", start),
      );
    }
    if let Some(end) = self.end_date {
      // lessthan is exclusive, so the day after keeps end_date inclusive
      let after = end + Duration::days(1);
      query = query.and(
        fields.date_creation,
        SearchType::LessThan,
        format!("{} 00:00:00", after),
      );
    }
    query
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn raw(start: Option<&str>, end: Option<&str>, levels: &[&str]) -> RawFilters {
    RawFilters {
      start_date: start.map(String::from),
      end_date: end.map(String::from),
      levels: levels.iter().map(|s| s.to_string()).collect(),
    }
  }

  #[test]
  fn test_empty_filters_cover_all_levels() {
    let filters = RawFilters::default().parse().unwrap();
    assert_eq!(filters, DashboardFilters::default());
  }

  #[test]
  fn test_levels_normalized() {
    let a = raw(None, None, &["n2", "N1", "n2"]).parse().unwrap();
    let b = raw(None, None, &["N1", "N2"]).parse().unwrap();
    assert_eq!(a, b);
    assert_eq!(a.describe(), b.describe());
  }

  #[test]
  fn test_collects_every_problem() {
    let err = raw(Some("2024-13-01"), Some("yesterday"), &["n9"])
      .parse()
      .unwrap_err();
    match err {
      Error::Validation { details, .. } => assert_eq!(details.len(), 3),
      other => panic!("unexpected error: {:?}", other),
    }
  }

  #[test]
  fn test_start_after_end_rejected() {
    let err = raw(Some("2024-02-01"), Some("2024-01-01"), &[])
      .parse()
      .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
  }

  #[test]
  fn test_date_criteria() {
    let filters = raw(Some("2024-01-01"), Some("2024-01-31"), &[]).parse().unwrap();
    let query = filters.apply_dates(SearchQuery::new(), &FieldMap::default());

    assert_eq!(query.criteria.len(), 2);
    assert_eq!(query.criteria[0].field, 15);
    assert_eq!(query.criteria[0].value, "2024-01-01 00:00:00");
    assert_eq!(query.criteria[1].searchtype, SearchType::LessThan);
    assert_eq!(query.criteria[1].value, "2024-02-01 00:00:00");
  }
}
