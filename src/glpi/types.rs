use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// GLPI item types we talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
  Ticket,
  User,
}

impl EntityType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Ticket => "Ticket",
      Self::User => "User",
    }
  }
}

impl fmt::Display for EntityType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Service level (ticket routing tier)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
  N1,
  N2,
  N3,
  N4,
}

impl Level {
  pub const ALL: [Level; 4] = [Level::N1, Level::N2, Level::N3, Level::N4];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::N1 => "N1",
      Self::N2 => "N2",
      Self::N3 => "N3",
      Self::N4 => "N4",
    }
  }
}

impl fmt::Display for Level {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Level {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "n1" | "1" => Ok(Self::N1),
      "n2" | "2" => Ok(Self::N2),
      "n3" | "3" => Ok(Self::N3),
      "n4" | "4" => Ok(Self::N4),
      other => Err(format!("unknown level '{}'", other)),
    }
  }
}

/// Dashboard status category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusBucket {
  New,
  Pending,
  InProgress,
  Resolved,
}

impl StatusBucket {
  /// Map a GLPI ticket status code onto its dashboard bucket.
  pub fn from_glpi(status: u64) -> Option<Self> {
    match status {
      1 => Some(Self::New),
      2 | 3 => Some(Self::InProgress),
      4 => Some(Self::Pending),
      5 | 6 => Some(Self::Resolved),
      _ => None,
    }
  }
}

/// A ticket row from a search, with fields already resolved through the field map.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketRecord {
  pub id: u64,
  pub name: Option<String>,
  pub status: StatusBucket,
  pub group_id: Option<u64>,
  pub technician_id: Option<u64>,
  pub created: Option<NaiveDateTime>,
}

/// Full ticket from `Ticket/{id}`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Ticket {
  pub id: u64,
  #[serde(default)]
  pub name: String,
  pub status: u64,
  #[serde(default)]
  pub date: Option<String>,
  #[serde(default)]
  pub date_mod: Option<String>,
  #[serde(default)]
  pub priority: Option<u64>,
}

/// User from `User/{id}`, used to label technicians.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
  pub id: u64,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub firstname: Option<String>,
  #[serde(default)]
  pub realname: Option<String>,
}

impl User {
  pub fn display_name(&self) -> String {
    match (self.firstname.as_deref(), self.realname.as_deref()) {
      (Some(first), Some(last)) if !first.is_empty() && !last.is_empty() => {
        format!("{} {}", first, last)
      }
      _ if !self.name.is_empty() => self.name.clone(),
      _ => format!("#{}", self.id),
    }
  }
}

/// Requested window over a result set, rendered as `start-end` (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
  pub start: usize,
  pub size: usize,
}

impl PageRange {
  pub fn first(size: usize) -> Self {
    Self { start: 0, size }
  }

  pub fn end(&self) -> usize {
    self.start + self.size.max(1) - 1
  }
}

impl fmt::Display for PageRange {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.start, self.end())
  }
}

/// Parsed `Content-Range` header (`start-end/total`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
  pub start: u64,
  pub end: u64,
  pub total: u64,
}

impl ContentRange {
  /// Accepts `0-49/200` and the unit-prefixed `items 0-49/200`.
  pub fn parse(header: &str) -> Option<Self> {
    let value = header.trim();
    let value = value.rsplit(' ').next().unwrap_or(value);
    let (range, total) = value.split_once('/')?;
    let (start, end) = range.split_once('-')?;

    Some(Self {
      start: start.trim().parse().ok()?,
      end: end.trim().parse().ok()?,
      total: total.trim().parse().ok()?,
    })
  }

  pub fn returned(&self) -> u64 {
    if self.end < self.start {
      0
    } else {
      self.end - self.start + 1
    }
  }

  /// More data exists than this window carried.
  pub fn is_truncated(&self) -> bool {
    self.returned() < self.total
  }
}

/// One page of search results.
#[derive(Debug, Clone)]
pub struct SearchResult<R> {
  pub records: Vec<R>,
  /// Rows upstream returned, before any record validation
  pub count: usize,
  pub total_count: usize,
  pub is_partial: bool,
}

impl<R> SearchResult<R> {
  pub fn map_records<T>(self, f: impl FnOnce(Vec<R>) -> Vec<T>) -> SearchResult<T> {
    SearchResult {
      records: f(self.records),
      count: self.count,
      total_count: self.total_count,
      is_partial: self.is_partial,
    }
  }
}
