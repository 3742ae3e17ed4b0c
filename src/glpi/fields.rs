//! Versioned mapping from GLPI search option ids to semantic fields.
//!
//! GLPI search rows are keyed by numeric search option ids ("2", "12", ...).
//! Everything downstream of the client works on `TicketRecord`, never on the
//! raw ids, so renumbering upstream is a config change.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;

use super::types::{StatusBucket, TicketRecord};

/// Raw search row keyed by field id.
pub type RawRecord = BTreeMap<u32, Value>;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FieldMap {
  /// Upstream schema this table was written against
  pub version: String,
  pub id: u32,
  pub name: u32,
  pub status: u32,
  /// Assigned group
  pub group: u32,
  /// Assigned technician
  pub technician: u32,
  pub date_creation: u32,
}

impl Default for FieldMap {
  fn default() -> Self {
    Self {
      version: "glpi-10".to_string(),
      id: 2,
      name: 1,
      status: 12,
      group: 8,
      technician: 5,
      date_creation: 15,
    }
  }
}

impl FieldMap {
  /// Fields to request through `forcedisplay`.
  pub fn display_fields(&self) -> Vec<u32> {
    vec![
      self.id,
      self.name,
      self.status,
      self.group,
      self.technician,
      self.date_creation,
    ]
  }

  /// Validate a raw row. Rows without a usable id or status are rejected.
  pub fn to_ticket(&self, raw: &RawRecord) -> Result<TicketRecord, String> {
    let id = raw
      .get(&self.id)
      .and_then(as_u64)
      .ok_or_else(|| format!("missing or invalid id (field {})", self.id))?;

    let status_code = raw
      .get(&self.status)
      .and_then(as_u64)
      .ok_or_else(|| format!("ticket {}: missing status (field {})", id, self.status))?;
    let status = StatusBucket::from_glpi(status_code)
      .ok_or_else(|| format!("ticket {}: unknown status {}", id, status_code))?;

    Ok(TicketRecord {
      id,
      name: raw.get(&self.name).and_then(as_string),
      status,
      group_id: raw.get(&self.group).and_then(as_u64),
      technician_id: raw.get(&self.technician).and_then(as_u64),
      created: raw
        .get(&self.date_creation)
        .and_then(as_string)
        .and_then(|s| parse_glpi_datetime(&s)),
    })
  }
}

/// Numbers may arrive as JSON numbers, numeric strings, or the first
/// element of a multi-valued cell.
fn as_u64(value: &Value) -> Option<u64> {
  match value {
    Value::Number(n) => n.as_u64(),
    Value::String(s) => s.trim().parse().ok(),
    Value::Array(items) => items.first().and_then(as_u64),
    _ => None,
  }
}

fn as_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Array(items) => items.first().and_then(as_string),
    _ => None,
  }
}

fn parse_glpi_datetime(s: &str) -> Option<NaiveDateTime> {
  NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok()
}

/// Convert a JSON search row (`{"2": 17, "12": 1, ...}`) into a `RawRecord`.
/// Keys that are not numeric field ids are ignored.
pub fn raw_record(row: serde_json::Map<String, Value>) -> RawRecord {
  row
    .into_iter()
    .filter_map(|(key, value)| key.parse::<u32>().ok().map(|id| (id, value)))
    .collect()
}
