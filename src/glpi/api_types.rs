//! Serde-deserializable types matching GLPI REST responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use serde::Deserialize;
use serde_json::{Map, Value};

// ============================================================================
// Session endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiSessionResponse {
  pub session_token: String,
}

// ============================================================================
// Search endpoint response
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ApiSearchResponse {
  #[serde(default)]
  pub totalcount: u64,
  /// Rows in this page, as reported by GLPI
  pub count: Option<u64>,
  /// Field-id keyed rows; absent when nothing matched
  #[serde(default)]
  pub data: Vec<Map<String, Value>>,
}
