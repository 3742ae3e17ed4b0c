use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::glpi::fields::FieldMap;
use crate::glpi::types::Level;
use crate::metrics::filters::RawFilters;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub glpi: GlpiConfig,
  #[serde(default)]
  pub http: HttpConfig,
  #[serde(default)]
  pub pagination: PaginationConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub warming: WarmingConfig,
  /// Search option ids for the GLPI version in use
  #[serde(default)]
  pub fields: FieldMap,
  #[serde(default)]
  pub levels: LevelsConfig,
  #[serde(default)]
  pub ranking: RankingConfig,
  /// Write logs to a daily rolling file in this directory instead of stderr
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlpiConfig {
  /// Base URL of the REST API, e.g. https://glpi.example.com/apirest.php
  pub url: String,
  /// Application token sent as `App-Token` (GLPIDASH_APP_TOKEN overrides it)
  pub app_token: Option<String>,
  /// Expected session lifetime; the token is refreshed proactively after it
  pub session_lifetime_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
  pub timeout_secs: u64,
  pub connect_timeout_secs: u64,
  /// Retries for transient failures (network, timeout, 429, 5xx)
  pub max_retries: u32,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 8,
      connect_timeout_secs: 5,
      max_retries: 2,
    }
  }
}

/// Tuning for the adaptive page-size engine.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PaginationConfig {
  pub default_range: usize,
  pub min_range: usize,
  pub max_range: usize,
  /// Multiplier applied on a truncated result
  pub growth_factor: f64,
  /// Multiplier applied when less than half the page was used
  pub shrink_factor: f64,
  /// Consecutive truncations before falling back
  pub fallback_threshold: u32,
  /// Range used while in fallback
  pub fallback_range: usize,
  pub history_len: usize,
  /// States not updated within this horizon are dropped by cleanup
  pub stale_after_secs: u64,
  /// Upper bound on follow-up windows fetched to complete a truncated result
  pub max_pages: usize,
}

impl Default for PaginationConfig {
  fn default() -> Self {
    Self {
      default_range: 50,
      min_range: 10,
      max_range: 1000,
      growth_factor: 1.5,
      shrink_factor: 0.75,
      fallback_threshold: 2,
      fallback_range: 50,
      history_len: 5,
      stale_after_secs: 3600,
      max_pages: 20,
    }
  }
}

impl PaginationConfig {
  pub fn stale_after(&self) -> Duration {
    Duration::from_secs(self.stale_after_secs)
  }

  pub fn clamp(&self, range: usize) -> usize {
    range.clamp(self.min_range, self.max_range)
  }

  pub fn validate(&self) -> Result<()> {
    if self.min_range == 0 {
      return Err(eyre!("pagination.min_range must be at least 1"));
    }
    if !(self.min_range <= self.default_range && self.default_range <= self.max_range) {
      return Err(eyre!(
        "pagination ranges must satisfy min_range <= default_range <= max_range (got {} / {} / {})",
        self.min_range,
        self.default_range,
        self.max_range
      ));
    }
    if self.fallback_range < self.min_range || self.fallback_range > self.max_range {
      return Err(eyre!(
        "pagination.fallback_range {} is outside [{}, {}]",
        self.fallback_range,
        self.min_range,
        self.max_range
      ));
    }
    if self.growth_factor <= 1.0 {
      return Err(eyre!("pagination.growth_factor must be greater than 1"));
    }
    if self.shrink_factor <= 0.0 || self.shrink_factor >= 1.0 {
      return Err(eyre!("pagination.shrink_factor must be between 0 and 1"));
    }
    if self.fallback_threshold == 0 {
      return Err(eyre!("pagination.fallback_threshold must be at least 1"));
    }
    if self.history_len == 0 {
      return Err(eyre!("pagination.history_len must be at least 1"));
    }
    Ok(())
  }
}

/// TTL tiers
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Ticket counts change often
  pub metrics_ttl_secs: u64,
  /// Rankings and technician names
  pub ranking_ttl_secs: u64,
  /// Previous aggregation kept for trend computation
  pub baseline_ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      metrics_ttl_secs: 180,
      ranking_ttl_secs: 600,
      baseline_ttl_secs: 86_400,
    }
  }
}

impl CacheConfig {
  pub fn metrics_ttl(&self) -> Duration {
    Duration::from_secs(self.metrics_ttl_secs)
  }

  pub fn ranking_ttl(&self) -> Duration {
    Duration::from_secs(self.ranking_ttl_secs)
  }

  pub fn baseline_ttl(&self) -> Duration {
    Duration::from_secs(self.baseline_ttl_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarmingConfig {
  pub enabled: bool,
  pub interval_secs: u64,
  /// How long `stop` waits for the task to finish
  pub stop_timeout_secs: u64,
  /// Filter combinations to keep warm (the unfiltered dashboard when empty)
  pub filter_sets: Vec<RawFilters>,
}

impl Default for WarmingConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      interval_secs: 300,
      stop_timeout_secs: 5,
      filter_sets: Vec::new(),
    }
  }
}

/// GLPI group id for each service level.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LevelsConfig {
  pub n1: u64,
  pub n2: u64,
  pub n3: u64,
  pub n4: u64,
}

impl Default for LevelsConfig {
  fn default() -> Self {
    Self {
      n1: 89,
      n2: 90,
      n3: 91,
      n4: 92,
    }
  }
}

impl LevelsConfig {
  pub fn group_for(&self, level: Level) -> u64 {
    match level {
      Level::N1 => self.n1,
      Level::N2 => self.n2,
      Level::N3 => self.n3,
      Level::N4 => self.n4,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
  /// Technician (User) ids included in the ranking
  pub technicians: Vec<u64>,
}

/// How we authenticate against `initSession`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
  /// Personal API token (`Authorization: user_token ...`)
  UserToken(String),
  /// Login and password (`Authorization: Basic ...`)
  Basic { username: String, password: String },
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./glpidash.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/glpidash/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/glpidash/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("glpidash.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("glpidash").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to load config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let mut config: Config = serde_yaml::from_str(contents)?;

    if let Ok(app_token) = std::env::var("GLPIDASH_APP_TOKEN") {
      config.glpi.app_token = Some(app_token);
    }

    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    url::Url::parse(&self.glpi.url).map_err(|e| eyre!("Invalid glpi.url: {}", e))?;
    self.pagination.validate()?;
    if self.warming.interval_secs == 0 {
      return Err(eyre!("warming.interval_secs must be at least 1"));
    }
    Ok(())
  }

  /// Get GLPI credentials from environment variables.
  ///
  /// GLPIDASH_USER_TOKEN wins; otherwise GLPIDASH_USERNAME and
  /// GLPIDASH_PASSWORD are used together.
  pub fn get_credentials() -> Result<Credentials> {
    if let Ok(token) = std::env::var("GLPIDASH_USER_TOKEN") {
      return Ok(Credentials::UserToken(token));
    }

    match (
      std::env::var("GLPIDASH_USERNAME"),
      std::env::var("GLPIDASH_PASSWORD"),
    ) {
      (Ok(username), Ok(password)) => Ok(Credentials::Basic { username, password }),
      _ => Err(eyre!(
        "GLPI credentials not found. Set GLPIDASH_USER_TOKEN, or GLPIDASH_USERNAME and GLPIDASH_PASSWORD."
      )),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("glpi:\n  url: https://glpi.example.com/apirest.php\n").unwrap();
    assert_eq!(config.http.timeout_secs, 8);
    assert_eq!(config.http.max_retries, 2);
    assert_eq!(config.pagination, PaginationConfig::default());
    assert_eq!(config.cache.metrics_ttl_secs, 180);
    assert_eq!(config.levels.group_for(Level::N3), 91);
    assert_eq!(config.fields.status, 12);
    assert!(!config.warming.enabled);
  }

  #[test]
  fn test_overrides() {
    let yaml = r#"
glpi:
  url: https://glpi.example.com/apirest.php
pagination:
  default_range: 100
  max_range: 500
fields:
  version: custom
  status: 31
levels:
  n1: 1
ranking:
  technicians: [4, 7]
warming:
  enabled: true
  filter_sets:
    - start_date: "2024-01-01"
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.pagination.default_range, 100);
    assert_eq!(config.pagination.min_range, 10);
    assert_eq!(config.fields.status, 31);
    assert_eq!(config.fields.id, 2);
    assert_eq!(config.levels.n1, 1);
    assert_eq!(config.levels.n2, 90);
    assert_eq!(config.ranking.technicians, vec![4, 7]);
    assert_eq!(config.warming.filter_sets.len(), 1);
  }

  #[test]
  fn test_rejects_inverted_ranges() {
    let yaml = r#"
glpi:
  url: https://glpi.example.com/apirest.php
pagination:
  min_range: 100
  default_range: 50
"#;
    assert!(Config::from_yaml(yaml).is_err());
  }

  #[test]
  fn test_rejects_bad_factors() {
    let mut pagination = PaginationConfig::default();
    pagination.growth_factor = 1.0;
    assert!(pagination.validate().is_err());

    let mut pagination = PaginationConfig::default();
    pagination.shrink_factor = 1.2;
    assert!(pagination.validate().is_err());
  }

  #[test]
  fn test_rejects_bad_url() {
    assert!(Config::from_yaml("glpi:\n  url: not a url\n").is_err());
  }

  #[test]
  fn test_example_config_parses() {
    let config = Config::from_yaml(include_str!("../glpidash.example.yaml")).unwrap();
    assert_eq!(config.warming.filter_sets.len(), 2);
    assert_eq!(config.ranking.technicians, vec![4, 7, 12]);
    assert_eq!(config.fields, FieldMap::default());
  }
}
