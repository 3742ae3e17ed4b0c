//! Process-wide service objects, built once at startup and torn down explicitly.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{info, warn};

use crate::cache::warming::CacheWarmer;
use crate::config::{Config, Credentials};
use crate::error::Result;
use crate::glpi::session::create_http_client;
use crate::glpi::{GlpiClient, SessionManager, SessionSettings};
use crate::metrics::{DashboardFilters, MetricsAggregator, RawFilters};
use crate::pagination::AdaptivePaginationEngine;

pub struct Services {
  pub session: Arc<SessionManager>,
  pub engine: Arc<AdaptivePaginationEngine>,
  pub aggregator: Arc<MetricsAggregator>,
  config: Config,
  warmer: Option<CacheWarmer>,
}

impl Services {
  pub fn new(config: Config, credentials: Credentials) -> Result<Self> {
    let http = create_http_client(&config.http)?;
    let session = Arc::new(SessionManager::new(
      http,
      SessionSettings::from_config(&config, credentials),
    ));
    let client = GlpiClient::new(Arc::clone(&session), config.fields.clone());
    let engine = Arc::new(AdaptivePaginationEngine::new(config.pagination.clone()));
    let aggregator = Arc::new(MetricsAggregator::new(
      client,
      Arc::clone(&engine),
      &config.cache,
      config.levels.clone(),
      config.ranking.technicians.clone(),
    ));

    Ok(Self {
      session,
      engine,
      aggregator,
      config,
      warmer: None,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Filter sets kept warm. Invalid entries are skipped with a warning.
  pub fn warm_filter_sets(&self) -> Vec<DashboardFilters> {
    let raw_sets = if self.config.warming.filter_sets.is_empty() {
      vec![RawFilters::default()]
    } else {
      self.config.warming.filter_sets.clone()
    };

    raw_sets
      .iter()
      .filter_map(|raw| match raw.parse() {
        Ok(filters) => Some(filters),
        Err(e) => {
          warn!("Skipping warming filter set {:?}: {}", raw, e);
          None
        }
      })
      .collect()
  }

  /// Start the background warming task if it is enabled and not running yet.
  /// Returns whether a warmer is running afterwards.
  pub fn start_warming(&mut self) -> bool {
    if self.warmer.is_some() {
      return true;
    }
    if !self.config.warming.enabled {
      info!("Cache warming is disabled");
      return false;
    }

    let aggregator = Arc::clone(&self.aggregator);
    let engine = Arc::clone(&self.engine);
    let filter_sets = Arc::new(self.warm_filter_sets());

    let warmer = CacheWarmer::spawn(
      Duration::from_secs(self.config.warming.interval_secs),
      Duration::from_secs(self.config.warming.stop_timeout_secs),
      move |token| {
        let aggregator = Arc::clone(&aggregator);
        let engine = Arc::clone(&engine);
        let filter_sets = Arc::clone(&filter_sets);
        async move {
          for filters in filter_sets.iter() {
            if token.is_cancelled() {
              return;
            }
            if let Err(e) = aggregator.refresh_dashboard(filters).await {
              warn!(filters = %filters.describe(), "Warming dashboard failed: {}", e);
            }
            if token.is_cancelled() {
              return;
            }
            if let Err(e) = aggregator.refresh_ranking(filters).await {
              warn!(filters = %filters.describe(), "Warming ranking failed: {}", e);
            }
          }

          let expired = aggregator.cleanup_expired();
          engine.cleanup_old_entries();
          info!(expired, entities = engine.len(), "Warming cycle complete");
        }
        .boxed()
      },
    );
    self.warmer = Some(warmer);
    true
  }

  pub fn warming_cycles(&self) -> u64 {
    self.warmer.as_ref().map_or(0, |w| w.cycles())
  }

  /// Stop warming, then end the upstream session.
  pub async fn shutdown(mut self) {
    if let Some(warmer) = self.warmer.take() {
      warmer.stop().await;
    }
    self.session.close().await;
    info!("Services shut down");
  }
}
