mod cache;
mod config;
mod error;
mod glpi;
mod logging;
mod metrics;
mod observability;
mod pagination;
mod services;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::CacheResult;
use crate::error::ErrorReport;
use crate::metrics::RawFilters;
use crate::services::Services;

#[derive(Parser, Debug)]
#[command(name = "glpidash")]
#[command(about = "Ticket metrics for GLPI with adaptive pagination and caching")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./glpidash.yaml, then $XDG_CONFIG_HOME/glpidash/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Debug logging (RUST_LOG takes precedence)
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(clap::Args, Debug, Clone)]
struct FilterArgs {
  /// First creation date to include (YYYY-MM-DD)
  #[arg(long)]
  from: Option<String>,

  /// Last creation date to include (YYYY-MM-DD)
  #[arg(long)]
  to: Option<String>,

  /// Restrict to a service level (n1..n4); repeatable
  #[arg(long = "level")]
  levels: Vec<String>,
}

impl From<FilterArgs> for RawFilters {
  fn from(args: FilterArgs) -> Self {
    RawFilters {
      start_date: args.from,
      end_date: args.to,
      levels: args.levels,
    }
  }
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Per-level ticket counts, totals and trends
  Metrics(FilterArgs),
  /// Technicians ranked by ticket count
  Ranking(FilterArgs),
  /// Show a single ticket
  Ticket { id: u64 },
  /// Aggregate once, then print pagination and cache statistics
  Stats {
    #[command(flatten)]
    filters: FilterArgs,
    /// Also print the pagination detail for this entity (e.g. level:N1, tech:4)
    #[arg(long)]
    entity: Option<String>,
    /// Run the stale-state sweep and report before/after counts
    #[arg(long)]
    cleanup: bool,
    /// Drop cached entries whose key matches this glob (e.g. 'simple_metrics_*')
    #[arg(long)]
    invalidate: Option<String>,
  },
  /// Keep the cache warm and print statistics after every cycle (ctrl-c to stop)
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let log_guard = logging::init(config.log_dir.as_deref(), args.verbose);

  let credentials = config::Config::get_credentials()?;
  let mut services = Services::new(config, credentials)?;

  let outcome = match args.command {
    Command::Metrics(filters) => {
      let raw = RawFilters::from(filters);
      services
        .aggregator
        .dashboard_metrics(&raw)
        .await
        .map(|r| cached_json("dashboard", &r))
    }
    Command::Ranking(filters) => {
      let raw = RawFilters::from(filters);
      services
        .aggregator
        .technician_ranking(&raw)
        .await
        .map(|r| cached_json("ranking", &r))
    }
    Command::Ticket { id } => services.aggregator.ticket(id).await.map(|t| to_json(&t)),
    Command::Stats {
      filters,
      entity,
      cleanup,
      invalidate,
    } => {
      stats(
        &services,
        RawFilters::from(filters),
        entity,
        cleanup,
        invalidate,
      )
      .await
    }
    Command::Watch => {
      watch(&mut services).await?;
      Ok(String::new())
    }
  };

  services.shutdown().await;

  match outcome {
    Ok(output) => {
      if !output.is_empty() {
        println!("{}", output);
      }
      Ok(())
    }
    Err(e) => {
      tracing::error!("{}", e);
      eprintln!("{}", to_json(&ErrorReport::from(&e)));
      // flush the non-blocking log writer before exiting
      drop(log_guard);
      std::process::exit(1);
    }
  }
}

fn to_json<T: Serialize>(value: &T) -> String {
  serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

/// Payload plus where it came from (`source`, `fetched_at`).
fn cached_json<T: Serialize>(what: &str, result: &CacheResult<T>) -> String {
  tracing::debug!(
    what,
    cached = result.is_cached(),
    fetched_at = %result.fetched_at,
    "Serving result"
  );
  to_json(result)
}

async fn stats(
  services: &Services,
  raw: RawFilters,
  entity: Option<String>,
  cleanup: bool,
  invalidate: Option<String>,
) -> error::Result<String> {
  let aggregator = &services.aggregator;
  aggregator.dashboard_metrics(&raw).await?;
  aggregator.technician_ranking(&raw).await?;

  let mut output = serde_json::Map::new();
  output.insert(
    "snapshot".into(),
    serde_json::to_value(observability::snapshot(aggregator)).unwrap_or_default(),
  );

  output.insert(
    "entities".into(),
    serde_json::to_value(services.engine.entity_ids()).unwrap_or_default(),
  );

  if let Some(entity) = entity {
    let detail = observability::pagination_detail(&services.engine, &entity);
    output.insert(
      "detail".into(),
      serde_json::to_value(detail).unwrap_or_default(),
    );
  }

  if cleanup {
    let report = observability::trigger_cleanup(&services.engine);
    output.insert(
      "cleanup".into(),
      serde_json::to_value(report).unwrap_or_default(),
    );
  }

  if let Some(pattern) = invalidate {
    let removed = aggregator.invalidate_pattern(&pattern);
    output.insert("invalidated".into(), removed.into());
  }

  Ok(to_json(&output))
}

async fn watch(services: &mut Services) -> Result<()> {
  if !services.session.ensure_authenticated().await {
    tracing::warn!("Starting without a GLPI session, warming will retry each cycle");
  }

  let interval = Duration::from_secs(services.config().warming.interval_secs);
  if !services.start_warming() {
    eprintln!("Cache warming is disabled; set warming.enabled: true to use watch");
    return Ok(());
  }

  let mut ticker = tokio::time::interval(interval);
  ticker.tick().await;
  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        tracing::info!("Interrupted, shutting down");
        break;
      }
      _ = ticker.tick() => {
        println!("{}", to_json(&observability::snapshot(&services.aggregator)));
        tracing::debug!(cycles = services.warming_cycles(), "Watch tick");
      }
    }
  }
  Ok(())
}
