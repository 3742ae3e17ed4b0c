//! Tracing subscriber setup.

use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "glpidash=info";
const LOG_FILE: &str = "glpidash.log";

/// Install the global subscriber.
///
/// With `log_dir`, logs go to a daily rolling file through a non-blocking
/// writer; the returned guard must live until exit or buffered lines are lost.
/// Without it, logs go to stderr so stdout stays clean for JSON output.
pub fn init(log_dir: Option<&Path>, verbose: bool) -> Option<WorkerGuard> {
  let default = if verbose { "glpidash=debug" } else { DEFAULT_FILTER };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  match log_dir {
    Some(dir) => {
      let (writer, guard) = file_writer(dir);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Some(guard)
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      None
    }
  }
}

/// Daily rolling file behind a non-blocking writer. Lines still buffered are
/// written when the guard drops.
fn file_writer(dir: &Path) -> (NonBlocking, WorkerGuard) {
  let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
  tracing_appender::non_blocking(appender)
}
