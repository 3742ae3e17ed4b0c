//! Periodic re-population of hot cache keys.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle to a running warming task.
///
/// The task runs one cycle immediately, then one per `interval`. A stop
/// request is observed at the next sleep boundary; a cycle already in flight
/// is allowed to finish (it receives the token and may bail out between
/// steps), so cached values are only ever replaced whole.
pub struct CacheWarmer {
  handle: JoinHandle<()>,
  cancel: CancellationToken,
  cycles: Arc<AtomicU64>,
  stop_timeout: Duration,
}

impl CacheWarmer {
  pub fn spawn<F>(interval: Duration, stop_timeout: Duration, cycle: F) -> Self
  where
    F: Fn(CancellationToken) -> BoxFuture<'static, ()> + Send + Sync + 'static,
  {
    let cancel = CancellationToken::new();
    let cycles = Arc::new(AtomicU64::new(0));

    let token = cancel.clone();
    let counter = Arc::clone(&cycles);
    let handle = tokio::spawn(async move {
      info!(interval_secs = interval.as_secs(), "Cache warming started");
      loop {
        if token.is_cancelled() {
          break;
        }
        cycle(token.clone()).await;
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(cycle = n, "Cache warming cycle finished");

        tokio::select! {
          _ = token.cancelled() => break,
          _ = tokio::time::sleep(interval) => {}
        }
      }
      info!("Cache warming stopped");
    });

    Self {
      handle,
      cancel,
      cycles,
      stop_timeout,
    }
  }

  pub fn cycles(&self) -> u64 {
    self.cycles.load(Ordering::Relaxed)
  }

  /// Signal the task and wait for it, bounded by the stop timeout.
  /// Returns false if the task had to be aborted.
  pub async fn stop(mut self) -> bool {
    self.cancel.cancel();
    match tokio::time::timeout(self.stop_timeout, &mut self.handle).await {
      Ok(_) => true,
      Err(_) => {
        warn!(
          timeout_secs = self.stop_timeout.as_secs(),
          "Cache warming did not stop in time, aborting"
        );
        self.handle.abort();
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::FutureExt;
  use std::time::Instant;

  #[tokio::test]
  async fn test_runs_cycles_until_stopped() {
    let runs = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&runs);
    let warmer = CacheWarmer::spawn(
      Duration::from_millis(10),
      Duration::from_secs(5),
      move |_| {
        let counter = Arc::clone(&counter);
        async move {
          counter.fetch_add(1, Ordering::SeqCst);
        }
        .boxed()
      },
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(warmer.cycles() >= 2);
    assert!(warmer.stop().await);

    let after_stop = runs.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runs.load(Ordering::SeqCst), after_stop);
  }

  #[tokio::test]
  async fn test_stop_interrupts_long_sleep() {
    let warmer = CacheWarmer::spawn(Duration::from_secs(3600), Duration::from_secs(5), |_| {
      async {}.boxed()
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    assert!(warmer.stop().await);
    assert!(started.elapsed() < Duration::from_secs(1));
  }

  #[tokio::test]
  async fn test_stuck_cycle_is_aborted_after_timeout() {
    let warmer = CacheWarmer::spawn(
      Duration::from_secs(1),
      Duration::from_millis(50),
      |_| tokio::time::sleep(Duration::from_secs(3600)).boxed(),
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!warmer.stop().await);
  }

  #[tokio::test]
  async fn test_cycle_sees_cancellation() {
    let saw_cancel = Arc::new(AtomicU64::new(0));
    let flag = Arc::clone(&saw_cancel);
    let warmer = CacheWarmer::spawn(
      Duration::from_secs(3600),
      Duration::from_secs(5),
      move |token| {
        let flag = Arc::clone(&flag);
        async move {
          token.cancelled().await;
          flag.store(1, Ordering::SeqCst);
        }
        .boxed()
      },
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(warmer.stop().await);
    assert_eq!(saw_cancel.load(Ordering::SeqCst), 1);
  }
}
