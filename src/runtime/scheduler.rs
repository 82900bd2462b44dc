//! Periodic Tasks
//!
//! Drives a cycle on a fixed period. Each run is spawned and bounded by 90%
//! of the period, so runs of one task never overlap.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::DrConfig;
use crate::error::{DrError, Result};
use crate::metrics::Metrics;
use crate::observability::{AlertDispatcher, Severity};

/// Consecutive failed runs before the task is reported as failing
pub const FAILING_AFTER: u32 = 2;

pub struct PeriodicTask {
    name: String,
    period: Duration,
    timeout: Duration,
    alerts: Arc<AlertDispatcher>,
    metrics: Arc<Metrics>,
}

impl PeriodicTask {
    /// Create a task; its run budget is derived from `period`
    pub fn new(
        name: impl Into<String>,
        period: Duration,
        alerts: Arc<AlertDispatcher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            name: name.into(),
            period,
            timeout: DrConfig::cycle_timeout(period),
            alerts,
            metrics,
        }
    }

    /// Task name used in logs, metrics and alerts
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Budget for one run
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one cycle to completion, timeout or panic
    pub async fn run_once<Fut>(&self, cycle: Fut) -> Result<()>
    where
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut handle = tokio::spawn(cycle);
        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                if join_error.is_panic() {
                    Err(DrError::CyclePanicked(self.name.clone()))
                } else {
                    Err(DrError::CyclePanicked(format!("{} (cancelled)", self.name)))
                }
            }
            Err(_) => {
                handle.abort();
                Err(DrError::CycleTimeout {
                    task: self.name.clone(),
                    timeout: self.timeout,
                })
            }
        }
    }

    /// Tick until `shutdown`. A run in flight when shutdown arrives finishes
    /// (bounded by the timeout) before the loop exits.
    pub async fn run<F, Fut>(self, shutdown: CancellationToken, mut cycle: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            task = %self.name,
            period = ?self.period,
            timeout = ?self.timeout,
            "Periodic task started"
        );

        let mut consecutive_failures = 0u32;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let started = Instant::now();
                    let result = self.run_once(cycle()).await;
                    self.metrics.record_cycle(&self.name, started.elapsed(), result.is_ok());
                    consecutive_failures = self.observe(result, consecutive_failures).await;
                }
            }
        }

        info!(task = %self.name, "Periodic task stopped");
    }

    async fn observe(&self, result: Result<()>, consecutive_failures: u32) -> u32 {
        match result {
            Ok(()) => {
                if consecutive_failures >= FAILING_AFTER {
                    self.alerts
                        .notify(
                            Severity::Info,
                            &self.name,
                            &format!("{} checks recovered", self.name),
                        )
                        .await;
                }
                0
            }
            Err(e) => {
                let failures = consecutive_failures + 1;
                if failures >= FAILING_AFTER {
                    error!(task = %self.name, failures, error = %e, "Cycle failed");
                } else {
                    warn!(task = %self.name, error = %e, "Cycle failed");
                }
                if failures == FAILING_AFTER {
                    self.alerts
                        .notify(
                            Severity::Critical,
                            &self.name,
                            &format!(
                                "{} checks failing: {} consecutive cycles, last error: {}",
                                self.name, failures, e
                            ),
                        )
                        .await;
                }
                failures
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryChannel;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn task(period: Duration) -> (PeriodicTask, Arc<MemoryChannel>, Arc<Metrics>) {
        let channel = Arc::new(MemoryChannel::new());
        let metrics = Arc::new(Metrics::new());
        let alerts = Arc::new(AlertDispatcher::new(1, 16).with_channel(channel.clone()));
        (
            PeriodicTask::new("health", period, alerts, metrics.clone()),
            channel,
            metrics,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_once_bounds_hanging_cycle() {
        let (task, _, _) = task(Duration::from_secs(300));
        assert_eq!(task.timeout(), Duration::from_secs(270));

        let result = task
            .run_once(async {
                std::future::pending::<()>().await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(DrError::CycleTimeout { .. })));
    }

    #[tokio::test]
    async fn test_run_once_catches_panic() {
        let (task, _, _) = task(Duration::from_secs(60));
        let result = task
            .run_once(async {
                if true {
                    panic!("probe exploded");
                }
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(DrError::CyclePanicked(name)) if name == "health"));

        assert!(task.run_once(async { Ok(()) }).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_counts_cycles_and_stops() {
        let (task, channel, metrics) = task(Duration::from_secs(10));
        let runs = Arc::new(AtomicU32::new(0));
        let shutdown = CancellationToken::new();

        let counter = runs.clone();
        let handle = tokio::spawn(task.run(shutdown.clone(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        // ticks at 0, 10, 20
        tokio::time::sleep(Duration::from_secs(25)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.cycle_runs("health"), 3);
        assert_eq!(metrics.cycle_failures("health"), 0);
        assert!(channel.received().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_consecutive_failures_alert_once() {
        let (task, channel, metrics) = task(Duration::from_secs(10));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(task.run(shutdown.clone(), || async {
            std::future::pending::<()>().await;
            Ok(())
        }));

        // runs start at 0, 10, 20 and each times out after 9s
        tokio::time::sleep(Duration::from_secs(25)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(metrics.cycle_runs("health"), 3);
        assert_eq!(metrics.cycle_failures("health"), 3);
        let alerts = channel.received();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert!(alerts[0].message.contains("checks failing"));
    }
}
