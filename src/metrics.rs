//! Pipeline Metrics
//!
//! Cycle counters, cycle latency, and DR outcome counters.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Latency stats for one periodic task
#[derive(Debug)]
struct CycleStats {
    runs: AtomicU64,
    failures: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_min_ms: AtomicU64,
    latency_max_ms: AtomicU64,
}

impl CycleStats {
    fn new() -> Self {
        Self {
            runs: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            latency_sum_ms: AtomicU64::new(0),
            latency_min_ms: AtomicU64::new(u64::MAX),
            latency_max_ms: AtomicU64::new(0),
        }
    }
}

/// Metrics collector
#[derive(Debug)]
pub struct Metrics {
    cycles: RwLock<HashMap<String, CycleStats>>,

    probe_failures: AtomicU64,
    persist_failures: AtomicU64,
    alerts_undelivered: AtomicU64,

    failovers_started: AtomicU64,
    failovers_completed: AtomicU64,
    failovers_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            cycles: RwLock::new(HashMap::new()),
            probe_failures: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            alerts_undelivered: AtomicU64::new(0),
            failovers_started: AtomicU64::new(0),
            failovers_completed: AtomicU64::new(0),
            failovers_failed: AtomicU64::new(0),
        }
    }

    /// Record one finished run of a periodic task
    pub fn record_cycle(&self, task: &str, latency: Duration, succeeded: bool) {
        {
            let cycles = self.cycles.read();
            if let Some(stats) = cycles.get(task) {
                Self::update(stats, latency, succeeded);
                return;
            }
        }
        let mut cycles = self.cycles.write();
        let stats = cycles
            .entry(task.to_string())
            .or_insert_with(CycleStats::new);
        Self::update(stats, latency, succeeded);
    }

    fn update(stats: &CycleStats, latency: Duration, succeeded: bool) {
        stats.runs.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            stats.failures.fetch_add(1, Ordering::Relaxed);
        }

        let latency_ms = latency.as_millis() as u64;
        stats.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);

        // Update min (atomic min)
        let mut current_min = stats.latency_min_ms.load(Ordering::Relaxed);
        while latency_ms < current_min {
            match stats.latency_min_ms.compare_exchange_weak(
                current_min,
                latency_ms,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(c) => current_min = c,
            }
        }

        // Update max (atomic max)
        let mut current_max = stats.latency_max_ms.load(Ordering::Relaxed);
        while latency_ms > current_max {
            match stats.latency_max_ms.compare_exchange_weak(
                current_max,
                latency_ms,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(c) => current_max = c,
            }
        }
    }

    /// Record a probe that errored, timed out or was missing
    pub fn record_probe_failure(&self) {
        self.probe_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a write that failed after its retry
    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an alert no channel accepted
    pub fn record_alert_undelivered(&self) {
        self.alerts_undelivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failover start
    pub fn record_failover_started(&self) {
        self.failovers_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failover outcome
    pub fn record_failover_finished(&self, completed: bool) {
        let counter = if completed {
            &self.failovers_completed
        } else {
            &self.failovers_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Total runs of a task
    pub fn cycle_runs(&self, task: &str) -> u64 {
        self.cycles
            .read()
            .get(task)
            .map(|s| s.runs.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Failed or timed-out runs of a task
    pub fn cycle_failures(&self, task: &str) -> u64 {
        self.cycles
            .read()
            .get(task)
            .map(|s| s.failures.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Average cycle latency in milliseconds
    pub fn avg_cycle_ms(&self, task: &str) -> f64 {
        let cycles = self.cycles.read();
        let Some(stats) = cycles.get(task) else {
            return 0.0;
        };
        let runs = stats.runs.load(Ordering::Relaxed);
        if runs == 0 {
            return 0.0;
        }
        stats.latency_sum_ms.load(Ordering::Relaxed) as f64 / runs as f64
    }

    /// Fastest cycle in milliseconds
    pub fn min_cycle_ms(&self, task: &str) -> u64 {
        let min = self
            .cycles
            .read()
            .get(task)
            .map(|s| s.latency_min_ms.load(Ordering::Relaxed))
            .unwrap_or(u64::MAX);
        if min == u64::MAX {
            0
        } else {
            min
        }
    }

    /// Slowest cycle in milliseconds
    pub fn max_cycle_ms(&self, task: &str) -> u64 {
        self.cycles
            .read()
            .get(task)
            .map(|s| s.latency_max_ms.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Get probe failure count
    pub fn probe_failures(&self) -> u64 {
        self.probe_failures.load(Ordering::Relaxed)
    }

    /// Get persistence failure count
    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }

    /// Get undelivered alert count
    pub fn alerts_undelivered(&self) -> u64 {
        self.alerts_undelivered.load(Ordering::Relaxed)
    }

    /// Get started failover count
    pub fn failovers_started(&self) -> u64 {
        self.failovers_started.load(Ordering::Relaxed)
    }

    /// Get completed failover count
    pub fn failovers_completed(&self) -> u64 {
        self.failovers_completed.load(Ordering::Relaxed)
    }

    /// Get failed failover count
    pub fn failovers_failed(&self) -> u64 {
        self.failovers_failed.load(Ordering::Relaxed)
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        let mut tasks: Vec<String> = self.cycles.read().keys().cloned().collect();
        tasks.sort();
        let per_task: Vec<String> = tasks
            .iter()
            .map(|t| {
                format!(
                    "{}: runs={} failed={} avg={:.1}ms min={}ms max={}ms",
                    t,
                    self.cycle_runs(t),
                    self.cycle_failures(t),
                    self.avg_cycle_ms(t),
                    self.min_cycle_ms(t),
                    self.max_cycle_ms(t)
                )
            })
            .collect();

        format!(
            "{} | probe failures={} persist failures={} undelivered alerts={} | failovers started={} completed={} failed={}",
            per_task.join(" | "),
            self.probe_failures(),
            self.persist_failures(),
            self.alerts_undelivered(),
            self.failovers_started(),
            self.failovers_completed(),
            self.failovers_failed()
        )
    }
}
