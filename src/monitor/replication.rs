//! Replication Monitor
//!
//! Tracks cross-region sync state per data service and rolls it up into an
//! `overall` record, the signal used for RPO compliance.

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ReplicatedServiceConfig;
use crate::context::DrContext;
use crate::error::{ProbeError, StoreError};
use crate::observability::Severity;
use crate::probe::{status_with_timeout, ReplicationProbe, ReplicationSnapshot, ServiceType};
use crate::storage::{append_with_retry, StatusStore};

/// Replication status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationStatus {
    Healthy,
    Lagging,
    Failed,
    Syncing,
    /// Only used by the `overall` aggregate
    Degraded,
}

impl fmt::Display for ReplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReplicationStatus::Healthy => "HEALTHY",
            ReplicationStatus::Lagging => "LAGGING",
            ReplicationStatus::Failed => "FAILED",
            ReplicationStatus::Syncing => "SYNCING",
            ReplicationStatus::Degraded => "DEGRADED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationRecord {
    pub service_type: ServiceType,
    pub timestamp: i64,
    pub status: ReplicationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_score: Option<f64>,
    pub details: Value,
}

/// Status for one service from its probe snapshot
pub fn derive_status(
    snapshot: &ReplicationSnapshot,
    expect_targets: bool,
    rpo_target_seconds: f64,
) -> ReplicationStatus {
    let total = snapshot.total_targets;
    let synced = snapshot.synced_targets.min(total);

    if total == 0 {
        return if expect_targets {
            ReplicationStatus::Failed
        } else {
            ReplicationStatus::Syncing
        };
    }
    if synced == 0 {
        return ReplicationStatus::Failed;
    }
    if synced < total {
        return ReplicationStatus::Syncing;
    }
    match snapshot.lag_seconds {
        Some(lag) if lag > rpo_target_seconds => ReplicationStatus::Lagging,
        _ => ReplicationStatus::Healthy,
    }
}

/// Overall status and score over per-service statuses
pub fn aggregate(statuses: &[ReplicationStatus]) -> (ReplicationStatus, f64) {
    let total = statuses.len();
    let healthy = statuses
        .iter()
        .filter(|s| **s == ReplicationStatus::Healthy)
        .count();

    if healthy == total {
        (ReplicationStatus::Healthy, 1.0)
    } else if healthy > 0 {
        (ReplicationStatus::Degraded, healthy as f64 / total as f64)
    } else {
        (ReplicationStatus::Failed, 0.0)
    }
}

/// RPO view derived from the latest `overall` record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpoAssessment {
    pub timestamp: i64,
    pub status: ReplicationStatus,
    pub health_score: f64,
    pub max_lag_seconds: Option<f64>,
    pub rpo_target_seconds: f64,
    pub rpo_met: bool,
}

impl fmt::Display for RpoAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "replication {} (score {:.2}), RPO target {} min {}",
            self.status,
            self.health_score,
            self.rpo_target_seconds / 60.0,
            if self.rpo_met { "met" } else { "NOT met" }
        )?;
        if let Some(lag) = self.max_lag_seconds {
            write!(f, ", max lag {:.0}s", lag)?;
        }
        Ok(())
    }
}

/// Read the latest overall replication record as an RPO assessment
pub async fn latest_rpo_assessment(
    store: &dyn StatusStore,
    rpo_target_seconds: f64,
) -> Result<Option<RpoAssessment>, StoreError> {
    let Some(row) = store.latest(ServiceType::Overall.as_str()).await? else {
        return Ok(None);
    };
    let record: ReplicationRecord = row.payload_as()?;
    let max_lag_seconds = record.details.get("maxLagSeconds").and_then(Value::as_f64);
    let lag_ok = max_lag_seconds.map_or(true, |lag| lag <= rpo_target_seconds);

    Ok(Some(RpoAssessment {
        timestamp: record.timestamp,
        status: record.status,
        health_score: record.health_score.unwrap_or(0.0),
        max_lag_seconds,
        rpo_target_seconds,
        rpo_met: record.status == ReplicationStatus::Healthy && lag_ok,
    }))
}

pub struct ReplicationMonitor {
    ctx: DrContext,
    probes: HashMap<ServiceType, Arc<dyn ReplicationProbe>>,
    last_timestamp: Mutex<i64>,
    last_overall: Mutex<Option<ReplicationStatus>>,
}

impl ReplicationMonitor {
    pub fn new(ctx: DrContext) -> Self {
        Self {
            ctx,
            probes: HashMap::new(),
            last_timestamp: Mutex::new(i64::MIN),
            last_overall: Mutex::new(None),
        }
    }

    pub fn register(&mut self, service: ServiceType, probe: Arc<dyn ReplicationProbe>) {
        self.probes.insert(service, probe);
    }

    pub fn with_probe(mut self, service: ServiceType, probe: Arc<dyn ReplicationProbe>) -> Self {
        self.register(service, probe);
        self
    }

    fn next_timestamp(&self) -> i64 {
        let now = self.ctx.clock.now_ms();
        let mut last = self.last_timestamp.lock();
        *last = if *last >= now { *last + 1 } else { now };
        *last
    }

    /// Query one service; returns its record and reported lag
    async fn query(
        &self,
        service: &ReplicatedServiceConfig,
        timestamp: i64,
    ) -> (ReplicationRecord, Option<f64>) {
        let config = &self.ctx.config;
        let outcome = match self.probes.get(&service.service) {
            Some(probe) => {
                status_with_timeout(probe.as_ref(), service.service, config.probe_timeout()).await
            }
            None => Err(ProbeError::NotRegistered(service.service.to_string())),
        };

        let (status, details, lag) = match outcome {
            Ok(mut snapshot) => {
                if snapshot.synced_targets > snapshot.total_targets {
                    warn!(
                        service = %service.service,
                        synced = snapshot.synced_targets,
                        total = snapshot.total_targets,
                        "Probe reported more synced targets than exist, clamping"
                    );
                    snapshot.synced_targets = snapshot.total_targets;
                }
                let status =
                    derive_status(&snapshot, service.expect_targets, config.rpo_target_seconds());
                let details = serde_json::to_value(&snapshot).unwrap_or(Value::Null);
                (status, details, snapshot.lag_seconds)
            }
            Err(e) => {
                warn!(service = %service.service, error = %e, "Replication probe failed");
                self.ctx.metrics.record_probe_failure();
                (ReplicationStatus::Failed, json!({ "error": e.to_string() }), None)
            }
        };

        let record = ReplicationRecord {
            service_type: service.service,
            timestamp,
            status,
            health_score: None,
            details,
        };
        (record, lag)
    }

    /// Query every configured service, persist per-service and overall records
    pub async fn run_cycle(&self) -> Vec<ReplicationRecord> {
        let timestamp = self.next_timestamp();
        let services = &self.ctx.config.replication.services;

        let results = join_all(services.iter().map(|s| self.query(s, timestamp))).await;

        let statuses: Vec<ReplicationStatus> = results.iter().map(|(r, _)| r.status).collect();
        let (overall_status, health_score) = aggregate(&statuses);
        let max_lag_seconds = results
            .iter()
            .filter_map(|(_, lag)| *lag)
            .fold(None, |acc: Option<f64>, lag| Some(acc.map_or(lag, |m| m.max(lag))));
        let per_service: BTreeMap<String, ReplicationStatus> = results
            .iter()
            .map(|(r, _)| (r.service_type.to_string(), r.status))
            .collect();

        let overall = ReplicationRecord {
            service_type: ServiceType::Overall,
            timestamp,
            status: overall_status,
            health_score: Some(health_score),
            details: json!({
                "services": per_service,
                "maxLagSeconds": max_lag_seconds,
                "healthyServices": statuses
                    .iter()
                    .filter(|s| **s == ReplicationStatus::Healthy)
                    .count(),
                "totalServices": statuses.len(),
            }),
        };

        let mut records: Vec<ReplicationRecord> = results.into_iter().map(|(r, _)| r).collect();
        records.push(overall);

        self.persist_all(&records).await;
        self.alert_transition(overall_status, health_score).await;

        info!(
            status = %overall_status,
            health_score,
            services = records.len() - 1,
            "Replication cycle complete"
        );
        records
    }

    async fn persist_all(&self, records: &[ReplicationRecord]) {
        let config = &self.ctx.config;
        let writes = records.iter().map(|record| async move {
            let subject = record.service_type.as_str();
            append_with_retry(
                self.ctx.store.as_ref(),
                subject,
                record.timestamp,
                record,
                config.replication_retention(),
                config.persist_retry_backoff(),
            )
            .await
            .map_err(|e| format!("{}: {}", subject, e))
        });

        let failed: Vec<String> = join_all(writes)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if !failed.is_empty() {
            for _ in &failed {
                self.ctx.metrics.record_persist_failure();
            }
            self.ctx
                .alerts
                .notify(
                    Severity::Critical,
                    "replication",
                    &format!(
                        "Replication records could not be persisted: {}",
                        failed.join("; ")
                    ),
                )
                .await;
        }
    }

    async fn alert_transition(&self, status: ReplicationStatus, health_score: f64) {
        let previous = self.last_overall.lock().replace(status);
        let was_healthy = previous.map_or(true, |p| p == ReplicationStatus::Healthy);

        if was_healthy && status != ReplicationStatus::Healthy {
            self.ctx
                .alerts
                .notify(
                    Severity::Warning,
                    "replication",
                    &format!(
                        "Cross-region replication is {} (score {:.2})",
                        status, health_score
                    ),
                )
                .await;
        } else if !was_healthy && status == ReplicationStatus::Healthy {
            self.ctx
                .alerts
                .notify(Severity::Info, "replication", "Cross-region replication recovered")
                .await;
        }
    }

    /// RPO compliance from the latest persisted overall record
    pub async fn latest_rpo(&self) -> Option<RpoAssessment> {
        latest_rpo_assessment(self.ctx.store.as_ref(), self.ctx.config.rpo_target_seconds())
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Cannot read replication status");
                None
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DrConfig, ReplicatedServiceConfig};
    use crate::testing::{Harness, ScriptedReplicationProbe};
    use std::time::Duration;

    const RPO: f64 = 3600.0;

    fn config() -> DrConfig {
        DrConfig::default().with_persist_backoff(Duration::ZERO)
    }

    #[test]
    fn test_derive_status_rules() {
        use ReplicationStatus::*;
        let snap = ReplicationSnapshot::new;

        assert_eq!(derive_status(&snap(3, 3), true, RPO), Healthy);
        assert_eq!(derive_status(&snap(3, 3).with_lag(10.0), true, RPO), Healthy);
        assert_eq!(derive_status(&snap(3, 3).with_lag(3601.0), true, RPO), Lagging);
        assert_eq!(derive_status(&snap(3, 1), true, RPO), Syncing);
        assert_eq!(derive_status(&snap(3, 0), true, RPO), Failed);
        assert_eq!(derive_status(&snap(0, 0), true, RPO), Failed);
        assert_eq!(derive_status(&snap(0, 0), false, RPO), Syncing);
        // over-reporting is clamped
        assert_eq!(derive_status(&snap(2, 5), true, RPO), Healthy);
    }

    #[test]
    fn test_aggregate_three_of_four() {
        use ReplicationStatus::*;
        let (status, score) = aggregate(&[Healthy, Healthy, Healthy, Syncing]);
        assert_eq!(status, Degraded);
        assert_eq!(score, 0.75);

        assert_eq!(aggregate(&[Healthy, Healthy]), (Healthy, 1.0));
        assert_eq!(aggregate(&[Failed, Lagging]), (Failed, 0.0));
    }

    #[tokio::test]
    async fn test_cycle_records_services_and_overall() {
        let h = Harness::new(config());
        let probe = Arc::new(
            ScriptedReplicationProbe::new()
                .with(ServiceType::KeyValueStore, ReplicationSnapshot::new(2, 2).with_lag(4.0))
                .with(ServiceType::SearchIndex, ReplicationSnapshot::new(3, 1))
                .with(ServiceType::FileVolume, ReplicationSnapshot::new(1, 1).with_lag(9.0)),
        );
        let monitor = ReplicationMonitor::new(h.ctx.clone())
            .with_probe(ServiceType::KeyValueStore, probe.clone())
            .with_probe(ServiceType::SearchIndex, probe.clone())
            .with_probe(ServiceType::FileVolume, probe);

        let records = monitor.run_cycle().await;
        assert_eq!(records.len(), 4);
        assert_eq!(records[1].status, ReplicationStatus::Syncing);

        let overall = records.last().unwrap();
        assert_eq!(overall.service_type, ServiceType::Overall);
        assert_eq!(overall.status, ReplicationStatus::Degraded);
        assert!((overall.health_score.unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(overall.details["maxLagSeconds"], 9.0);
        assert!(records.iter().all(|r| r.timestamp == overall.timestamp));

        for subject in ["key-value-store", "search-index", "file-volume", "overall"] {
            assert!(h.store.latest(subject).await.unwrap().is_some(), "{}", subject);
        }

        let rpo = monitor.latest_rpo().await.unwrap();
        assert_eq!(rpo.status, ReplicationStatus::Degraded);
        assert!(!rpo.rpo_met);
    }

    #[tokio::test]
    async fn test_probe_error_and_missing_probe_fail_that_service_only() {
        let h = Harness::new(config());
        let monitor = ReplicationMonitor::new(h.ctx.clone())
            .with_probe(
                ServiceType::KeyValueStore,
                Arc::new(
                    ScriptedReplicationProbe::new()
                        .with(ServiceType::KeyValueStore, ReplicationSnapshot::new(1, 1)),
                ),
            )
            .with_probe(
                ServiceType::SearchIndex,
                Arc::new(ScriptedReplicationProbe::new().failing(ServiceType::SearchIndex)),
            );

        let records = monitor.run_cycle().await;
        assert_eq!(records[0].status, ReplicationStatus::Healthy);
        assert_eq!(records[1].status, ReplicationStatus::Failed);
        assert!(records[1].details["error"].is_string());
        assert_eq!(records[2].status, ReplicationStatus::Failed);
        assert_eq!(records[3].status, ReplicationStatus::Degraded);
        assert_eq!(h.ctx.metrics.probe_failures(), 2);
        assert!(h
            .channel
            .received()
            .iter()
            .any(|a| a.subject == "replication" && a.severity == Severity::Warning));
    }

    #[tokio::test]
    async fn test_healthy_cycle_meets_rpo() {
        let h = Harness::new(config().with_replication(vec![ReplicatedServiceConfig::new(
            ServiceType::KeyValueStore,
        )]));
        let monitor = ReplicationMonitor::new(h.ctx.clone()).with_probe(
            ServiceType::KeyValueStore,
            Arc::new(
                ScriptedReplicationProbe::new()
                    .with(
                        ServiceType::KeyValueStore,
                        ReplicationSnapshot::new(2, 2).with_lag(30.0),
                    ),
            ),
        );

        monitor.run_cycle().await;
        let rpo = monitor.latest_rpo().await.unwrap();
        assert!(rpo.rpo_met);
        assert_eq!(rpo.max_lag_seconds, Some(30.0));
        assert!(rpo.to_string().contains("met"));
        assert!(h.channel.received().is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_is_alerted() {
        let h = Harness::with_flaky_store(
            config().with_replication(vec![ReplicatedServiceConfig::new(ServiceType::FileVolume)]),
            100,
        );
        let monitor = ReplicationMonitor::new(h.ctx.clone()).with_probe(
            ServiceType::FileVolume,
            Arc::new(
                ScriptedReplicationProbe::new()
                    .with(ServiceType::FileVolume, ReplicationSnapshot::new(1, 1)),
            ),
        );

        let records = monitor.run_cycle().await;
        assert_eq!(records.len(), 2);
        assert_eq!(h.ctx.metrics.persist_failures(), 2);
        assert!(monitor.latest_rpo().await.is_none());
        assert!(h
            .channel
            .received()
            .iter()
            .any(|a| a.severity == Severity::Critical));
    }
}
