//! Region Health Checks
//!
//! Probes every configured service in both regions, scores each region,
//! persists the records and evaluates the failover predicate.

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::{DrContext, RegionRoles};
use crate::disaster_recovery::FailoverDecisionEngine;
use crate::observability::Severity;
use crate::probe::{check_with_timeout, ServiceProbe};
use crate::storage::append_with_retry;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// One region's health at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub region: String,
    pub timestamp: i64,
    pub service_results: BTreeMap<String, bool>,
    pub health_score: f64,
    pub healthy: bool,
}

impl HealthRecord {
    /// Score the results. No services at all scores 0.
    pub fn new(
        region: impl Into<String>,
        timestamp: i64,
        service_results: BTreeMap<String, bool>,
    ) -> Self {
        let total = service_results.len();
        let healthy_count = service_results.values().filter(|ok| **ok).count();
        let health_score = if total == 0 {
            0.0
        } else {
            healthy_count as f64 / total as f64
        };
        Self {
            region: region.into(),
            timestamp,
            service_results,
            health_score,
            healthy: health_score == 1.0,
        }
    }

    pub fn status(&self) -> HealthStatus {
        if self.healthy {
            HealthStatus::Healthy
        } else if self.health_score > 0.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }

    pub fn failed_services(&self) -> Vec<&str> {
        self.service_results
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Result of one health cycle
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCycle {
    pub primary: HealthRecord,
    pub secondary: HealthRecord,
    /// Both records durably stored
    pub persisted: bool,
    /// Decision engine verdict for this pair
    pub failover_recommended: bool,
}

/// Health check manager
pub struct HealthChecker {
    ctx: DrContext,
    roles: RegionRoles,
    probes: HashMap<String, Arc<dyn ServiceProbe>>,
    engine: FailoverDecisionEngine,
    last_timestamp: Mutex<HashMap<String, i64>>,
    last_healthy: Mutex<HashMap<String, bool>>,
}

impl HealthChecker {
    /// Create a checker with no probes registered
    pub fn new(ctx: DrContext, roles: RegionRoles) -> Self {
        let engine = FailoverDecisionEngine::from_config(&ctx.config);
        Self {
            ctx,
            roles,
            probes: HashMap::new(),
            engine,
            last_timestamp: Mutex::new(HashMap::new()),
            last_healthy: Mutex::new(HashMap::new()),
        }
    }

    /// Register a probe under its service name
    pub fn register(&mut self, probe: Arc<dyn ServiceProbe>) {
        self.probes.insert(probe.service().to_string(), probe);
    }

    /// Builder form of `register`
    pub fn with_probe(mut self, probe: Arc<dyn ServiceProbe>) -> Self {
        self.register(probe);
        self
    }

    fn services_for(&self, region: &str) -> Vec<String> {
        let config = &self.ctx.config;
        [&config.primary, &config.secondary]
            .into_iter()
            .find(|r| r.name == region)
            .map(|r| r.service_names())
            .unwrap_or_default()
    }

    /// Probe all services of one region concurrently; failures count as unhealthy
    pub async fn check_region(&self, region: &str) -> BTreeMap<String, bool> {
        let timeout = self.ctx.config.probe_timeout();
        let checks = self.services_for(region).into_iter().map(|service| async move {
            let Some(probe) = self.probes.get(&service) else {
                warn!(
                    region,
                    service = %service,
                    "No probe registered, counting as unhealthy"
                );
                self.ctx.metrics.record_probe_failure();
                return (service, false);
            };
            match check_with_timeout(probe.as_ref(), region, timeout).await {
                Ok(healthy) => {
                    debug!(region, service = %service, healthy, "Probe finished");
                    (service, healthy)
                }
                Err(e) => {
                    warn!(
                        region,
                        service = %service,
                        error = %e,
                        "Probe failed, counting as unhealthy"
                    );
                    self.ctx.metrics.record_probe_failure();
                    (service, false)
                }
            }
        });
        join_all(checks).await.into_iter().collect()
    }

    /// Strictly increasing per region, even if the clock stalls or steps back
    fn next_timestamp(&self, region: &str) -> i64 {
        let now = self.ctx.clock.now_ms();
        let mut last = self.last_timestamp.lock();
        let ts = match last.get(region) {
            Some(prev) if *prev >= now => prev + 1,
            _ => now,
        };
        last.insert(region.to_string(), ts);
        ts
    }

    async fn persist(&self, record: &HealthRecord) -> bool {
        let config = &self.ctx.config;
        let result = append_with_retry(
            self.ctx.store.as_ref(),
            &record.region,
            record.timestamp,
            record,
            config.health_retention(),
            config.persist_retry_backoff(),
        )
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                self.ctx.metrics.record_persist_failure();
                self.ctx
                    .alerts
                    .notify(
                        Severity::Critical,
                        &record.region,
                        &format!(
                            "Health record for {} could not be persisted ({}); using in-memory result",
                            record.region, e
                        ),
                    )
                    .await;
                false
            }
        }
    }

    /// Alert on healthy -> unhealthy and back
    async fn alert_transition(&self, record: &HealthRecord) {
        let previous = self
            .last_healthy
            .lock()
            .insert(record.region.clone(), record.healthy);

        match (previous, record.healthy) {
            (Some(true) | None, false) => {
                self.ctx
                    .alerts
                    .notify(
                        Severity::Warning,
                        &record.region,
                        &format!(
                            "Region {} is {} (score {:.2}); failing services: {}",
                            record.region,
                            record.status(),
                            record.health_score,
                            record.failed_services().join(", ")
                        ),
                    )
                    .await;
            }
            (Some(false), true) => {
                self.ctx
                    .alerts
                    .notify(
                        Severity::Info,
                        &record.region,
                        &format!("Region {} recovered, all services healthy", record.region),
                    )
                    .await;
            }
            _ => {}
        }
    }

    /// Check both regions, persist, and evaluate the failover predicate
    pub async fn run_cycle(&self) -> HealthCycle {
        let pair = self.roles.current();

        let (primary_results, secondary_results) = tokio::join!(
            self.check_region(&pair.primary),
            self.check_region(&pair.secondary)
        );
        let primary = HealthRecord::new(
            pair.primary.as_str(),
            self.next_timestamp(&pair.primary),
            primary_results,
        );
        let secondary = HealthRecord::new(
            pair.secondary.as_str(),
            self.next_timestamp(&pair.secondary),
            secondary_results,
        );

        let failover_recommended = self.engine.should_failover(&primary, &secondary);

        let (primary_stored, secondary_stored) =
            tokio::join!(self.persist(&primary), self.persist(&secondary));

        self.alert_transition(&primary).await;
        self.alert_transition(&secondary).await;

        info!(
            primary = %primary.region,
            primary_score = primary.health_score,
            secondary = %secondary.region,
            secondary_score = secondary.health_score,
            failover_recommended,
            "Health cycle complete"
        );

        HealthCycle {
            primary,
            secondary,
            persisted: primary_stored && secondary_stored,
            failover_recommended,
        }
    }
}
