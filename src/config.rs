//! DR Configuration
//!
//! A single immutable configuration shared by every component. Defaults match
//! the production deployment (Tokyo primary, Osaka secondary, 4h RTO, 1h RPO).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::probe::ServiceType;

const MINUTE: u64 = 60;
const DAY: u64 = 24 * 60 * 60;

/// A monitored service in one region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    /// Address used by the bundled TCP probe (`host:port`)
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// One side of the region pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub name: String,
    #[serde(default = "default_services")]
    pub services: Vec<ServiceConfig>,
}

impl RegionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            services: default_services(),
        }
    }

    pub fn with_services<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services = names.into_iter().map(ServiceConfig::new).collect();
        self
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }
}

fn default_services() -> Vec<ServiceConfig> {
    ["key-value-store", "search-index", "compute", "file-volume"]
        .into_iter()
        .map(ServiceConfig::new)
        .collect()
}

/// A replicated data service watched by the replication monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatedServiceConfig {
    pub service: ServiceType,
    /// Replica target addresses used by the bundled TCP replication probe
    #[serde(default)]
    pub targets: Vec<String>,
    /// Zero replica targets is a failure when set
    #[serde(default = "default_true")]
    pub expect_targets: bool,
}

impl ReplicatedServiceConfig {
    pub fn new(service: ServiceType) -> Self {
        Self {
            service,
            targets: Vec::new(),
            expect_targets: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub services: Vec<ReplicatedServiceConfig>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            services: vec![
                ReplicatedServiceConfig::new(ServiceType::KeyValueStore),
                ReplicatedServiceConfig::new(ServiceType::SearchIndex),
                ReplicatedServiceConfig::new(ServiceType::FileVolume),
            ],
        }
    }
}

/// Commands run by the daemon for each failover step (region name appended)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookConfig {
    pub traffic: Option<String>,
    pub load_balancer: Option<String>,
    pub data_plane: Option<String>,
}

/// DR watchdog configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrConfig {
    pub primary: RegionConfig,
    pub secondary: RegionConfig,

    /// Recovery time objective
    pub rto_target_minutes: u64,
    /// Recovery point objective (max tolerated replication lag)
    pub rpo_target_minutes: u64,

    pub health_check_interval_minutes: u64,
    pub replication_interval_minutes: u64,

    /// Secondary must score strictly above this to receive a failover
    pub failover_health_score_threshold: f64,
    /// Positive decisions required in a row before triggering (1 = no debounce)
    pub consecutive_unhealthy_cycles: u32,
    /// Automatic failover enabled
    pub auto_failover: bool,

    pub probe_timeout_ms: u64,
    pub step_max_attempts: u32,
    pub step_retry_backoff_ms: u64,
    pub persist_retry_backoff_ms: u64,

    pub health_retention_days: u64,
    pub replication_retention_days: u64,
    pub failover_retention_days: u64,
    pub failover_lock_lease_minutes: u64,
    pub ttl_sweep_interval_secs: u64,

    pub alert_delivery_attempts: u32,
    /// Bound on one send to one channel; a timeout counts as a failed attempt
    pub alert_delivery_timeout_ms: u64,
    pub alert_history_size: usize,

    pub replication: ReplicationConfig,
    pub hooks: HookConfig,
}

impl Default for DrConfig {
    fn default() -> Self {
        Self {
            primary: RegionConfig::new("ap-northeast-1"),
            secondary: RegionConfig::new("ap-northeast-3"),
            rto_target_minutes: 240,
            rpo_target_minutes: 60,
            health_check_interval_minutes: 5,
            replication_interval_minutes: 15,
            failover_health_score_threshold: 0.8,
            consecutive_unhealthy_cycles: 1,
            auto_failover: true,
            probe_timeout_ms: 5_000,
            step_max_attempts: 3,
            step_retry_backoff_ms: 2_000,
            persist_retry_backoff_ms: 500,
            health_retention_days: 7,
            replication_retention_days: 30,
            failover_retention_days: 30,
            failover_lock_lease_minutes: 480,
            ttl_sweep_interval_secs: 60,
            alert_delivery_attempts: 2,
            alert_delivery_timeout_ms: 10_000,
            alert_history_size: 256,
            replication: ReplicationConfig::default(),
            hooks: HookConfig::default(),
        }
    }
}

impl DrConfig {
    /// Load and validate a TOML config file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate TOML config text
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the primary and secondary regions
    pub fn with_regions(mut self, primary: RegionConfig, secondary: RegionConfig) -> Self {
        self.primary = primary;
        self.secondary = secondary;
        self
    }

    /// Set the RTO target
    pub fn with_rto_minutes(mut self, minutes: u64) -> Self {
        self.rto_target_minutes = minutes;
        self
    }

    /// Set the RPO target
    pub fn with_rpo_minutes(mut self, minutes: u64) -> Self {
        self.rpo_target_minutes = minutes;
        self
    }

    /// Set the secondary health score threshold
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.failover_health_score_threshold = threshold;
        self
    }

    /// Set the failover debounce
    pub fn with_consecutive_cycles(mut self, cycles: u32) -> Self {
        self.consecutive_unhealthy_cycles = cycles;
        self
    }

    /// Set the per-probe timeout
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set attempts and backoff for each failover step
    pub fn with_step_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.step_max_attempts = attempts;
        self.step_retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Set the pause before the single persistence retry
    pub fn with_persist_backoff(mut self, backoff: Duration) -> Self {
        self.persist_retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Set the replicated services
    pub fn with_replication(mut self, services: Vec<ReplicatedServiceConfig>) -> Self {
        self.replication.services = services;
        self
    }

    /// Disable automatic failover
    pub fn manual_only(mut self) -> Self {
        self.auto_failover = false;
        self
    }

    /// Health check period
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_minutes * MINUTE)
    }

    /// Replication check period
    pub fn replication_interval(&self) -> Duration {
        Duration::from_secs(self.replication_interval_minutes * MINUTE)
    }

    /// Budget for one run of a periodic task; always shorter than its period
    pub fn cycle_timeout(period: Duration) -> Duration {
        period.mul_f64(0.9)
    }

    /// Per-probe timeout
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Pause between attempts of one failover step
    pub fn step_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.step_retry_backoff_ms)
    }

    /// Pause before retrying a failed write
    pub fn persist_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.persist_retry_backoff_ms)
    }

    /// RTO target in milliseconds
    pub fn rto_target_ms(&self) -> i64 {
        (self.rto_target_minutes * MINUTE * 1000) as i64
    }

    /// RPO target in seconds
    pub fn rpo_target_seconds(&self) -> f64 {
        (self.rpo_target_minutes * MINUTE) as f64
    }

    /// Retention of health records
    pub fn health_retention(&self) -> Duration {
        Duration::from_secs(self.health_retention_days * DAY)
    }

    /// Retention of replication records
    pub fn replication_retention(&self) -> Duration {
        Duration::from_secs(self.replication_retention_days * DAY)
    }

    /// Retention of failover events
    pub fn failover_retention(&self) -> Duration {
        Duration::from_secs(self.failover_retention_days * DAY)
    }

    /// Lease on the failover lock
    pub fn failover_lock_lease(&self) -> Duration {
        Duration::from_secs(self.failover_lock_lease_minutes * MINUTE)
    }

    /// Period of the expired-record sweep
    pub fn ttl_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.ttl_sweep_interval_secs)
    }

    /// Bound on one alert send
    pub fn alert_delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.alert_delivery_timeout_ms)
    }

    /// Reject configurations the pipeline cannot run safely with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.primary.name.is_empty() || self.secondary.name.is_empty() {
            return invalid("region names must not be empty".into());
        }
        if self.primary.name == self.secondary.name {
            return invalid(format!(
                "primary and secondary are both '{}'",
                self.primary.name
            ));
        }
        for region in [&self.primary, &self.secondary] {
            if region.services.is_empty() {
                return invalid(format!("region '{}' has no services", region.name));
            }
            let mut seen = HashSet::new();
            for service in &region.services {
                if !seen.insert(service.name.as_str()) {
                    return invalid(format!(
                        "service '{}' listed twice in region '{}'",
                        service.name, region.name
                    ));
                }
            }
        }

        let mut seen = HashSet::new();
        for replicated in &self.replication.services {
            if replicated.service == ServiceType::Overall {
                return invalid("'overall' is not a replicated service".into());
            }
            if !seen.insert(replicated.service) {
                return invalid(format!(
                    "replicated service '{}' listed twice",
                    replicated.service
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.failover_health_score_threshold) {
            return invalid(format!(
                "failover_health_score_threshold {} outside [0, 1]",
                self.failover_health_score_threshold
            ));
        }
        if self.health_check_interval_minutes == 0 || self.replication_interval_minutes == 0 {
            return invalid("check intervals must be at least one minute".into());
        }
        let shortest = self
            .health_check_interval()
            .min(self.replication_interval());
        if self.probe_timeout() >= Self::cycle_timeout(shortest) {
            return invalid(format!(
                "probe timeout {:?} does not fit in the {:?} cycle budget",
                self.probe_timeout(),
                Self::cycle_timeout(shortest)
            ));
        }
        if self.step_max_attempts == 0 {
            return invalid("step_max_attempts must be at least 1".into());
        }
        if self.consecutive_unhealthy_cycles == 0 {
            return invalid("consecutive_unhealthy_cycles must be at least 1".into());
        }
        if self.rto_target_minutes == 0 {
            return invalid("rto_target_minutes must be positive".into());
        }
        if self.alert_delivery_attempts == 0 {
            return invalid("alert_delivery_attempts must be at least 1".into());
        }
        if self.alert_delivery_timeout_ms == 0 {
            return invalid("alert_delivery_timeout_ms must be positive".into());
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
