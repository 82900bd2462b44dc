//! Service Probes
//!
//! Pluggable health and replication checks. Concrete bindings for each data
//! service live outside the core; the TCP probes here are a generic fallback.

mod tcp;

pub use tcp::{TcpProbe, TcpReplicationProbe};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::ProbeError;

/// Replicated data service category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    KeyValueStore,
    SearchIndex,
    FileVolume,
    /// Aggregate over all replicated services
    Overall,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::KeyValueStore => "key-value-store",
            ServiceType::SearchIndex => "search-index",
            ServiceType::FileVolume => "file-volume",
            ServiceType::Overall => "overall",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync state of a single replicated resource (table, collection, volume)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSync {
    pub name: String,
    pub synced: bool,
}

/// What a replication probe reports for one service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationSnapshot {
    pub total_targets: u32,
    pub synced_targets: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lag_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceSync>,
}

impl ReplicationSnapshot {
    pub fn new(total_targets: u32, synced_targets: u32) -> Self {
        Self {
            total_targets,
            synced_targets,
            ..Default::default()
        }
    }

    pub fn with_lag(mut self, seconds: f64) -> Self {
        self.lag_seconds = Some(seconds);
        self
    }
}

/// Health check for one service category
#[async_trait]
pub trait ServiceProbe: Send + Sync {
    /// Service name this probe answers for
    fn service(&self) -> &str;

    async fn check(&self, region: &str) -> Result<bool, ProbeError>;
}

/// Replication state for data services
#[async_trait]
pub trait ReplicationProbe: Send + Sync {
    async fn status(&self, service: ServiceType) -> Result<ReplicationSnapshot, ProbeError>;
}

/// Run a health probe bounded by `timeout`
pub async fn check_with_timeout(
    probe: &dyn ServiceProbe,
    region: &str,
    timeout: Duration,
) -> Result<bool, ProbeError> {
    tokio::time::timeout(timeout, probe.check(region))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
}

/// Run a replication probe bounded by `timeout`
pub async fn status_with_timeout(
    probe: &dyn ReplicationProbe,
    service: ServiceType,
    timeout: Duration,
) -> Result<ReplicationSnapshot, ProbeError> {
    tokio::time::timeout(timeout, probe.status(service))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticProbe;

    #[test]
    fn test_service_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&ServiceType::KeyValueStore).unwrap(),
            "\"key-value-store\""
        );
        let parsed: ServiceType = serde_json::from_str("\"file-volume\"").unwrap();
        assert_eq!(parsed, ServiceType::FileVolume);
        assert_eq!(ServiceType::Overall.to_string(), "overall");
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snap = ReplicationSnapshot::new(2, 2).with_lag(1.5);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["totalTargets"], 2);
        assert_eq!(json["lagSeconds"], 1.5);
        assert!(json.get("resources").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout() {
        let probe = StaticProbe::new("search-index").hanging("tokyo");
        let result = check_with_timeout(&probe, "tokyo", Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ProbeError::Timeout(_))));
    }
}
