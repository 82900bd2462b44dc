//! TCP Reachability Probes
//!
//! Generic bindings used by the daemon when no service-specific probe is
//! plugged in: a service is healthy if its regional endpoint accepts a TCP
//! connection, and a replica target counts as synced if it is reachable.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use super::{ReplicationProbe, ReplicationSnapshot, ResourceSync, ServiceProbe, ServiceType};
use crate::error::ProbeError;

async fn reachable(addr: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(addr, error = %e, "Endpoint refused connection");
            false
        }
        Err(_) => {
            debug!(addr, "Endpoint connect timed out");
            false
        }
    }
}

/// Health probe connecting to a per-region endpoint
pub struct TcpProbe {
    service: String,
    endpoints: HashMap<String, String>,
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(service: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            service: service.into(),
            endpoints: HashMap::new(),
            connect_timeout,
        }
    }

    pub fn with_endpoint(mut self, region: impl Into<String>, addr: impl Into<String>) -> Self {
        self.endpoints.insert(region.into(), addr.into());
        self
    }
}

#[async_trait]
impl ServiceProbe for TcpProbe {
    fn service(&self) -> &str {
        &self.service
    }

    async fn check(&self, region: &str) -> Result<bool, ProbeError> {
        let addr = self.endpoints.get(region).ok_or_else(|| {
            ProbeError::Failed(format!("no {} endpoint for region {}", self.service, region))
        })?;
        Ok(reachable(addr, self.connect_timeout).await)
    }
}

/// Replication probe treating reachable replica targets as synced
pub struct TcpReplicationProbe {
    targets: HashMap<ServiceType, Vec<String>>,
    connect_timeout: Duration,
}

impl TcpReplicationProbe {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            targets: HashMap::new(),
            connect_timeout,
        }
    }

    pub fn with_targets(mut self, service: ServiceType, targets: Vec<String>) -> Self {
        self.targets.insert(service, targets);
        self
    }
}

#[async_trait]
impl ReplicationProbe for TcpReplicationProbe {
    async fn status(&self, service: ServiceType) -> Result<ReplicationSnapshot, ProbeError> {
        let targets = self.targets.get(&service).map(Vec::as_slice).unwrap_or(&[]);
        let checks = targets
            .iter()
            .map(|addr| reachable(addr, self.connect_timeout));
        let results = join_all(checks).await;

        let resources: Vec<ResourceSync> = targets
            .iter()
            .zip(results)
            .map(|(addr, synced)| ResourceSync {
                name: addr.clone(),
                synced,
            })
            .collect();

        Ok(ReplicationSnapshot {
            total_targets: resources.len() as u32,
            synced_targets: resources.iter().filter(|r| r.synced).count() as u32,
            lag_seconds: None,
            resources,
        })
    }
}
