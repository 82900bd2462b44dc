//! Failover Switches
//!
//! The three infrastructure actions a failover performs, in order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::HookConfig;
use crate::error::SwitchError;

/// Ordered failover steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailoverStep {
    TrafficRouting,
    LoadBalancer,
    DataPlane,
}

impl FailoverStep {
    pub const ORDER: [FailoverStep; 3] = [
        FailoverStep::TrafficRouting,
        FailoverStep::LoadBalancer,
        FailoverStep::DataPlane,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailoverStep::TrafficRouting => "traffic-routing",
            FailoverStep::LoadBalancer => "load-balancer",
            FailoverStep::DataPlane => "data-plane",
        }
    }
}

impl fmt::Display for FailoverStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Points client traffic (DNS, edge routing) at a region
#[async_trait]
pub trait TrafficRouter: Send + Sync {
    async fn switch_to(&self, region: &str) -> Result<(), SwitchError>;
}

/// Moves load-balancer targets to a region
#[async_trait]
pub trait LoadBalancerSwitcher: Send + Sync {
    async fn switch_to(&self, region: &str) -> Result<(), SwitchError>;
}

/// Promotes a region's data plane to writable primary
#[async_trait]
pub trait DataPlaneSwitcher: Send + Sync {
    async fn promote(&self, region: &str) -> Result<(), SwitchError>;
}

/// One implementation per step
#[derive(Clone)]
pub struct FailoverSwitches {
    pub traffic: Arc<dyn TrafficRouter>,
    pub load_balancer: Arc<dyn LoadBalancerSwitcher>,
    pub data_plane: Arc<dyn DataPlaneSwitcher>,
}

impl FailoverSwitches {
    pub fn new(
        traffic: Arc<dyn TrafficRouter>,
        load_balancer: Arc<dyn LoadBalancerSwitcher>,
        data_plane: Arc<dyn DataPlaneSwitcher>,
    ) -> Self {
        Self {
            traffic,
            load_balancer,
            data_plane,
        }
    }

    /// Hook command per configured step, dry run for the rest
    pub fn from_hooks(hooks: &HookConfig) -> Self {
        let traffic: Arc<dyn TrafficRouter> = match &hooks.traffic {
            Some(cmd) => Arc::new(HookSwitcher::new(FailoverStep::TrafficRouting, cmd.clone())),
            None => Arc::new(DryRunSwitcher::new(FailoverStep::TrafficRouting)),
        };
        let load_balancer: Arc<dyn LoadBalancerSwitcher> = match &hooks.load_balancer {
            Some(cmd) => Arc::new(HookSwitcher::new(FailoverStep::LoadBalancer, cmd.clone())),
            None => Arc::new(DryRunSwitcher::new(FailoverStep::LoadBalancer)),
        };
        let data_plane: Arc<dyn DataPlaneSwitcher> = match &hooks.data_plane {
            Some(cmd) => Arc::new(HookSwitcher::new(FailoverStep::DataPlane, cmd.clone())),
            None => Arc::new(DryRunSwitcher::new(FailoverStep::DataPlane)),
        };
        Self::new(traffic, load_balancer, data_plane)
    }

    pub async fn run(&self, step: FailoverStep, region: &str) -> Result<(), SwitchError> {
        match step {
            FailoverStep::TrafficRouting => self.traffic.switch_to(region).await,
            FailoverStep::LoadBalancer => self.load_balancer.switch_to(region).await,
            FailoverStep::DataPlane => self.data_plane.promote(region).await,
        }
    }
}

/// Runs an operator-supplied command with the target region appended
#[derive(Debug, Clone)]
pub struct HookSwitcher {
    step: FailoverStep,
    command: String,
}

impl HookSwitcher {
    pub fn new(step: FailoverStep, command: impl Into<String>) -> Self {
        Self {
            step,
            command: command.into(),
        }
    }

    async fn invoke(&self, region: &str) -> Result<(), SwitchError> {
        let mut parts = self.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| SwitchError::Rejected(format!("{}: empty hook command", self.step)))?;

        debug!(step = %self.step, command = %self.command, region, "Running failover hook");
        let output = Command::new(program)
            .args(parts)
            .arg(region)
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            info!(step = %self.step, region, "Failover hook succeeded");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(SwitchError::Rejected(format!(
                "{} hook exited with {}: {}",
                self.step,
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl TrafficRouter for HookSwitcher {
    async fn switch_to(&self, region: &str) -> Result<(), SwitchError> {
        self.invoke(region).await
    }
}

#[async_trait]
impl LoadBalancerSwitcher for HookSwitcher {
    async fn switch_to(&self, region: &str) -> Result<(), SwitchError> {
        self.invoke(region).await
    }
}

#[async_trait]
impl DataPlaneSwitcher for HookSwitcher {
    async fn promote(&self, region: &str) -> Result<(), SwitchError> {
        self.invoke(region).await
    }
}

/// Logs the switch and succeeds
#[derive(Debug, Clone, Copy)]
pub struct DryRunSwitcher {
    step: FailoverStep,
}

impl DryRunSwitcher {
    pub fn new(step: FailoverStep) -> Self {
        Self { step }
    }
}

#[async_trait]
impl TrafficRouter for DryRunSwitcher {
    async fn switch_to(&self, region: &str) -> Result<(), SwitchError> {
        info!(step = %self.step, region, "Dry run: traffic would be routed");
        Ok(())
    }
}

#[async_trait]
impl LoadBalancerSwitcher for DryRunSwitcher {
    async fn switch_to(&self, region: &str) -> Result<(), SwitchError> {
        info!(step = %self.step, region, "Dry run: load balancer would switch");
        Ok(())
    }
}

#[async_trait]
impl DataPlaneSwitcher for DryRunSwitcher {
    async fn promote(&self, region: &str) -> Result<(), SwitchError> {
        info!(step = %self.step, region, "Dry run: data plane would be promoted");
        Ok(())
    }
}
