//! DR Service Runtime
//!
//! Wires the monitors to the orchestrator and drives them on their periods.

mod scheduler;

pub use scheduler::{PeriodicTask, FAILING_AFTER};

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::context::{DrContext, RegionPair, RegionRoles};
use crate::disaster_recovery::{
    latest_failover, ConsecutiveTrigger, DrState, FailoverEvent, FailoverOrchestrator,
    FailoverOutcome, FailoverState,
};
use crate::error::{Result, StoreError};
use crate::monitor::{HealthChecker, HealthCycle, HealthRecord, ReplicationMonitor, RpoAssessment};
use crate::storage::{MemoryStatusStore, TtlSweeper};

/// Snapshot of the whole pipeline
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrStatusReport {
    pub state: DrState,
    pub roles: RegionPair,
    pub failover_state: FailoverState,
    pub auto_failover_enabled: bool,
    pub primary: Option<HealthRecord>,
    pub secondary: Option<HealthRecord>,
    pub replication: Option<RpoAssessment>,
    pub last_failover: Option<FailoverEvent>,
}

pub struct DrService {
    ctx: DrContext,
    roles: RegionRoles,
    health: HealthChecker,
    replication: ReplicationMonitor,
    orchestrator: Arc<FailoverOrchestrator>,
    trigger: ConsecutiveTrigger,
    failover_task: Mutex<Option<JoinHandle<FailoverOutcome>>>,
    sweep_store: Option<MemoryStatusStore>,
}

impl DrService {
    pub fn new(
        ctx: DrContext,
        roles: RegionRoles,
        health: HealthChecker,
        replication: ReplicationMonitor,
        orchestrator: Arc<FailoverOrchestrator>,
    ) -> Self {
        let trigger = ConsecutiveTrigger::new(ctx.config.consecutive_unhealthy_cycles);
        Self {
            ctx,
            roles,
            health,
            replication,
            orchestrator,
            trigger,
            failover_task: Mutex::new(None),
            sweep_store: None,
        }
    }

    /// Purge expired records from `store` in the background while running
    pub fn with_ttl_sweep(mut self, store: MemoryStatusStore) -> Self {
        self.sweep_store = Some(store);
        self
    }

    pub fn orchestrator(&self) -> &Arc<FailoverOrchestrator> {
        &self.orchestrator
    }

    /// One health cycle followed by the trigger decision
    pub async fn health_tick(&self) -> Result<HealthCycle> {
        let cycle = self.health.run_cycle().await;

        if !self.orchestrator.is_enabled() {
            if cycle.failover_recommended {
                warn!(
                    primary = %cycle.primary.region,
                    "Failover recommended but automatic failover is disabled"
                );
            }
            self.trigger.reset();
        } else if self.trigger.observe(cycle.failover_recommended) {
            self.trigger.reset();
            self.spawn_failover(format!(
                "primary {} unhealthy (score {:.2}), secondary {} healthy (score {:.2})",
                cycle.primary.region,
                cycle.primary.health_score,
                cycle.secondary.region,
                cycle.secondary.health_score
            ));
        } else if cycle.failover_recommended {
            info!(
                streak = self.trigger.streak(),
                required = self.ctx.config.consecutive_unhealthy_cycles,
                "Failover condition observed, waiting for consecutive confirmation"
            );
        }

        if !cycle.persisted {
            return Err(StoreError::Unavailable("health records not persisted".into()).into());
        }
        Ok(cycle)
    }

    pub async fn replication_tick(&self) -> Result<()> {
        self.replication.run_cycle().await;
        Ok(())
    }

    /// Runs detached from the health cycle so its timeout cannot cut a step short
    fn spawn_failover(&self, reason: String) {
        let mut slot = self.failover_task.lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            info!("Failover task still running, trigger ignored");
            return;
        }
        let orchestrator = self.orchestrator.clone();
        *slot = Some(tokio::spawn(async move { orchestrator.execute(&reason).await }));
    }

    /// Wait for the spawned failover, if any
    pub async fn wait_for_failover(&self) -> Option<FailoverOutcome> {
        let handle = self.failover_task.lock().take()?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(error = %e, "Failover task did not finish");
                None
            }
        }
    }

    pub async fn status(&self) -> Result<DrStatusReport> {
        let store = self.ctx.store.as_ref();
        let roles = self.roles.current();

        let primary = match store.latest(&roles.primary).await? {
            Some(row) => Some(row.payload_as::<HealthRecord>()?),
            None => None,
        };
        let secondary = match store.latest(&roles.secondary).await? {
            Some(row) => Some(row.payload_as::<HealthRecord>()?),
            None => None,
        };
        let replication = self.replication.latest_rpo().await;
        let last_failover = latest_failover(store).await?;
        let failover_state = self.orchestrator.state();

        Ok(DrStatusReport {
            state: DrState::derive(
                failover_state,
                primary.as_ref(),
                replication.as_ref().map(|r| r.status),
            ),
            roles,
            failover_state,
            auto_failover_enabled: self.orchestrator.is_enabled(),
            primary,
            secondary,
            replication,
            last_failover,
        })
    }

    /// One health and one replication cycle, then the resulting status
    pub async fn run_once(&self) -> Result<DrStatusReport> {
        let (health, replication) = tokio::join!(self.health_tick(), self.replication_tick());
        if let Err(e) = health.and(replication) {
            warn!(error = %e, "Cycle reported an error");
        }
        if let Some(outcome) = self.wait_for_failover().await {
            info!(?outcome, "Failover finished");
        }
        self.status().await
    }

    /// Run both periodic tasks and the TTL sweep until `shutdown`, then wait
    /// for any in-flight failover.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let config = self.ctx.config.clone();
        info!(
            primary = %self.roles.current().primary,
            secondary = %self.roles.current().secondary,
            auto_failover = self.orchestrator.is_enabled(),
            "DR service starting"
        );

        let health_task = PeriodicTask::new(
            "health",
            config.health_check_interval(),
            self.ctx.alerts.clone(),
            self.ctx.metrics.clone(),
        );
        let service = self.clone();
        let health = tokio::spawn(health_task.run(shutdown.clone(), move || {
            let service = service.clone();
            async move { service.health_tick().await.map(|_| ()) }
        }));

        let replication_task = PeriodicTask::new(
            "replication",
            config.replication_interval(),
            self.ctx.alerts.clone(),
            self.ctx.metrics.clone(),
        );
        let service = self.clone();
        let replication = tokio::spawn(replication_task.run(shutdown.clone(), move || {
            let service = service.clone();
            async move { service.replication_tick().await }
        }));

        let sweeper = self
            .sweep_store
            .clone()
            .map(|store| TtlSweeper::spawn(store, config.ttl_sweep_interval(), shutdown.clone()));

        for (name, handle) in [("health", health), ("replication", replication)] {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "Periodic task ended abnormally");
            }
        }
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                error!(error = %e, "TTL sweeper ended abnormally");
            }
        }

        if let Some(outcome) = self.wait_for_failover().await {
            info!(?outcome, "In-flight failover finished before shutdown");
        }
        info!("DR service stopped");
    }
}
