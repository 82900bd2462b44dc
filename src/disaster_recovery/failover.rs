//! Failover Orchestrator
//!
//! Runs the ordered region switch under the failover lock, measures it
//! against the RTO and records the event.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::lock::{LeaseGuard, LeaseLock, FAILOVER_LOCK};
use super::switch::{FailoverStep, FailoverSwitches};
use crate::context::{DrContext, RegionRoles};
use crate::error::{StoreError, SwitchError};
use crate::monitor::latest_rpo_assessment;
use crate::observability::Severity;
use crate::storage::{append_with_retry, StatusStore};

/// Store subject for failover events
pub const FAILOVER_SUBJECT: &str = "failover";

/// Persisted event status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailoverStatus {
    InProgress,
    Complete,
    Failed,
}

/// Failover state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailoverState {
    /// Normal operation, triggers accepted
    Normal,
    /// Failover in progress
    InProgress,
    /// Failover completed, awaiting acknowledgement
    Completed,
    /// Manual intervention required
    ManualRequired,
}

impl fmt::Display for FailoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailoverState::Normal => "normal",
            FailoverState::InProgress => "in-progress",
            FailoverState::Completed => "completed",
            FailoverState::ManualRequired => "manual-required",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverEvent {
    pub failover_id: String,
    pub status: FailoverStatus,
    pub from_region: String,
    pub to_region: String,
    pub reason: String,
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub rto_target_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rto_achieved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub completed_steps: Vec<FailoverStep>,
}

impl FailoverEvent {
    fn start(
        from_region: String,
        to_region: String,
        reason: &str,
        started_at: i64,
        rto_target_ms: i64,
    ) -> Self {
        Self {
            failover_id: Uuid::new_v4().to_string(),
            status: FailoverStatus::InProgress,
            from_region,
            to_region,
            reason: reason.to_string(),
            started_at,
            completed_at: None,
            duration_ms: None,
            rto_target_ms,
            rto_achieved: None,
            error: None,
            completed_steps: Vec::new(),
        }
    }

    /// `duration_ms` is measured on a monotonic clock; `completed_at` always
    /// sorts after `started_at` so the terminal row is the latest one.
    fn finish(&mut self, completed_at: i64, duration_ms: i64, error: Option<String>) {
        let completed_at = completed_at.max(self.started_at + 1);
        self.completed_at = Some(completed_at);
        self.duration_ms = Some(duration_ms);
        self.status = if error.is_some() {
            FailoverStatus::Failed
        } else {
            FailoverStatus::Complete
        };
        self.rto_achieved = Some(error.is_none() && rto_met(duration_ms, self.rto_target_ms));
        self.error = error;
    }
}

/// Strictly under target
pub fn rto_met(duration_ms: i64, rto_target_ms: i64) -> bool {
    duration_ms < rto_target_ms
}

/// Result of a failover request
#[derive(Debug, Clone, PartialEq)]
pub enum FailoverOutcome {
    Completed(FailoverEvent),
    Failed(FailoverEvent),
    /// Another failover holds the lock
    AlreadyInProgress,
    /// Orchestrator is not in `Normal`
    NotPermitted(FailoverState),
    /// Kill switch set or automatic failover off
    Disabled,
}

impl FailoverOutcome {
    /// Event of a failover that actually ran
    pub fn event(&self) -> Option<&FailoverEvent> {
        match self {
            FailoverOutcome::Completed(e) | FailoverOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Latest recorded failover event
pub async fn latest_failover(
    store: &dyn StatusStore,
) -> Result<Option<FailoverEvent>, StoreError> {
    match store.latest(FAILOVER_SUBJECT).await? {
        Some(row) => Ok(Some(row.payload_as()?)),
        None => Ok(None),
    }
}

/// Failover orchestrator
pub struct FailoverOrchestrator {
    ctx: DrContext,
    roles: RegionRoles,
    switches: FailoverSwitches,
    lock: Arc<dyn LeaseLock>,
    state: RwLock<FailoverState>,
    enabled: AtomicBool,
}

impl FailoverOrchestrator {
    /// Create an orchestrator in `Normal`, enabled
    pub fn new(
        ctx: DrContext,
        roles: RegionRoles,
        switches: FailoverSwitches,
        lock: Arc<dyn LeaseLock>,
    ) -> Self {
        Self {
            ctx,
            roles,
            switches,
            lock,
            state: RwLock::new(FailoverState::Normal),
            enabled: AtomicBool::new(true),
        }
    }

    /// Get current state
    pub fn state(&self) -> FailoverState {
        *self.state.read()
    }

    /// Kill switch: stops future automatic triggers, never an in-flight run
    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            warn!("Automatic failover disabled by kill switch");
        }
    }

    /// Clear the kill switch
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Kill switch clear and automatic failover configured
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst) && self.ctx.config.auto_failover
    }

    /// Check if an automatic failover would be accepted now
    pub fn can_failover(&self) -> bool {
        self.is_enabled()
            && self.state() == FailoverState::Normal
            && self.lock.holder(FAILOVER_LOCK).is_none()
    }

    /// Operator acknowledgement after `Completed` or `ManualRequired`.
    /// Returns the state that was cleared.
    pub fn acknowledge(&self) -> Option<FailoverState> {
        let mut state = self.state.write();
        match *state {
            FailoverState::Completed | FailoverState::ManualRequired => {
                let previous = *state;
                *state = FailoverState::Normal;
                info!(previous = %previous, "Failover state acknowledged");
                Some(previous)
            }
            _ => None,
        }
    }

    /// Automatic trigger
    pub async fn execute(&self, reason: &str) -> FailoverOutcome {
        if !self.is_enabled() {
            info!(reason, "Failover trigger ignored, automatic failover disabled");
            return FailoverOutcome::Disabled;
        }
        self.run(reason).await
    }

    /// Operator trigger; bypasses the kill switch and `auto_failover`
    pub async fn execute_manual(&self, reason: &str) -> FailoverOutcome {
        self.run(reason).await
    }

    async fn run(&self, reason: &str) -> FailoverOutcome {
        let config = &self.ctx.config;
        let lease = config.failover_lock_lease();
        let Some(guard) = LeaseGuard::acquire(self.lock.clone(), FAILOVER_LOCK, lease) else {
            info!(reason, "Failover already underway, not starting another");
            return FailoverOutcome::AlreadyInProgress;
        };

        {
            let mut state = self.state.write();
            if *state != FailoverState::Normal {
                info!(state = %*state, reason, "Failover not permitted in current state");
                return FailoverOutcome::NotPermitted(*state);
            }
            *state = FailoverState::InProgress;
        }

        let pair = self.roles.current();
        let started = Instant::now();
        let mut event = FailoverEvent::start(
            pair.primary,
            pair.secondary,
            reason,
            self.ctx.clock.now_ms(),
            config.rto_target_ms(),
        );
        self.ctx.metrics.record_failover_started();

        warn!(
            failover_id = %event.failover_id,
            from = %event.from_region,
            to = %event.to_region,
            reason,
            owner = guard.owner(),
            "Starting failover"
        );
        self.persist(&event, event.started_at).await;
        self.ctx
            .alerts
            .notify(
                Severity::Warning,
                FAILOVER_SUBJECT,
                &format!(
                    "Failover started: {} -> {} ({})",
                    event.from_region, event.to_region, reason
                ),
            )
            .await;

        let mut failure = None;
        for step in FailoverStep::ORDER {
            match self.run_step(step, &event.to_region).await {
                Ok(()) => event.completed_steps.push(step),
                Err(e) => {
                    failure = Some(format!("{} failed: {}", step, e));
                    break;
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as i64;
        event.finish(self.ctx.clock.now_ms(), duration_ms, failure);
        let completed_at = event.completed_at.unwrap_or(event.started_at + 1);
        self.persist(&event, completed_at).await;

        let outcome = if event.status == FailoverStatus::Complete {
            self.on_complete(&event).await;
            FailoverOutcome::Completed(event)
        } else {
            self.on_failed(&event).await;
            FailoverOutcome::Failed(event)
        };

        drop(guard);
        outcome
    }

    /// Run one step with bounded retries
    async fn run_step(&self, step: FailoverStep, region: &str) -> Result<(), SwitchError> {
        let config = &self.ctx.config;
        let attempts = config.step_max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.switches.run(step, region).await {
                Ok(()) => {
                    info!(%step, region, attempt, "Failover step complete");
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    warn!(%step, region, attempt, error = %e, "Failover step failed, retrying");
                    tokio::time::sleep(config.step_retry_backoff()).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(%step, region, attempts, error = %e, "Failover step exhausted retries");
                    return Err(e);
                }
            }
        }
    }

    async fn on_complete(&self, event: &FailoverEvent) {
        let roles = self.roles.promote_secondary();
        *self.state.write() = FailoverState::Completed;
        self.ctx.metrics.record_failover_finished(true);

        let duration_ms = event.duration_ms.unwrap_or_default();
        let rto_achieved = event.rto_achieved.unwrap_or(false);
        let rto_minutes = self.ctx.config.rto_target_minutes;

        let replication = match latest_rpo_assessment(
            self.ctx.store.as_ref(),
            self.ctx.config.rpo_target_seconds(),
        )
        .await
        {
            Ok(Some(rpo)) => rpo.to_string(),
            Ok(None) => "replication status unknown".to_string(),
            Err(e) => format!("replication status unavailable: {}", e),
        };

        info!(
            failover_id = %event.failover_id,
            primary = %roles.primary,
            duration_ms,
            rto_achieved,
            "Failover complete"
        );

        self.ctx
            .alerts
            .notify(
                if rto_achieved { Severity::Info } else { Severity::Warning },
                FAILOVER_SUBJECT,
                &format!(
                    "Failover to {} complete in {:.1}s; RTO target {} min {}; {}",
                    event.to_region,
                    duration_ms as f64 / 1000.0,
                    rto_minutes,
                    if rto_achieved { "met" } else { "NOT met" },
                    replication
                ),
            )
            .await;

        if !rto_achieved {
            self.ctx
                .alerts
                .notify(
                    Severity::Critical,
                    FAILOVER_SUBJECT,
                    &format!(
                        "RTO breached: failover {} took {} ms against a target of {} ms",
                        event.failover_id, duration_ms, event.rto_target_ms
                    ),
                )
                .await;
        }
    }

    async fn on_failed(&self, event: &FailoverEvent) {
        *self.state.write() = FailoverState::ManualRequired;
        self.ctx.metrics.record_failover_finished(false);

        let reason = event.error.as_deref().unwrap_or("unknown error");
        error!(
            failover_id = %event.failover_id,
            error = reason,
            completed_steps = event.completed_steps.len(),
            "Failover failed, manual intervention required"
        );
        self.ctx
            .alerts
            .notify(
                Severity::Critical,
                FAILOVER_SUBJECT,
                &format!(
                    "Failover {} -> {} FAILED: {}. Manual intervention required.",
                    event.from_region, event.to_region, reason
                ),
            )
            .await;
    }

    async fn persist(&self, event: &FailoverEvent, timestamp: i64) {
        let config = &self.ctx.config;
        if let Err(e) = append_with_retry(
            self.ctx.store.as_ref(),
            FAILOVER_SUBJECT,
            timestamp,
            event,
            config.failover_retention(),
            config.persist_retry_backoff(),
        )
        .await
        {
            error!(failover_id = %event.failover_id, error = %e, "Failover event not persisted");
            self.ctx.metrics.record_persist_failure();
            self.ctx
                .alerts
                .notify(
                    Severity::Critical,
                    FAILOVER_SUBJECT,
                    &format!(
                        "Failover event {} could not be persisted: {}",
                        event.failover_id, e
                    ),
                )
                .await;
        }
    }
}
