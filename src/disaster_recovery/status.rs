//! DR readiness summary

use serde::{Deserialize, Serialize};
use std::fmt;

use super::failover::FailoverState;
use crate::monitor::{HealthRecord, ReplicationStatus};

/// Overall disaster-recovery state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DrState {
    Healthy,
    Degraded,
    Failed,
    FailoverInProgress,
    FailoverComplete,
}

impl fmt::Display for DrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DrState::Healthy => "HEALTHY",
            DrState::Degraded => "DEGRADED",
            DrState::Failed => "FAILED",
            DrState::FailoverInProgress => "FAILOVER_IN_PROGRESS",
            DrState::FailoverComplete => "FAILOVER_COMPLETE",
        };
        f.write_str(s)
    }
}

impl DrState {
    /// Failover state wins; otherwise the primary's health, downgraded by
    /// replication that is not fully healthy. No data yet reads as degraded.
    pub fn derive(
        failover: FailoverState,
        primary: Option<&HealthRecord>,
        replication: Option<ReplicationStatus>,
    ) -> Self {
        match failover {
            FailoverState::InProgress => return DrState::FailoverInProgress,
            FailoverState::Completed => return DrState::FailoverComplete,
            FailoverState::ManualRequired => return DrState::Failed,
            FailoverState::Normal => {}
        }

        let Some(primary) = primary else {
            return DrState::Degraded;
        };
        if primary.health_score == 0.0 {
            return DrState::Failed;
        }
        if !primary.healthy {
            return DrState::Degraded;
        }
        match replication {
            Some(ReplicationStatus::Healthy) => DrState::Healthy,
            _ => DrState::Degraded,
        }
    }
}
