//! Monitoring Module
//!
//! Periodic health and replication assessment of both regions.

mod health;
mod replication;

pub use health::{HealthChecker, HealthCycle, HealthRecord, HealthStatus};
pub use replication::{
    aggregate, derive_status, latest_rpo_assessment, ReplicationMonitor, ReplicationRecord,
    ReplicationStatus, RpoAssessment,
};
