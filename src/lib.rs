//! DRWATCH - Two-Region Disaster Recovery Watchdog
//!
//! Continuously scores service health in a primary and a secondary region,
//! tracks cross-region replication against the RPO, and switches traffic,
//! load balancing and the data plane to the secondary when the primary
//! fails, measured against the RTO.

pub mod config;
pub mod context;
pub mod disaster_recovery;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod observability;
pub mod probe;
pub mod runtime;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use config::DrConfig;
pub use context::{DrContext, RegionPair, RegionRoles};
pub use disaster_recovery::{
    FailoverDecisionEngine, FailoverEvent, FailoverOrchestrator, FailoverOutcome, FailoverSwitches,
    LocalLeaseLock,
};
pub use error::{DrError, Result};
pub use metrics::Metrics;
pub use monitor::{HealthChecker, HealthRecord, ReplicationMonitor, ReplicationRecord};
pub use observability::{AlertDispatcher, LogChannel, Severity};
pub use runtime::{DrService, DrStatusReport};
pub use storage::{MemoryStatusStore, StatusStore, SystemClock};
