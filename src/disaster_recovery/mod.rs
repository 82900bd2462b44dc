//! Disaster Recovery Module
//!
//! Failover decision, mutual exclusion and the ordered region switch.

pub mod decision;
pub mod failover;
pub mod lock;
pub mod status;
pub mod switch;

pub use decision::{ConsecutiveTrigger, FailoverDecisionEngine};
pub use failover::{
    latest_failover, rto_met, FailoverEvent, FailoverOrchestrator, FailoverOutcome, FailoverState,
    FailoverStatus, FAILOVER_SUBJECT,
};
pub use lock::{LeaseGuard, LeaseLock, LocalLeaseLock, FAILOVER_LOCK};
pub use status::DrState;
pub use switch::{
    DataPlaneSwitcher, DryRunSwitcher, FailoverStep, FailoverSwitches, HookSwitcher,
    LoadBalancerSwitcher, TrafficRouter,
};
