//! Failover Decision
//!
//! Threshold policy over the latest primary/secondary health records.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::DrConfig;
use crate::monitor::HealthRecord;

/// Pure failover predicate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailoverDecisionEngine {
    threshold: f64,
}

impl FailoverDecisionEngine {
    /// Secondary must score strictly above `threshold`
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Engine using the configured threshold
    pub fn from_config(config: &DrConfig) -> Self {
        Self::new(config.failover_health_score_threshold)
    }

    /// Primary fully unhealthy, secondary fully healthy and above threshold.
    ///
    /// Single-sample: one bad cycle is enough. Wrap in [`ConsecutiveTrigger`]
    /// to require several.
    pub fn should_failover(&self, primary: &HealthRecord, secondary: &HealthRecord) -> bool {
        !primary.healthy && secondary.healthy && secondary.health_score > self.threshold
    }
}

/// Debounce over successive decisions: fires once `required` positive
/// decisions arrive in a row. `required == 1` passes decisions through.
#[derive(Debug)]
pub struct ConsecutiveTrigger {
    required: u32,
    streak: AtomicU32,
}

impl ConsecutiveTrigger {
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            streak: AtomicU32::new(0),
        }
    }

    /// Feed one decision; true when the streak reaches `required`
    pub fn observe(&self, decision: bool) -> bool {
        if !decision {
            self.streak.store(0, Ordering::SeqCst);
            return false;
        }
        let streak = self
            .streak
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_add(1)))
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        streak >= self.required
    }

    pub fn streak(&self) -> u32 {
        self.streak.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.streak.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::health_record;

    fn all(region: &str, healthy: bool) -> HealthRecord {
        health_record(
            region,
            &[
                ("dynamodb", healthy),
                ("search", healthy),
                ("compute", healthy),
                ("volume", healthy),
            ],
        )
    }

    #[test]
    fn test_primary_down_secondary_up_triggers() {
        let engine = FailoverDecisionEngine::new(0.8);
        let primary = all("tokyo", false);
        let secondary = all("osaka", true);
        assert_eq!(primary.health_score, 0.0);
        assert_eq!(secondary.health_score, 1.0);
        assert!(engine.should_failover(&primary, &secondary));
    }

    #[test]
    fn test_degraded_secondary_blocks_failover() {
        let engine = FailoverDecisionEngine::new(0.8);
        let primary = all("tokyo", false);
        let secondary = health_record(
            "osaka",
            &[
                ("dynamodb", true),
                ("search", true),
                ("compute", true),
                ("volume", false),
            ],
        );
        assert_eq!(secondary.health_score, 0.75);
        assert!(!engine.should_failover(&primary, &secondary));
    }

    #[test]
    fn test_partially_degraded_primary_counts_as_unhealthy() {
        let engine = FailoverDecisionEngine::new(0.8);
        let primary = health_record("tokyo", &[("dynamodb", true), ("search", false)]);
        assert!(engine.should_failover(&primary, &all("osaka", true)));
        assert!(!engine.should_failover(&all("tokyo", true), &all("osaka", true)));
    }

    #[test]
    fn test_decision_is_pure() {
        let engine = FailoverDecisionEngine::new(0.8);
        let primary = all("tokyo", false);
        let secondary = all("osaka", true);
        let first = engine.should_failover(&primary, &secondary);
        for _ in 0..100 {
            assert_eq!(engine.should_failover(&primary, &secondary), first);
        }
    }

    #[test]
    fn test_threshold_of_one_never_fires() {
        let engine = FailoverDecisionEngine::new(1.0);
        assert!(!engine.should_failover(&all("tokyo", false), &all("osaka", true)));
    }

    #[test]
    fn test_consecutive_trigger() {
        let passthrough = ConsecutiveTrigger::new(1);
        assert!(passthrough.observe(true));
        assert!(!passthrough.observe(false));

        let debounced = ConsecutiveTrigger::new(3);
        assert!(!debounced.observe(true));
        assert!(!debounced.observe(true));
        assert!(!debounced.observe(false));
        assert_eq!(debounced.streak(), 0);
        assert!(!debounced.observe(true));
        assert!(!debounced.observe(true));
        assert!(debounced.observe(true));
        debounced.reset();
        assert!(!debounced.observe(true));
    }
}
