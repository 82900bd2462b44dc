//! Failover Lock
//!
//! Named lease lock with an owner token. A lease that is never released
//! (crashed holder) can be taken over once it expires.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::storage::Clock;

/// Name of the lock guarding failover execution
pub const FAILOVER_LOCK: &str = "failover-lock";

/// Mutual exclusion keyed by name
pub trait LeaseLock: Send + Sync {
    /// Take `name` for `owner` unless another owner holds an unexpired lease
    fn try_acquire(&self, name: &str, owner: &str, lease: Duration) -> bool;

    /// Release `name` if `owner` still holds it
    fn release(&self, name: &str, owner: &str) -> bool;

    /// Current unexpired holder
    fn holder(&self, name: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
struct Lease {
    owner: String,
    expires_at_ms: i64,
}

/// In-process lease table
pub struct LocalLeaseLock {
    leases: Mutex<HashMap<String, Lease>>,
    clock: Arc<dyn Clock>,
}

impl LocalLeaseLock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

impl LeaseLock for LocalLeaseLock {
    fn try_acquire(&self, name: &str, owner: &str, lease: Duration) -> bool {
        let now = self.clock.now_ms();
        let mut leases = self.leases.lock();

        if let Some(current) = leases.get(name) {
            if current.expires_at_ms > now {
                return current.owner == owner;
            }
            warn!(lock = name, previous_owner = %current.owner, "Taking over expired lease");
        }

        leases.insert(
            name.to_string(),
            Lease {
                owner: owner.to_string(),
                expires_at_ms: now.saturating_add(lease.as_millis() as i64),
            },
        );
        true
    }

    fn release(&self, name: &str, owner: &str) -> bool {
        let mut leases = self.leases.lock();
        match leases.get(name) {
            Some(current) if current.owner == owner => {
                leases.remove(name);
                true
            }
            _ => false,
        }
    }

    fn holder(&self, name: &str) -> Option<String> {
        let now = self.clock.now_ms();
        self.leases
            .lock()
            .get(name)
            .filter(|l| l.expires_at_ms > now)
            .map(|l| l.owner.clone())
    }
}

/// Held lease; released on drop
pub struct LeaseGuard {
    lock: Arc<dyn LeaseLock>,
    name: String,
    owner: String,
}

impl LeaseGuard {
    /// Acquire `name` under a fresh owner token
    pub fn acquire(lock: Arc<dyn LeaseLock>, name: &str, lease: Duration) -> Option<Self> {
        let owner = Uuid::new_v4().to_string();
        if !lock.try_acquire(name, &owner, lease) {
            return None;
        }
        debug!(lock = name, %owner, "Lease acquired");
        Some(Self {
            lock,
            name: name.to_string(),
            owner,
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.lock.release(&self.name, &self.owner) {
            debug!(lock = %self.name, owner = %self.owner, "Lease released");
        } else {
            warn!(lock = %self.name, owner = %self.owner, "Lease lost before release");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ManualClock;

    fn setup() -> (Arc<ManualClock>, Arc<dyn LeaseLock>) {
        let clock = Arc::new(ManualClock::new(0));
        let lock: Arc<dyn LeaseLock> = Arc::new(LocalLeaseLock::new(clock.clone()));
        (clock, lock)
    }

    #[test]
    fn test_second_owner_is_refused() {
        let (_, lock) = setup();
        let lease = Duration::from_secs(60);
        assert!(lock.try_acquire(FAILOVER_LOCK, "a", lease));
        assert!(!lock.try_acquire(FAILOVER_LOCK, "b", lease));
        assert!(lock.try_acquire(FAILOVER_LOCK, "a", lease));
        assert_eq!(lock.holder(FAILOVER_LOCK).as_deref(), Some("a"));

        assert!(!lock.release(FAILOVER_LOCK, "b"));
        assert!(lock.release(FAILOVER_LOCK, "a"));
        assert!(lock.try_acquire(FAILOVER_LOCK, "b", lease));
    }

    #[test]
    fn test_expired_lease_can_be_taken_over() {
        let (clock, lock) = setup();
        assert!(lock.try_acquire(FAILOVER_LOCK, "crashed", Duration::from_secs(10)));
        clock.advance(Duration::from_secs(10));
        assert!(lock.holder(FAILOVER_LOCK).is_none());
        assert!(lock.try_acquire(FAILOVER_LOCK, "next", Duration::from_secs(10)));
        // the stale owner cannot release the new lease
        assert!(!lock.release(FAILOVER_LOCK, "crashed"));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let (_, lock) = setup();
        let lease = Duration::from_secs(60);
        let guard = LeaseGuard::acquire(lock.clone(), FAILOVER_LOCK, lease).unwrap();
        assert_eq!(lock.holder(FAILOVER_LOCK).as_deref(), Some(guard.owner()));
        assert!(LeaseGuard::acquire(lock.clone(), FAILOVER_LOCK, lease).is_none());

        drop(guard);
        assert!(lock.holder(FAILOVER_LOCK).is_none());
        assert!(LeaseGuard::acquire(lock, FAILOVER_LOCK, Duration::from_secs(60)).is_some());
    }
}
