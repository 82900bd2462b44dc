//! Deterministic test doubles shared by the module tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::config::DrConfig;
use crate::context::{DrContext, RegionRoles};
use crate::disaster_recovery::{DataPlaneSwitcher, LoadBalancerSwitcher, TrafficRouter};
use crate::error::{NotifyError, ProbeError, StoreError, SwitchError};
use crate::metrics::Metrics;
use crate::monitor::HealthRecord;
use crate::observability::{Alert, AlertDispatcher, NotificationChannel};
use crate::probe::{ReplicationProbe, ReplicationSnapshot, ServiceProbe, ServiceType};
use crate::storage::{ManualClock, MemoryStatusStore, StatusStore, StoredRecord};

pub const START_MS: i64 = 1_700_000_000_000;

pub fn health_record(region: &str, results: &[(&str, bool)]) -> HealthRecord {
    let results: BTreeMap<String, bool> = results
        .iter()
        .map(|(name, ok)| (name.to_string(), *ok))
        .collect();
    HealthRecord::new(region, 0, results)
}

#[derive(Debug, Clone, Copy)]
enum ProbeAnswer {
    Up(bool),
    Error,
    Hang,
}

/// Service probe with a fixed answer per region
pub struct StaticProbe {
    service: String,
    answers: HashMap<String, ProbeAnswer>,
}

impl StaticProbe {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            answers: HashMap::new(),
        }
    }

    pub fn with(mut self, region: &str, healthy: bool) -> Self {
        self.answers.insert(region.to_string(), ProbeAnswer::Up(healthy));
        self
    }

    pub fn failing(mut self, region: &str) -> Self {
        self.answers.insert(region.to_string(), ProbeAnswer::Error);
        self
    }

    pub fn hanging(mut self, region: &str) -> Self {
        self.answers.insert(region.to_string(), ProbeAnswer::Hang);
        self
    }
}

#[async_trait]
impl ServiceProbe for StaticProbe {
    fn service(&self) -> &str {
        &self.service
    }

    async fn check(&self, region: &str) -> Result<bool, ProbeError> {
        match self.answers.get(region).copied() {
            Some(ProbeAnswer::Up(healthy)) => Ok(healthy),
            Some(ProbeAnswer::Error) => Err(ProbeError::Failed(format!("{} unreachable", region))),
            Some(ProbeAnswer::Hang) => std::future::pending().await,
            None => Err(ProbeError::Failed(format!("no answer scripted for {}", region))),
        }
    }
}

/// Replication probe with a fixed snapshot per service
#[derive(Default)]
pub struct ScriptedReplicationProbe {
    snapshots: HashMap<ServiceType, Option<ReplicationSnapshot>>,
}

impl ScriptedReplicationProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, service: ServiceType, snapshot: ReplicationSnapshot) -> Self {
        self.snapshots.insert(service, Some(snapshot));
        self
    }

    pub fn failing(mut self, service: ServiceType) -> Self {
        self.snapshots.insert(service, None);
        self
    }
}

#[async_trait]
impl ReplicationProbe for ScriptedReplicationProbe {
    async fn status(&self, service: ServiceType) -> Result<ReplicationSnapshot, ProbeError> {
        match self.snapshots.get(&service) {
            Some(Some(snapshot)) => Ok(snapshot.clone()),
            Some(None) => Err(ProbeError::Failed(format!("{} replication query failed", service))),
            None => Err(ProbeError::NotRegistered(service.to_string())),
        }
    }
}

/// Store whose first `n` appends fail
pub struct FlakyStore {
    inner: MemoryStatusStore,
    fail_remaining: AtomicU32,
    attempts: AtomicU32,
}

impl FlakyStore {
    pub fn failing_first(n: u32) -> Self {
        Self::over(MemoryStatusStore::new(), n)
    }

    pub fn over(inner: MemoryStatusStore, n: u32) -> Self {
        Self {
            inner,
            fail_remaining: AtomicU32::new(n),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStatusStore {
        &self.inner
    }
}

#[async_trait]
impl StatusStore for FlakyStore {
    async fn append(
        &self,
        subject: &str,
        timestamp: i64,
        payload: Value,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        self.inner.append(subject, timestamp, payload, ttl).await
    }

    async fn latest(&self, subject: &str) -> Result<Option<StoredRecord>, StoreError> {
        self.inner.latest(subject).await
    }

    async fn range(
        &self,
        subject: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        self.inner.range(subject, from, to).await
    }
}

/// Channel that records alerts; the first `n` sends fail
pub struct MemoryChannel {
    received: Mutex<Vec<Alert>>,
    fail_remaining: AtomicU32,
    attempts: AtomicU32,
    hang: bool,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(n: u32) -> Self {
        Self {
            received: Mutex::new(Vec::new()),
            fail_remaining: AtomicU32::new(n),
            attempts: AtomicU32::new(0),
            hang: false,
        }
    }

    /// Every send stays pending forever
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new()
        }
    }

    pub fn received(&self) -> Vec<Alert> {
        self.received.lock().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationChannel for MemoryChannel {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            return std::future::pending().await;
        }
        let failing = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(NotifyError::Delivery("injected delivery failure".into()));
        }
        self.received.lock().push(alert.clone());
        Ok(())
    }
}

enum ClockShift {
    Forward(Duration),
    Back(Duration),
}

/// Switch double for every failover step
#[derive(Default)]
pub struct ScriptedSwitch {
    calls: AtomicU32,
    fail_remaining: AtomicU32,
    regions: Mutex<Vec<String>>,
    shift: Option<(Arc<ManualClock>, ClockShift)>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(self, n: u32) -> Self {
        self.fail_remaining.store(n, Ordering::SeqCst);
        self
    }

    pub fn failing_always(self) -> Self {
        self.failing_first(u32::MAX)
    }

    /// Each call takes `by` of tokio time and moves the wall clock forward as much
    pub fn advancing(mut self, clock: Arc<ManualClock>, by: Duration) -> Self {
        self.shift = Some((clock, ClockShift::Forward(by)));
        self
    }

    /// Each call steps the wall clock back by `by`, taking no time
    pub fn rewinding(mut self, clock: Arc<ManualClock>, by: Duration) -> Self {
        self.shift = Some((clock, ClockShift::Back(by)));
        self
    }

    /// Each call waits for a permit on `gate`
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn regions(&self) -> Vec<String> {
        self.regions.lock().clone()
    }

    async fn invoke(&self, region: &str) -> Result<(), SwitchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match &self.shift {
            Some((clock, ClockShift::Forward(by))) => {
                tokio::time::sleep(*by).await;
                clock.advance(*by);
            }
            Some((clock, ClockShift::Back(by))) => clock.rewind(*by),
            None => {}
        }
        let failing = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SwitchError::Rejected(format!("switch to {} refused", region)));
        }
        self.regions.lock().push(region.to_string());
        Ok(())
    }
}

#[async_trait]
impl TrafficRouter for ScriptedSwitch {
    async fn switch_to(&self, region: &str) -> Result<(), SwitchError> {
        self.invoke(region).await
    }
}

#[async_trait]
impl LoadBalancerSwitcher for ScriptedSwitch {
    async fn switch_to(&self, region: &str) -> Result<(), SwitchError> {
        self.invoke(region).await
    }
}

#[async_trait]
impl DataPlaneSwitcher for ScriptedSwitch {
    async fn promote(&self, region: &str) -> Result<(), SwitchError> {
        self.invoke(region).await
    }
}

/// Context wired to in-memory doubles and a manual clock
pub struct Harness {
    pub ctx: DrContext,
    pub roles: RegionRoles,
    pub store: MemoryStatusStore,
    pub channel: Arc<MemoryChannel>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(config: DrConfig) -> Self {
        Self::build(config, None, MemoryChannel::new())
    }

    /// Context store fails its first `n` appends; `store` reads through
    pub fn with_flaky_store(config: DrConfig, n: u32) -> Self {
        Self::build(config, Some(n), MemoryChannel::new())
    }

    /// The only alert channel never answers
    pub fn with_hanging_channel(config: DrConfig) -> Self {
        Self::build(config, None, MemoryChannel::hanging())
    }

    fn build(config: DrConfig, failing_appends: Option<u32>, channel: MemoryChannel) -> Self {
        let clock = Arc::new(ManualClock::new(START_MS));
        let store = MemoryStatusStore::with_clock(clock.clone());
        let ctx_store: Arc<dyn StatusStore> = match failing_appends {
            Some(n) => Arc::new(FlakyStore::over(store.clone(), n)),
            None => Arc::new(store.clone()),
        };

        let metrics = Arc::new(Metrics::new());
        let channel = Arc::new(channel);
        let alerts = Arc::new(
            AlertDispatcher::new(config.alert_delivery_attempts, config.alert_history_size)
                .with_channel(channel.clone())
                .with_metrics(metrics.clone())
                .with_delivery_timeout(config.alert_delivery_timeout()),
        );

        let roles = RegionRoles::from_config(&config);
        let ctx = DrContext::new(config, ctx_store, clock.clone(), alerts, metrics);
        Self {
            ctx,
            roles,
            store,
            channel,
            clock,
        }
    }
}
