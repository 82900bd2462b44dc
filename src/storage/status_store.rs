//! Status Store
//!
//! Append-only, time-ordered record log keyed by (subject, timestamp) with
//! per-record TTL. Subjects are region names, replication service types, or
//! `failover`.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::clock::{Clock, SystemClock};
use crate::error::StoreError;

/// A stored row as seen by readers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub subject: String,
    pub timestamp: i64,
    pub payload: Value,
    /// Expiry as epoch seconds
    pub ttl: i64,
}

impl StoredRecord {
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Time-series status persistence. Writes are append-only; expiry is the
/// store's job, not the caller's.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn append(
        &self,
        subject: &str,
        timestamp: i64,
        payload: Value,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Newest unexpired record by timestamp
    async fn latest(&self, subject: &str) -> Result<Option<StoredRecord>, StoreError>;

    /// Unexpired records with `from <= timestamp <= to`, oldest first
    async fn range(
        &self,
        subject: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<StoredRecord>, StoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    payload: Value,
    expires_at_ms: i64,
}

impl Entry {
    #[inline]
    fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }

    fn to_record(&self, subject: &str, timestamp: i64) -> StoredRecord {
        StoredRecord {
            subject: subject.to_string(),
            timestamp,
            payload: self.payload.clone(),
            // round up so the attribute never claims an earlier expiry
            ttl: (self.expires_at_ms + 999).div_euclid(1000),
        }
    }
}

/// Entries for one subject, ordered by (timestamp, arrival)
type SubjectLog = BTreeMap<(i64, u64), Entry>;

/// In-memory status store
///
/// Each subject owns its own lock, so writers on different subjects never
/// contend beyond the DashMap shard lookup.
#[derive(Debug, Clone)]
pub struct MemoryStatusStore {
    subjects: Arc<DashMap<String, Arc<Mutex<SubjectLog>>>>,
    arrival: Arc<AtomicU64>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            subjects: Arc::new(DashMap::new()),
            arrival: Arc::new(AtomicU64::new(0)),
            clock,
        }
    }

    fn log(&self, subject: &str) -> Option<Arc<Mutex<SubjectLog>>> {
        self.subjects.get(subject).map(|log| log.clone())
    }

    fn log_or_create(&self, subject: &str) -> Arc<Mutex<SubjectLog>> {
        if let Some(log) = self.log(subject) {
            return log;
        }
        self.subjects
            .entry(subject.to_string())
            .or_default()
            .clone()
    }

    /// Physically remove expired entries, returns count removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;
        for log in self.subjects.iter() {
            let mut log = log.lock();
            let before = log.len();
            log.retain(|_, entry| !entry.is_expired(now));
            removed += before - log.len();
        }
        removed
    }

    /// Stored entries including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.subjects.iter().map(|log| log.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subjects(&self) -> Vec<String> {
        self.subjects.iter().map(|r| r.key().clone()).collect()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn append(
        &self,
        subject: &str,
        timestamp: i64,
        payload: Value,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let entry = Entry {
            payload,
            expires_at_ms: self.clock.now_ms() + ttl.as_millis() as i64,
        };
        let seq = self.arrival.fetch_add(1, Ordering::Relaxed);
        self.log_or_create(subject).lock().insert((timestamp, seq), entry);
        Ok(())
    }

    async fn latest(&self, subject: &str) -> Result<Option<StoredRecord>, StoreError> {
        let Some(log) = self.log(subject) else {
            return Ok(None);
        };
        let now = self.clock.now_ms();
        let log = log.lock();
        Ok(log
            .iter()
            .rev()
            .find(|(_, entry)| !entry.is_expired(now))
            .map(|((ts, _), entry)| entry.to_record(subject, *ts)))
    }

    async fn range(
        &self,
        subject: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        if from > to {
            return Ok(Vec::new());
        }
        let Some(log) = self.log(subject) else {
            return Ok(Vec::new());
        };
        let now = self.clock.now_ms();
        let log = log.lock();
        Ok(log
            .range((from, 0)..=(to, u64::MAX))
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|((ts, _), entry)| entry.to_record(subject, *ts))
            .collect())
    }
}
