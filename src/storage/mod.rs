//! Status Storage
//!
//! Append-only time-series store with TTL, plus the clock it expires against.

mod clock;
mod status_store;
mod ttl;

pub use clock::{Clock, ManualClock, SystemClock};
pub use status_store::{MemoryStatusStore, StatusStore, StoredRecord};
pub use ttl::TtlSweeper;

use serde::Serialize;
use std::time::Duration;
use tracing::warn;

use crate::error::StoreError;

/// Serialize and append, retrying once after `backoff` on failure
pub async fn append_with_retry<T: Serialize + ?Sized>(
    store: &dyn StatusStore,
    subject: &str,
    timestamp: i64,
    payload: &T,
    ttl: Duration,
    backoff: Duration,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(payload)?;
    match store.append(subject, timestamp, value.clone(), ttl).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(subject, timestamp, error = %e, "Status write failed, retrying once");
            tokio::time::sleep(backoff).await;
            store.append(subject, timestamp, value, ttl).await
        }
    }
}
