//! Error Types
//!
//! One enum per failure domain. Probe and notification errors are absorbed by
//! the pipeline; store and switch errors drive retries and alerts.

use std::time::Duration;
use thiserror::Error;

/// A single service or replication probe failed.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe failed: {0}")]
    Failed(String),

    #[error("no probe registered for service '{0}'")]
    NotRegistered(String),
}

/// Status store read or write failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("status store unavailable: {0}")]
    Unavailable(String),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A failover step (traffic, load balancer, data plane) was not applied.
#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("switch rejected: {0}")]
    Rejected(String),

    #[error("switch command failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Notification channel could not deliver an alert.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Configuration loading or validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum DrError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Switch(#[from] SwitchError),

    #[error("cycle '{task}' exceeded its {timeout:?} budget")]
    CycleTimeout { task: String, timeout: Duration },

    #[error("cycle '{0}' panicked")]
    CyclePanicked(String),
}

pub type Result<T> = std::result::Result<T, DrError>;
