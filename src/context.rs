//! Shared component context
//!
//! Everything a component needs besides its own probes or switches, built
//! once at startup and cloned into each component.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::DrConfig;
use crate::metrics::Metrics;
use crate::observability::AlertDispatcher;
use crate::storage::{Clock, StatusStore};

#[derive(Clone)]
pub struct DrContext {
    pub config: Arc<DrConfig>,
    pub store: Arc<dyn StatusStore>,
    pub clock: Arc<dyn Clock>,
    pub alerts: Arc<AlertDispatcher>,
    pub metrics: Arc<Metrics>,
}

impl DrContext {
    /// Bundle the shared handles; the config is frozen from here on
    pub fn new(
        config: DrConfig,
        store: Arc<dyn StatusStore>,
        clock: Arc<dyn Clock>,
        alerts: Arc<AlertDispatcher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            clock,
            alerts,
            metrics,
        }
    }
}

/// Which region currently serves traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionPair {
    pub primary: String,
    pub secondary: String,
}

/// Shared, swappable region roles
#[derive(Debug, Clone)]
pub struct RegionRoles {
    inner: Arc<RwLock<RegionPair>>,
}

impl RegionRoles {
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegionPair {
                primary: primary.into(),
                secondary: secondary.into(),
            })),
        }
    }

    pub fn from_config(config: &DrConfig) -> Self {
        Self::new(config.primary.name.clone(), config.secondary.name.clone())
    }

    pub fn current(&self) -> RegionPair {
        self.inner.read().clone()
    }

    /// Secondary becomes primary and vice versa
    pub fn promote_secondary(&self) -> RegionPair {
        let mut guard = self.inner.write();
        let pair = &mut *guard;
        std::mem::swap(&mut pair.primary, &mut pair.secondary);
        pair.clone()
    }
}
