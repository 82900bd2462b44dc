//! Alert Dispatch
//!
//! Human-readable notifications for health failures, failover progress and
//! RTO breaches. Delivery problems are logged and swallowed: alerting never
//! blocks or fails the pipeline it reports on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::NotifyError;
use crate::metrics::Metrics;

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A dispatched notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    pub subject: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
    /// Accepted by at least one channel
    pub delivered: bool,
}

/// Outbound notification sink (SNS topic, chat webhook, pager, ...)
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Writes alerts to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        match alert.severity {
            Severity::Info => info!(subject = %alert.subject, "{}", alert.message),
            Severity::Warning => warn!(subject = %alert.subject, "{}", alert.message),
            Severity::Critical => error!(subject = %alert.subject, "{}", alert.message),
        }
        Ok(())
    }
}

/// Fans alerts out to every registered channel
pub struct AlertDispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
    delivery_attempts: u32,
    delivery_timeout: Duration,
    history: RwLock<VecDeque<Alert>>,
    max_history: usize,
    metrics: Option<Arc<Metrics>>,
}

/// Default bound on one send
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

impl AlertDispatcher {
    /// Create a dispatcher with no channels
    pub fn new(delivery_attempts: u32, max_history: usize) -> Self {
        Self {
            channels: Vec::new(),
            delivery_attempts: delivery_attempts.max(1),
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            history: RwLock::new(VecDeque::with_capacity(max_history.min(1024))),
            max_history,
            metrics: None,
        }
    }

    /// Add a notification channel
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Count undelivered alerts
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Bound each send; a send still pending after `timeout` is a failed attempt
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Deliver to all channels; true if any accepted. Never fails.
    pub async fn notify(&self, severity: Severity, subject: &str, message: &str) -> bool {
        let mut alert = Alert {
            severity,
            subject: subject.to_string(),
            message: message.to_string(),
            raised_at: Utc::now(),
            delivered: false,
        };

        for channel in &self.channels {
            if self.deliver(channel.as_ref(), &alert).await {
                alert.delivered = true;
            }
        }

        if !alert.delivered {
            error!(%severity, subject, "Alert not delivered to any channel");
            if let Some(metrics) = &self.metrics {
                metrics.record_alert_undelivered();
            }
        }

        let delivered = alert.delivered;
        self.remember(alert);
        delivered
    }

    async fn deliver(&self, channel: &dyn NotificationChannel, alert: &Alert) -> bool {
        for attempt in 1..=self.delivery_attempts {
            match tokio::time::timeout(self.delivery_timeout, channel.send(alert)).await {
                Ok(Ok(())) => return true,
                Ok(Err(e)) => warn!(
                    channel = channel.name(),
                    attempt,
                    error = %e,
                    "Alert delivery failed"
                ),
                Err(_) => warn!(
                    channel = channel.name(),
                    attempt,
                    timeout = ?self.delivery_timeout,
                    "Alert delivery timed out"
                ),
            }
        }
        false
    }

    fn remember(&self, alert: Alert) {
        if self.max_history == 0 {
            return;
        }
        let mut history = self.history.write();
        if history.len() >= self.max_history {
            history.pop_front();
        }
        history.push_back(alert);
    }

    /// Most recent alerts, newest first
    pub fn recent(&self, count: usize) -> Vec<Alert> {
        self.history.read().iter().rev().take(count).cloned().collect()
    }
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new(2, 256).with_channel(Arc::new(LogChannel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryChannel;

    #[tokio::test]
    async fn test_notify_reaches_every_channel() {
        let a = Arc::new(MemoryChannel::new());
        let b = Arc::new(MemoryChannel::new());
        let dispatcher = AlertDispatcher::new(1, 10)
            .with_channel(a.clone())
            .with_channel(b.clone());

        assert!(dispatcher.notify(Severity::Warning, "tokyo", "search-index down").await);
        assert_eq!(a.received().len(), 1);
        assert_eq!(b.received()[0].message, "search-index down");
    }

    #[tokio::test]
    async fn test_retries_then_swallows_failure() {
        let flaky = Arc::new(MemoryChannel::failing_first(1));
        let dead = Arc::new(MemoryChannel::failing_first(u32::MAX));
        let metrics = Arc::new(Metrics::new());

        let dispatcher = AlertDispatcher::new(2, 10)
            .with_channel(flaky.clone())
            .with_metrics(metrics.clone());
        assert!(dispatcher.notify(Severity::Critical, "failover", "x").await);
        assert_eq!(flaky.attempts(), 2);

        let dispatcher = AlertDispatcher::new(2, 10)
            .with_channel(dead.clone())
            .with_metrics(metrics.clone());
        assert!(!dispatcher.notify(Severity::Critical, "failover", "x").await);
        assert_eq!(dead.attempts(), 2);
        assert_eq!(metrics.alerts_undelivered(), 1);
        assert!(!dispatcher.recent(1)[0].delivered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_channel_is_abandoned_after_timeout() {
        let stuck = Arc::new(MemoryChannel::hanging());
        let live = Arc::new(MemoryChannel::new());
        let metrics = Arc::new(Metrics::new());
        let dispatcher = AlertDispatcher::new(2, 10)
            .with_channel(stuck.clone())
            .with_channel(live.clone())
            .with_metrics(metrics.clone())
            .with_delivery_timeout(Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        assert!(dispatcher.notify(Severity::Critical, "tokyo", "down").await);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert_eq!(stuck.attempts(), 2);
        assert_eq!(live.received().len(), 1);
        assert_eq!(metrics.alerts_undelivered(), 0);

        let only_stuck = AlertDispatcher::new(1, 10)
            .with_channel(stuck.clone())
            .with_metrics(metrics.clone())
            .with_delivery_timeout(Duration::from_secs(5));
        assert!(!only_stuck.notify(Severity::Warning, "tokyo", "down").await);
        assert_eq!(metrics.alerts_undelivered(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let dispatcher = AlertDispatcher::new(1, 3);
        tokio_test::block_on(async {
            for i in 0..5 {
                dispatcher
                    .notify(Severity::Info, "health", &format!("alert {}", i))
                    .await;
            }
        });

        let recent = dispatcher.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message, "alert 4");
        assert_eq!(recent[2].message, "alert 2");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert_eq!(Severity::Info.to_string(), "INFO");
    }
}
