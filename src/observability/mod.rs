//! Observability Module
//!
//! Alert dispatch and notification channels.

mod alerts;

pub use alerts::{Alert, AlertDispatcher, LogChannel, NotificationChannel, Severity};
