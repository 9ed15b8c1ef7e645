//! Notification sink trait and implementations.

use std::sync::{Arc, Mutex};

use log::{info, warn};

use super::Notification;

/// Trait for receiving orchestrator notifications.
///
/// # Design Rules
///
/// - `emit()` must be fast and non-blocking (no network calls, no DB writes)
/// - Failure to emit must not affect fetching (best-effort)
pub trait NotificationSink: Send + Sync {
    /// Emit a single notification.
    fn emit(&self, notification: Notification);

    /// Emit multiple notifications.
    ///
    /// Default implementation calls `emit()` for each notification.
    fn emit_batch(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            self.emit(notification);
        }
    }
}

/// No-op implementation for contexts that don't need notifications.
#[derive(Clone, Default)]
pub struct NoOpNotificationSink;

impl NotificationSink for NoOpNotificationSink {
    fn emit(&self, _notification: Notification) {}
}

/// Writes every notification to the log.
#[derive(Clone, Default)]
pub struct LoggingNotificationSink;

impl NotificationSink for LoggingNotificationSink {
    fn emit(&self, notification: Notification) {
        match &notification {
            Notification::DataSourceFailure {
                provider, message, ..
            } => warn!("Data source '{}' failed: {}", provider, message),
            Notification::DataSourceSuccess {
                provider,
                symbol,
                point_count,
                ..
            } => info!(
                "Data source '{}' served {} points for {}",
                provider, point_count, symbol
            ),
            Notification::ProviderSwitch { from, to, .. } => {
                info!("Switched data source from '{}' to '{}'", from, to)
            }
        }
    }
}

/// Mock sink for testing - collects emitted notifications.
#[derive(Clone, Default)]
pub struct MockNotificationSink {
    notifications: Arc<Mutex<Vec<Notification>>>,
}

impl MockNotificationSink {
    pub fn new() -> Self {
        Self {
            notifications: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns all collected notifications.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    /// Returns only the provider switches.
    pub fn switches(&self) -> Vec<Notification> {
        self.notifications()
            .into_iter()
            .filter(|n| matches!(n, Notification::ProviderSwitch { .. }))
            .collect()
    }

    /// Clears collected notifications.
    pub fn clear(&self) {
        self.notifications.lock().unwrap().clear();
    }

    /// Returns the number of collected notifications.
    pub fn len(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }

    /// Returns true if no notifications have been collected.
    pub fn is_empty(&self) -> bool {
        self.notifications.lock().unwrap().is_empty()
    }
}

impl NotificationSink for MockNotificationSink {
    fn emit(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}
