use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::event;

pub const DEFAULT_AUDIT_CAPACITY: usize = 1024;

/// Operator-visible alert: failover, recovery, overrides and data loss.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub event_type: String,
    pub subject: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Bounded in-memory alert log, injected into the components that raise alerts.
/// Every event is also emitted on the `audit` tracing target.
#[derive(Clone)]
pub struct AuditLog {
    inner: Arc<Mutex<VecDeque<AuditEvent>>>,
    capacity: usize,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn emit(&self, event_type: &str, subject: &str, message: &str, at: DateTime<Utc>) {
        event!(
            target: "audit",
            tracing::Level::INFO,
            %event_type,
            %subject,
            %message
        );
        let mut guard = self.inner.lock();
        if guard.len() == self.capacity {
            guard.pop_front();
        }
        guard.push_back(AuditEvent {
            event_type: event_type.to_string(),
            subject: subject.to_string(),
            message: message.to_string(),
            at,
        });
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of retained events, oldest first.
    pub fn snapshot(&self) -> Vec<AuditEvent> {
        self.inner.lock().iter().cloned().collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.inner
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_events_fall_off_at_capacity() {
        let log = AuditLog::new(2);
        let now = Utc::now();
        log.emit("failover", "primary", "down", now);
        log.emit("recovery", "primary", "up", now);
        log.emit("green_wave", "row B", "ambulance", now);
        let kinds: Vec<String> = log.snapshot().into_iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec!["recovery", "green_wave"]);
        assert_eq!(log.count("failover"), 0);
    }
}
