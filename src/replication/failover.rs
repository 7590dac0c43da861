//! Shared failover flag.
//!
//! The heartbeat monitor owns the only [`FailoverWriter`]; the persistence
//! coordinator and the gateway hold [`FailoverReader`]s. Changes travel over a
//! `tokio::sync::watch` channel, so readers never block the writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FailoverState {
    Healthy,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverStatus {
    pub state: FailoverState,
    pub consecutive_failures: u32,
    pub last_probe_at: Option<DateTime<Utc>>,
    /// When `state` last changed.
    pub since: Option<DateTime<Utc>>,
}

impl Default for FailoverStatus {
    fn default() -> Self {
        Self {
            state: FailoverState::Healthy,
            consecutive_failures: 0,
            last_probe_at: None,
            since: None,
        }
    }
}

/// A state change, reported exactly once by the probe that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverTransition {
    FailedOver { consecutive_failures: u32 },
    Recovered,
}

pub struct FailoverWriter {
    tx: watch::Sender<FailoverStatus>,
    max_retries: u32,
}

#[derive(Clone)]
pub struct FailoverReader {
    rx: watch::Receiver<FailoverStatus>,
}

/// Create the flag, starting `HEALTHY`.
pub fn failover_channel(max_retries: u32) -> (FailoverWriter, FailoverReader) {
    let (tx, rx) = watch::channel(FailoverStatus::default());
    (
        FailoverWriter {
            tx,
            max_retries: max_retries.max(1),
        },
        FailoverReader { rx },
    )
}

impl FailoverWriter {
    pub fn reader(&self) -> FailoverReader {
        FailoverReader {
            rx: self.tx.subscribe(),
        }
    }

    pub fn status(&self) -> FailoverStatus {
        *self.tx.borrow()
    }

    /// Successful probe: resets the failure count and recovers a failed primary.
    pub fn record_success(&self, at: DateTime<Utc>) -> Option<FailoverTransition> {
        let mut transition = None;
        self.tx.send_modify(|status| {
            status.consecutive_failures = 0;
            status.last_probe_at = Some(at);
            if status.state == FailoverState::Failed {
                status.state = FailoverState::Healthy;
                status.since = Some(at);
                transition = Some(FailoverTransition::Recovered);
            }
        });
        transition
    }

    /// Failed or timed-out probe: fails over once the retry budget is spent.
    pub fn record_failure(&self, at: DateTime<Utc>) -> Option<FailoverTransition> {
        let max_retries = self.max_retries;
        let mut transition = None;
        self.tx.send_modify(|status| {
            status.consecutive_failures = status.consecutive_failures.saturating_add(1);
            status.last_probe_at = Some(at);
            if status.state == FailoverState::Healthy && status.consecutive_failures >= max_retries {
                status.state = FailoverState::Failed;
                status.since = Some(at);
                transition = Some(FailoverTransition::FailedOver {
                    consecutive_failures: status.consecutive_failures,
                });
            }
        });
        transition
    }
}

impl FailoverReader {
    pub fn status(&self) -> FailoverStatus {
        *self.rx.borrow()
    }

    pub fn is_healthy(&self) -> bool {
        self.rx.borrow().state == FailoverState::Healthy
    }

    /// Wait for the next change; `false` once the writer is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
