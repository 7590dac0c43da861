//! Dual-write persistence.
//!
//! Every record goes to the replica, awaited. While the primary is healthy the
//! same record is also queued for the [`PrimaryForwarder`], which drains the
//! queue in the background so a slow primary never stalls the control loop.

use crate::ops::audit::AuditLog;
use crate::ops::metrics::{bump, CoreMetrics};
use crate::replication::failover::FailoverReader;
use crate::storage::records::WriteRecord;
use crate::storage::store::{StoreError, TrafficStore};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// What happened to the primary copy of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryRoute {
    Queued,
    /// The primary was failed over when the record was written.
    Skipped,
    /// The forwarder queue was full; the primary misses this record.
    Dropped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub replica: Result<(), StoreError>,
    pub primary: PrimaryRoute,
}

pub struct PersistenceCoordinator {
    replica: Arc<dyn TrafficStore>,
    primary: Arc<dyn TrafficStore>,
    failover: FailoverReader,
    queue: mpsc::Sender<WriteRecord>,
    metrics: Arc<CoreMetrics>,
    audit: AuditLog,
}

/// Background writer owning the receiving end of the primary queue.
pub struct PrimaryForwarder {
    primary: Arc<dyn TrafficStore>,
    failover: FailoverReader,
    queue: mpsc::Receiver<WriteRecord>,
    metrics: Arc<CoreMetrics>,
}

impl PersistenceCoordinator {
    pub fn new(
        replica: Arc<dyn TrafficStore>,
        primary: Arc<dyn TrafficStore>,
        failover: FailoverReader,
        queue_depth: usize,
        metrics: Arc<CoreMetrics>,
        audit: AuditLog,
    ) -> (Self, PrimaryForwarder) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let forwarder = PrimaryForwarder {
            primary: primary.clone(),
            failover: failover.clone(),
            queue: rx,
            metrics: metrics.clone(),
        };
        (
            Self {
                replica,
                primary,
                failover,
                queue: tx,
                metrics,
                audit,
            },
            forwarder,
        )
    }

    pub fn replica(&self) -> &Arc<dyn TrafficStore> {
        &self.replica
    }

    pub fn primary(&self) -> &Arc<dyn TrafficStore> {
        &self.primary
    }

    pub fn failover(&self) -> &FailoverReader {
        &self.failover
    }

    /// Store answering reads: the primary while healthy, otherwise the replica.
    pub fn authoritative(&self) -> &Arc<dyn TrafficStore> {
        if self.failover.is_healthy() {
            &self.primary
        } else {
            &self.replica
        }
    }

    /// Write one record. A replica failure is a data-loss alert, never an error
    /// for the caller; the control loop keeps running.
    pub async fn record(&self, record: WriteRecord) -> RecordOutcome {
        let primary_healthy = self.failover.is_healthy();
        let replica = self.replica.insert(&record).await;
        match &replica {
            Ok(()) => bump(&self.metrics.replica_writes),
            Err(err) => {
                bump(&self.metrics.replica_write_failures);
                let subject = record
                    .intersection()
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "grid".to_string());
                let message = format!("replica rejected {} record: {err}", record.kind());
                tracing::error!(store = self.replica.name(), %subject, "data loss: {message}");
                self.audit.emit("data_loss", &subject, &message, Utc::now());
            }
        }
        let primary = if !primary_healthy {
            bump(&self.metrics.primary_writes_skipped);
            PrimaryRoute::Skipped
        } else {
            match self.queue.try_send(record) {
                Ok(()) => PrimaryRoute::Queued,
                Err(err) => {
                    bump(&self.metrics.primary_writes_skipped);
                    tracing::warn!("primary write queue rejected record: {err}");
                    PrimaryRoute::Dropped
                }
            }
        };
        RecordOutcome { replica, primary }
    }
}

impl PrimaryForwarder {
    /// Drain queued records into the primary until shutdown or until the
    /// coordinator is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = self.queue.recv() => match next {
                    Some(record) => self.forward(record).await,
                    None => break,
                },
            }
        }
        tracing::info!(pending = self.queue.len(), "primary forwarder stopped");
    }

    async fn forward(&self, record: WriteRecord) {
        // Records queued before a failover are not worth a timeout each.
        if !self.failover.is_healthy() {
            bump(&self.metrics.primary_writes_skipped);
            return;
        }
        match self.primary.insert(&record).await {
            Ok(()) => bump(&self.metrics.primary_writes),
            Err(err) => {
                bump(&self.metrics.primary_write_failures);
                tracing::info!(store = self.primary.name(), kind = record.kind(), "primary write failed: {err}");
            }
        }
    }
}
