use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters, shared by `Arc` between the three activities.
#[derive(Default)]
pub struct CoreMetrics {
    /// Readings folded into a snapshot.
    pub events_accepted: AtomicU64,
    /// Readings dropped as malformed.
    pub events_malformed: AtomicU64,
    /// Readings or requests naming an unconfigured intersection.
    pub unknown_intersection: AtomicU64,
    pub state_transitions: AtomicU64,
    pub semaphore_changes: AtomicU64,
    pub green_waves: AtomicU64,
    pub manual_changes: AtomicU64,
    pub replica_writes: AtomicU64,
    pub replica_write_failures: AtomicU64,
    pub primary_writes: AtomicU64,
    pub primary_write_failures: AtomicU64,
    /// Writes not sent to the primary because it was failed over or the queue was full.
    pub primary_writes_skipped: AtomicU64,
    pub probes_ok: AtomicU64,
    pub probes_failed: AtomicU64,
    pub failovers: AtomicU64,
    pub recoveries: AtomicU64,
    pub gateway_requests: AtomicU64,
    pub gateway_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub events_accepted: u64,
    pub events_malformed: u64,
    pub unknown_intersection: u64,
    pub state_transitions: u64,
    pub semaphore_changes: u64,
    pub green_waves: u64,
    pub manual_changes: u64,
    pub replica_writes: u64,
    pub replica_write_failures: u64,
    pub primary_writes: u64,
    pub primary_write_failures: u64,
    pub primary_writes_skipped: u64,
    pub probes_ok: u64,
    pub probes_failed: u64,
    pub failovers: u64,
    pub recoveries: u64,
    pub gateway_requests: u64,
    pub gateway_errors: u64,
}

#[inline]
pub fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl CoreMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            events_accepted: get(&self.events_accepted),
            events_malformed: get(&self.events_malformed),
            unknown_intersection: get(&self.unknown_intersection),
            state_transitions: get(&self.state_transitions),
            semaphore_changes: get(&self.semaphore_changes),
            green_waves: get(&self.green_waves),
            manual_changes: get(&self.manual_changes),
            replica_writes: get(&self.replica_writes),
            replica_write_failures: get(&self.replica_write_failures),
            primary_writes: get(&self.primary_writes),
            primary_write_failures: get(&self.primary_write_failures),
            primary_writes_skipped: get(&self.primary_writes_skipped),
            probes_ok: get(&self.probes_ok),
            probes_failed: get(&self.probes_failed),
            failovers: get(&self.failovers),
            recoveries: get(&self.recoveries),
            gateway_requests: get(&self.gateway_requests),
            gateway_errors: get(&self.gateway_errors),
        }
    }
}

impl MetricsSnapshot {
    /// Prometheus text exposition, one `crossway_<name>_total` line per counter.
    pub fn render(&self) -> String {
        let pairs = [
            ("events_accepted", self.events_accepted),
            ("events_malformed", self.events_malformed),
            ("unknown_intersection", self.unknown_intersection),
            ("state_transitions", self.state_transitions),
            ("semaphore_changes", self.semaphore_changes),
            ("green_waves", self.green_waves),
            ("manual_changes", self.manual_changes),
            ("replica_writes", self.replica_writes),
            ("replica_write_failures", self.replica_write_failures),
            ("primary_writes", self.primary_writes),
            ("primary_write_failures", self.primary_write_failures),
            ("primary_writes_skipped", self.primary_writes_skipped),
            ("probes_ok", self.probes_ok),
            ("probes_failed", self.probes_failed),
            ("failovers", self.failovers),
            ("recoveries", self.recoveries),
            ("gateway_requests", self.gateway_requests),
            ("gateway_errors", self.gateway_errors),
        ];
        let mut body = String::new();
        for (name, value) in pairs {
            body.push_str(&format!("crossway_{name}_total {value}\n"));
        }
        body
    }
}
