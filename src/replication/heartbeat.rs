//! Primary health probing.
//!
//! Every `health_check_interval` the monitor sends one probe bounded by
//! `health_check_timeout`. `health_check_max_retries` consecutive failures
//! flip the shared flag to `FAILED`; the next success flips it back.

use crate::core::config::TimingConfig;
use crate::core::time::Clock;
use crate::ops::audit::AuditLog;
use crate::ops::metrics::{bump, CoreMetrics};
use crate::replication::failover::{FailoverTransition, FailoverWriter};
use crate::storage::server::{PING, PONG};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("probe i/o error: {0}")]
    Io(String),
    #[error("unexpected probe reply: {0:?}")]
    UnexpectedReply(String),
}

pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ProbeError>> + Send + 'a>>;

/// One liveness check against the primary.
pub trait Probe: Send + Sync {
    fn probe(&self) -> ProbeFuture<'_>;
}

/// Connects to the primary's heartbeat responder and expects `PONG` for `PING`.
pub struct TcpProbe {
    addr: String,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl Probe for TcpProbe {
    fn probe(&self) -> ProbeFuture<'_> {
        Box::pin(async move {
            let io = |e: std::io::Error| ProbeError::Io(e.to_string());
            let stream = TcpStream::connect(&self.addr).await.map_err(io)?;
            let (read, mut write) = stream.into_split();
            write.write_all(format!("{PING}\n").as_bytes()).await.map_err(io)?;
            write.flush().await.map_err(io)?;
            let mut line = String::new();
            BufReader::new(read).read_line(&mut line).await.map_err(io)?;
            if line.trim() == PONG {
                Ok(())
            } else {
                Err(ProbeError::UnexpectedReply(line.trim().to_string()))
            }
        })
    }
}

pub struct HeartbeatMonitor<C: Clock> {
    probe: Arc<dyn Probe>,
    writer: FailoverWriter,
    interval: Duration,
    timeout: Duration,
    clock: C,
    metrics: Arc<CoreMetrics>,
    audit: AuditLog,
}

impl<C: Clock> HeartbeatMonitor<C> {
    pub fn new(
        probe: Arc<dyn Probe>,
        writer: FailoverWriter,
        timings: &TimingConfig,
        clock: C,
        metrics: Arc<CoreMetrics>,
        audit: AuditLog,
    ) -> Self {
        Self {
            probe,
            writer,
            interval: timings.health_check_interval(),
            timeout: timings.health_check_timeout(),
            clock,
            metrics,
            audit,
        }
    }

    pub fn writer(&self) -> &FailoverWriter {
        &self.writer
    }

    /// Run one probe and fold its outcome into the failover flag.
    pub async fn tick(&self) -> Option<FailoverTransition> {
        let outcome = match tokio::time::timeout(self.timeout, self.probe.probe()).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.timeout)),
        };
        let now = self.clock.now();
        let transition = match outcome {
            Ok(()) => {
                bump(&self.metrics.probes_ok);
                self.writer.record_success(now)
            }
            Err(err) => {
                bump(&self.metrics.probes_failed);
                let failures = self.writer.status().consecutive_failures + 1;
                tracing::debug!(failures, "primary probe failed: {err}");
                self.writer.record_failure(now)
            }
        };
        match transition {
            Some(FailoverTransition::FailedOver {
                consecutive_failures,
            }) => {
                bump(&self.metrics.failovers);
                let message = format!(
                    "primary unreachable after {consecutive_failures} probes; replica is authoritative"
                );
                tracing::error!(consecutive_failures, "{message}");
                self.audit.emit("failover", "primary", &message, now);
            }
            Some(FailoverTransition::Recovered) => {
                bump(&self.metrics.recoveries);
                let message = "primary reachable again; resuming primary writes";
                tracing::warn!("{message}");
                self.audit.emit("recovery", "primary", message, now);
            }
            None => {}
        }
        transition
    }

    /// Probe on a fixed interval until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval = ?self.interval, timeout = ?self.timeout, "heartbeat monitor started");
        loop {
            self.tick().await;
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = self.clock.sleep(self.interval) => {}
            }
        }
        tracing::info!("heartbeat monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::time::ManualClock;
    use crate::replication::failover::{failover_channel, FailoverState};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct ScriptedProbe {
        outcomes: Mutex<VecDeque<Result<(), ProbeError>>>,
    }

    impl ScriptedProbe {
        fn new(outcomes: Vec<Result<(), ProbeError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
            }
        }
    }

    impl Probe for ScriptedProbe {
        fn probe(&self) -> ProbeFuture<'_> {
            let next = self.outcomes.lock().pop_front().unwrap_or(Ok(()));
            Box::pin(async move { next })
        }
    }

    struct HangingProbe;

    impl Probe for HangingProbe {
        fn probe(&self) -> ProbeFuture<'_> {
            Box::pin(std::future::pending())
        }
    }

    fn monitor(probe: Arc<dyn Probe>) -> (HeartbeatMonitor<ManualClock>, AuditLog) {
        let mut timings = Config::default().timings;
        timings.health_check_max_retries = 3;
        timings.health_check_timeout_ms = 20;
        let (writer, _reader) = failover_channel(timings.health_check_max_retries);
        let audit = AuditLog::default();
        let monitor = HeartbeatMonitor::new(
            probe,
            writer,
            &timings,
            ManualClock::default(),
            Arc::new(CoreMetrics::default()),
            audit.clone(),
        );
        (monitor, audit)
    }

    #[tokio::test]
    async fn three_failures_fail_over_and_one_success_recovers() {
        let down = || Err(ProbeError::Io("connection refused".into()));
        let probe = ScriptedProbe::new(vec![down(), down(), down(), down(), Ok(())]);
        let (monitor, audit) = monitor(Arc::new(probe));
        assert_eq!(monitor.tick().await, None);
        assert_eq!(monitor.tick().await, None);
        assert!(matches!(
            monitor.tick().await,
            Some(FailoverTransition::FailedOver {
                consecutive_failures: 3
            })
        ));
        assert_eq!(monitor.tick().await, None);
        assert_eq!(monitor.tick().await, Some(FailoverTransition::Recovered));
        assert_eq!(audit.count("failover"), 1);
        assert_eq!(audit.count("recovery"), 1);
        assert_eq!(monitor.metrics.snapshot().probes_failed, 4);
    }

    #[tokio::test]
    async fn slow_probes_count_as_failures() {
        let (monitor, _audit) = monitor(Arc::new(HangingProbe));
        for _ in 0..3 {
            monitor.tick().await;
        }
        assert_eq!(monitor.writer().status().state, FailoverState::Failed);
    }

    #[tokio::test]
    async fn tcp_probe_against_heartbeat_responder() {
        let (tx, rx) = watch::channel(false);
        let (addr, _task) = crate::storage::server::serve_heartbeat("127.0.0.1:0", rx)
            .await
            .unwrap();
        assert_eq!(TcpProbe::new(addr.to_string()).probe().await, Ok(()));
        tx.send(true).unwrap();

        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let refused = TcpProbe::new(format!("127.0.0.1:{port}")).probe().await;
        assert!(matches!(refused, Err(ProbeError::Io(_))));
    }
}
