//! Common test harness utilities for integration tests.
//!
//! This module provides helpers for:
//! - Allocating ephemeral ports
//! - Building test configurations
//! - Switchable heartbeat probes
//! - Rendering sensor payload lines
//! - Wiring a controller over in-memory stores

// Not all test files use all helpers; silence dead_code warnings for unused exports.
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use crossway::audit::AuditLog;
use crossway::config::{Config, StoreBackend};
use crossway::control::controller::Controller;
use crossway::grid::Grid;
use crossway::metrics::CoreMetrics;
use crossway::replication::failover::{failover_channel, FailoverWriter};
use crossway::replication::heartbeat::{Probe, ProbeError, ProbeFuture};
use crossway::storage::coordinator::{PersistenceCoordinator, PrimaryForwarder};
use crossway::storage::memory::MemoryStore;
use crossway::time::ManualClock;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Allocate an ephemeral loopback port. Returns the address with assigned port.
pub fn ephemeral_port() -> SocketAddr {
    TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .expect("ephemeral addr")
}

/// Default grid with loopback listeners, in-memory replica and no relay.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.ingest.relay_addr = None;
    config.ingest.reconnect_backoff_ms = 50;
    config.gateway.bind = "127.0.0.1:0".into();
    config.storage.replica.backend = StoreBackend::Memory;
    config.timings.sweep_interval_ms = 20;
    config.telemetry.metrics_bind = None;
    config
}

/// Probe whose outcome the test flips at will.
#[derive(Clone, Default)]
pub struct SwitchProbe {
    down: Arc<AtomicBool>,
}

impl SwitchProbe {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

impl Probe for SwitchProbe {
    fn probe(&self) -> ProbeFuture<'_> {
        let down = self.down.load(Ordering::SeqCst);
        Box::pin(async move {
            if down {
                Err(ProbeError::Io("connection refused".into()))
            } else {
                Ok(())
            }
        })
    }
}

pub fn camera_line(intersection: &str, queue: u32, speed: u32, at: DateTime<Utc>) -> String {
    format!(
        r#"camara {{"sensor_id":"CAM-{s}","tipo_sensor":"camara","interseccion":"{intersection}","volumen":{queue},"velocidad_promedio":{speed},"timestamp":"{t}"}}"#,
        s = intersection.trim_start_matches("INT-"),
        t = at.to_rfc3339()
    )
}

pub fn gps_line(intersection: &str, level: &str, speed: u32, at: DateTime<Utc>) -> String {
    format!(
        r#"gps {{"sensor_id":"GPS-{s}","tipo_sensor":"gps","nivel_congestion":"{level}","velocidad_promedio":{speed},"timestamp":"{t}"}}"#,
        s = intersection.trim_start_matches("INT-"),
        t = at.to_rfc3339()
    )
}

/// Controller wired over in-memory stores, with the failover writer and
/// forwarder handed back so the test drives them directly.
pub struct Wiring {
    pub controller: Arc<Controller<ManualClock>>,
    pub clock: ManualClock,
    pub replica: MemoryStore,
    pub primary: MemoryStore,
    pub writer: FailoverWriter,
    pub forwarder: Option<PrimaryForwarder>,
}

pub fn wire(config: &Config) -> Wiring {
    let replica = MemoryStore::new("replica");
    let primary = MemoryStore::new("primary");
    let (writer, reader) = failover_channel(config.timings.health_check_max_retries);
    let metrics = Arc::new(CoreMetrics::default());
    let audit = AuditLog::default();
    let (coordinator, forwarder) = PersistenceCoordinator::new(
        Arc::new(replica.clone()),
        Arc::new(primary.clone()),
        reader,
        config.storage.primary.queue_depth,
        metrics.clone(),
        audit.clone(),
    );
    let clock = ManualClock::default();
    let controller = Arc::new(Controller::new(
        config,
        Arc::new(Grid::from_config(config)),
        Arc::new(coordinator),
        metrics,
        audit,
        clock.clone(),
    ));
    Wiring {
        controller,
        clock,
        replica,
        primary,
        writer,
        forwarder: Some(forwarder),
    }
}

/// Poll `check` every 10ms until it holds or `within` elapses.
pub async fn eventually<F>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
