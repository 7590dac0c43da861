mod common;

use common::{camera_line, eventually, test_config, wire, SwitchProbe};
use crossway::gateway::api::GatewayRequest;
use crossway::gateway::service::GatewayService;
use crossway::replication::failover::{failover_channel, FailoverState, FailoverTransition};
use crossway::replication::heartbeat::{HeartbeatMonitor, Probe, TcpProbe};
use crossway::audit::AuditLog;
use crossway::metrics::CoreMetrics;
use crossway::storage::server::serve_heartbeat;
use crossway::time::{Clock, ManualClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn primary_outage_moves_writes_and_reads_to_the_replica() {
    let config = test_config();
    let mut w = wire(&config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let forwarder = tokio::spawn(w.forwarder.take().unwrap().run(shutdown_rx));
    let probe = SwitchProbe::default();
    let monitor = HeartbeatMonitor::new(
        Arc::new(probe.clone()),
        w.writer,
        &config.timings,
        w.clock.clone(),
        w.controller.metrics().clone(),
        w.controller.audit().clone(),
    );
    let service = GatewayService::new(w.controller.clone());
    let now = w.clock.now();

    w.controller
        .ingest_line(&camera_line("INT-C1", 12, 15, now))
        .await
        .unwrap();
    let (replica, primary) = (w.replica.clone(), w.primary.clone());
    assert!(eventually(WAIT, || primary.len() == replica.len()).await);

    probe.set_down(true);
    for _ in 0..2 {
        assert_eq!(monitor.tick().await, None);
        assert!(w.controller.coordinator().failover().is_healthy());
    }
    assert_eq!(
        monitor.tick().await,
        Some(FailoverTransition::FailedOver {
            consecutive_failures: 3
        })
    );
    assert_eq!(monitor.tick().await, None);
    assert_eq!(w.controller.audit().count("failover"), 1);

    let primary_before = w.primary.len();
    w.controller
        .ingest_line(&camera_line("INT-C1", 11, 18, now))
        .await
        .unwrap();
    assert_eq!(w.primary.len(), primary_before);
    assert!(w.replica.len() > primary_before);

    let summary = serde_json::to_value(service.handle(GatewayRequest::SystemSummary).await).unwrap();
    let data = &summary["result"]["data"];
    assert_eq!(data["failover"]["state"], "FAILED");
    assert_eq!(data["source"], "replica");
    assert_eq!(data["totals"]["sensor_events"], 2);

    probe.set_down(false);
    assert_eq!(monitor.tick().await, Some(FailoverTransition::Recovered));
    assert_eq!(w.controller.audit().count("recovery"), 1);

    // No backfill: the primary only sees records written after recovery.
    let replica_mark = w.replica.len();
    w.controller
        .ingest_line(&camera_line("INT-C1", 13, 14, now))
        .await
        .unwrap();
    let written = w.replica.len() - replica_mark;
    assert!(eventually(WAIT, || primary.len() == primary_before + written).await);

    shutdown_tx.send(true).unwrap();
    forwarder.await.unwrap();
}

#[tokio::test]
async fn heartbeat_over_tcp_follows_the_responder() {
    let mut timings = test_config().timings;
    timings.health_check_timeout_ms = 200;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (addr, responder) = serve_heartbeat("127.0.0.1:0", shutdown_rx).await.unwrap();

    let (writer, reader) = failover_channel(timings.health_check_max_retries);
    let probe: Arc<dyn Probe> = Arc::new(TcpProbe::new(addr.to_string()));
    let monitor = HeartbeatMonitor::new(
        probe,
        writer,
        &timings,
        ManualClock::default(),
        Arc::new(CoreMetrics::default()),
        AuditLog::default(),
    );
    assert_eq!(monitor.tick().await, None);
    assert!(reader.is_healthy());

    shutdown_tx.send(true).unwrap();
    responder.await.unwrap();
    for _ in 0..3 {
        monitor.tick().await;
    }
    assert_eq!(reader.status().state, FailoverState::Failed);
    assert_eq!(reader.status().consecutive_failures, 3);

    let (_restart_tx, restart_rx) = watch::channel(false);
    let (_, _responder) = serve_heartbeat(&addr.to_string(), restart_rx).await.unwrap();
    assert_eq!(monitor.tick().await, Some(FailoverTransition::Recovered));
    assert!(reader.is_healthy());
}
