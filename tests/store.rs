mod common;

use common::{camera_line, ephemeral_port, test_config};
use crossway::audit::AuditLog;
use crossway::config::StoreBackend;
use crossway::control::controller::Controller;
use crossway::grid::Grid;
use crossway::metrics::CoreMetrics;
use crossway::replication::failover::failover_channel;
use crossway::runtime::open_store;
use crossway::storage::coordinator::{PersistenceCoordinator, PrimaryRoute};
use crossway::storage::memory::MemoryStore;
use crossway::storage::records::WriteRecord;
use crossway::storage::remote::RemoteStore;
use crossway::storage::server::serve_store;
use crossway::storage::store::{StoreError, TrafficStore};
use crossway::time::{Clock, ManualClock};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::watch;

#[tokio::test]
async fn primary_host_persists_forwarded_records_to_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("primary.db");
    let hosted = open_store("primary", StoreBackend::Sqlite, &path).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (addr, host) = serve_store("127.0.0.1:0", hosted, shutdown_rx.clone()).await.unwrap();

    let config = test_config();
    let replica = MemoryStore::new("replica");
    let remote = Arc::new(RemoteStore::new("primary", addr.to_string(), Duration::from_secs(2)));
    let (_writer, reader) = failover_channel(config.timings.health_check_max_retries);
    let (coordinator, forwarder) = PersistenceCoordinator::new(
        Arc::new(replica.clone()),
        remote.clone(),
        reader,
        16,
        Arc::new(CoreMetrics::default()),
        AuditLog::default(),
    );
    let forwarding = tokio::spawn(forwarder.run(shutdown_rx));
    let clock = ManualClock::default();
    let controller = Controller::new(
        &config,
        Arc::new(Grid::from_config(&config)),
        Arc::new(coordinator),
        Arc::new(CoreMetrics::default()),
        AuditLog::default(),
        clock.clone(),
    );

    let outcome = controller
        .ingest_line(&camera_line("INT-A4", 16, 9, clock.now()))
        .await
        .unwrap();
    assert!(outcome.records >= 3);

    let expected = replica.len() as u64;
    let mut totals = remote.summary().await.unwrap();
    for _ in 0..200 {
        let written = totals.sensor_events + totals.semaphore_changes + totals.congestion_detections;
        if written == expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        totals = remote.summary().await.unwrap();
    }
    assert_eq!(totals.sensor_events, 1);
    assert_eq!(totals.congestion_detections, 1);
    assert_eq!(totals.semaphore_changes, 1);

    shutdown_tx.send(true).unwrap();
    forwarding.await.unwrap();
    host.await.unwrap();
    drop(remote);
    drop(controller);

    let reopened = open_store("primary", StoreBackend::Sqlite, &path).unwrap();
    assert_eq!(reopened.summary().await.unwrap(), totals);
    let id = Grid::from_config(&config).resolve("INT-A4").unwrap();
    let events = reopened.recent_events(id.clone(), 5).await.unwrap();
    assert_eq!(events.len(), 1);
    let change = reopened.latest_semaphore(id).await.unwrap().unwrap();
    assert_eq!(change.new_color.as_str(), "GREEN");
}

#[tokio::test]
async fn unreachable_primary_is_unavailable_not_fatal() {
    let remote = RemoteStore::new("primary", ephemeral_port().to_string(), Duration::from_millis(300));
    let err = remote.summary().await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_) | StoreError::Timeout));

    let config = test_config();
    let replica = MemoryStore::new("replica");
    let (_writer, reader) = failover_channel(config.timings.health_check_max_retries);
    let (coordinator, _forwarder) = PersistenceCoordinator::new(
        Arc::new(replica.clone()),
        Arc::new(remote),
        reader,
        1,
        Arc::new(CoreMetrics::default()),
        AuditLog::default(),
    );
    let record = |n: u32| {
        let line = camera_line("INT-A1", n, 30, chrono::Utc::now());
        let grid = Grid::from_config(&config);
        WriteRecord::SensorEvent(crossway::ingest::event::parse_line(&line, &grid).unwrap())
    };
    // Queue depth one: the second record is dropped for the primary, never for the replica.
    let first = coordinator.record(record(1)).await;
    let second = coordinator.record(record(2)).await;
    assert_eq!(first.primary, PrimaryRoute::Queued);
    assert_eq!(second.primary, PrimaryRoute::Dropped);
    assert!(first.replica.is_ok() && second.replica.is_ok());
    assert_eq!(replica.len(), 2);
}
