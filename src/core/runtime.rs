use crate::config::{Config, StoreBackend};
use crate::control::controller::Controller;
use crate::gateway::server::serve_gateway;
use crate::gateway::service::GatewayService;
use crate::grid::Grid;
use crate::ingest::subscriber::RelaySubscriber;
use crate::ops::audit::AuditLog;
use crate::ops::metrics::CoreMetrics;
use crate::replication::failover::failover_channel;
use crate::replication::heartbeat::{HeartbeatMonitor, Probe, TcpProbe};
use crate::storage::coordinator::{PersistenceCoordinator, PrimaryForwarder};
use crate::storage::memory::MemoryStore;
use crate::storage::remote::RemoteStore;
use crate::storage::sqlite::SqliteStore;
use crate::storage::store::TrafficStore;
use crate::telemetry;
use crate::telemetry::LogHandle;
use crate::time::Clock;
use anyhow::{Context, Result};
use futures::future::join_all;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a store of the configured backend under `name`.
pub fn open_store(name: &str, backend: StoreBackend, path: &Path) -> Result<Arc<dyn TrafficStore>> {
    Ok(match backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new(name)),
        StoreBackend::Sqlite => Arc::new(
            SqliteStore::open(name, path)
                .with_context(|| format!("failed to open {name} store at {}", path.display()))?,
        ),
    })
}

/// Stores and probe the runtime persists through. Built from config in
/// production; tests substitute in-memory stores and scripted probes.
pub struct Components {
    pub replica: Arc<dyn TrafficStore>,
    pub primary: Arc<dyn TrafficStore>,
    pub probe: Arc<dyn Probe>,
}

impl Components {
    pub fn from_config(config: &Config) -> Result<Self> {
        let replica = open_store(
            "replica",
            config.storage.replica.backend,
            &config.storage.replica.path,
        )?;
        let primary = &config.storage.primary;
        Ok(Self {
            replica,
            primary: Arc::new(RemoteStore::new(
                "primary",
                primary.addr.clone(),
                primary.request_timeout(),
            )),
            probe: Arc::new(TcpProbe::new(primary.heartbeat_addr.clone())),
        })
    }
}

/// Wires the controller, persistence, heartbeat, gateway, relay feed, sweep loop and telemetry.
pub struct Runtime<C: Clock> {
    config: Config,
    controller: Arc<Controller<C>>,
    gateway: Arc<GatewayService<C>>,
    monitor: Option<HeartbeatMonitor<C>>,
    forwarder: Option<PrimaryForwarder>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    gateway_addr: Option<SocketAddr>,
    telemetry_addr: Option<SocketAddr>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    log_handle: Option<LogHandle>,
}

impl<C: Clock> Runtime<C> {
    pub fn new(config: Config, clock: C, log_handle: Option<LogHandle>) -> Result<Self> {
        config.validate()?;
        let components = Components::from_config(&config)?;
        Self::with_components(config, clock, log_handle, components)
    }

    pub fn with_components(
        config: Config,
        clock: C,
        log_handle: Option<LogHandle>,
        components: Components,
    ) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let metrics = Arc::new(CoreMetrics::default());
        let audit = AuditLog::default();
        let grid = Arc::new(Grid::from_config(&config));
        let (writer, reader) = failover_channel(config.timings.health_check_max_retries);
        let (coordinator, forwarder) = PersistenceCoordinator::new(
            components.replica,
            components.primary,
            reader,
            config.storage.primary.queue_depth,
            metrics.clone(),
            audit.clone(),
        );
        let monitor = HeartbeatMonitor::new(
            components.probe,
            writer,
            &config.timings,
            clock.clone(),
            metrics.clone(),
            audit.clone(),
        );
        let controller = Arc::new(Controller::new(
            &config,
            grid,
            Arc::new(coordinator),
            metrics,
            audit,
            clock,
        ));
        let gateway = Arc::new(GatewayService::new(controller.clone()));
        Ok(Self {
            config,
            controller,
            gateway,
            monitor: Some(monitor),
            forwarder: Some(forwarder),
            tasks: Vec::new(),
            gateway_addr: None,
            telemetry_addr: None,
            shutdown_tx,
            shutdown_rx,
            log_handle,
        })
    }

    pub fn controller(&self) -> &Arc<Controller<C>> {
        &self.controller
    }

    pub fn gateway_addr(&self) -> Option<SocketAddr> {
        self.gateway_addr
    }

    pub fn telemetry_addr(&self) -> Option<SocketAddr> {
        self.telemetry_addr
    }

    /// Start every subsystem and wait for CTRL+C or an internal shutdown request.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        self.handle_shutdown().await
    }

    /// Spawn background tasks and bind listeners without waiting for shutdown.
    pub async fn start(&mut self) -> Result<()> {
        if let Some(forwarder) = self.forwarder.take() {
            let shutdown = self.shutdown_rx.clone();
            self.spawn("primary forwarder", forwarder.run(shutdown));
        }
        if let Some(monitor) = self.monitor.take() {
            let shutdown = self.shutdown_rx.clone();
            self.spawn("heartbeat monitor", monitor.run(shutdown));
        }
        let sweep = sweep_loop(
            self.controller.clone(),
            self.config.timings.sweep_interval(),
            self.shutdown_rx.clone(),
        );
        self.spawn("semaphore sweep", sweep);

        let (addr, handle) = serve_gateway(
            &self.config.gateway.bind,
            self.gateway.clone(),
            self.shutdown_rx.clone(),
        )
        .await?;
        self.gateway_addr = Some(addr);
        self.tasks.push(("gateway", handle));

        match self.config.ingest.relay_addr.clone() {
            Some(relay) => {
                let subscriber =
                    RelaySubscriber::new(relay, &self.config.ingest, self.controller.clone());
                let shutdown = self.shutdown_rx.clone();
                self.spawn("relay subscriber", subscriber.run(shutdown));
            }
            None => tracing::warn!("no relay address configured; sensor ingest disabled"),
        }

        self.start_telemetry().await?;
        tracing::info!(
            intersections = self.controller.grid().len(),
            gateway = %addr,
            "crossway runtime started"
        );
        Ok(())
    }

    /// Stop background tasks without waiting for SIGINT.
    pub async fn stop(&mut self) -> Result<()> {
        self.shutdown_tx
            .send(true)
            .context("failed to broadcast shutdown")?;
        self.drain().await;
        Ok(())
    }

    async fn start_telemetry(&mut self) -> Result<()> {
        if let Some(bind) = self.config.telemetry.metrics_bind.clone() {
            let (addr, handle) = telemetry::start_http(
                &bind,
                self.controller.clone(),
                self.log_handle.clone(),
                self.shutdown_rx.clone(),
            )
            .await?;
            self.telemetry_addr = Some(addr);
            self.tasks.push(("telemetry", handle));
        }
        Ok(())
    }

    fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push((name, tokio::spawn(task)));
    }

    async fn handle_shutdown(&mut self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received");
            }
            _ = shutdown_rx.changed() => {
                tracing::info!("shutdown requested by component");
            }
        }
        self.shutdown_tx
            .send(true)
            .context("failed to broadcast shutdown")?;
        self.drain().await;
        Ok(())
    }

    async fn drain(&mut self) {
        tracing::info!(tasks = self.tasks.len(), "draining runtime components");
        let (names, handles): (Vec<_>, Vec<_>) = self.tasks.drain(..).unzip();
        match tokio::time::timeout(DRAIN_TIMEOUT, join_all(handles)).await {
            Ok(results) => {
                for (name, result) in names.into_iter().zip(results) {
                    if let Err(err) = result {
                        tracing::warn!(task = name, "task ended abnormally: {err:?}");
                    }
                }
            }
            Err(_) => tracing::warn!("runtime components did not stop within {DRAIN_TIMEOUT:?}"),
        }
    }
}

/// Periodically advance semaphore timers and expire green waves.
async fn sweep_loop<C: Clock>(
    controller: Arc<Controller<C>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = controller.clock().sleep(interval) => {
                controller.sweep().await;
            }
        }
    }
}
