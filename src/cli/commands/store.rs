//! Store command - hosts the primary store and answers heartbeat probes.

use crate::cli::args::StoreArgs;
use crate::config::Config;
use crate::runtime::open_store;
use crate::storage::server::{serve_heartbeat, serve_store};
use crate::telemetry;
use anyhow::{Context, Result};
use std::env;
use tokio::sync::watch;

pub async fn run_store(args: StoreArgs) -> Result<()> {
    env::set_var("CROSSWAY_CONFIG", args.config.display().to_string());

    let config = Config::load_from_env()?;
    telemetry::init_tracing(config.telemetry.log_level.as_deref())?;
    let server = &config.store_server;
    let store = open_store("primary", server.backend, &server.path)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (store_addr, store_task) = serve_store(&server.bind, store, shutdown_rx.clone()).await?;
    let (heartbeat_addr, heartbeat_task) =
        serve_heartbeat(&server.heartbeat_bind, shutdown_rx).await?;
    tracing::info!(store = %store_addr, heartbeat = %heartbeat_addr, "primary store host started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::warn!("shutdown signal received");
    shutdown_tx
        .send(true)
        .context("failed to broadcast shutdown")?;
    for (name, task) in [("store", store_task), ("heartbeat", heartbeat_task)] {
        if let Err(err) = task.await {
            tracing::warn!(task = name, "listener ended abnormally: {err:?}");
        }
    }
    Ok(())
}
