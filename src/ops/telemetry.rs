use crate::control::controller::Controller;
use crate::net::listener::{accept_loop, bind};
use crate::replication::failover::FailoverState;
use crate::core::time::Clock;
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::reload;

pub type LogHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

/// Initialize JSON logging with reloadable level.
pub fn init_tracing(log_level: Option<&str>) -> Result<LogHandle> {
    let level = log_level.unwrap_or("info");
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(filter);
    let fmt_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to init tracing: {e}"))?;
    Ok(handle)
}

/// Start a minimal HTTP endpoint serving metrics, health, and loglevel controls.
pub async fn start_http<C: Clock>(
    addr: &str,
    controller: Arc<Controller<C>>,
    log_handle: Option<LogHandle>,
    shutdown: watch::Receiver<bool>,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let (listener, local) = bind(addr, "telemetry endpoint").await?;
    tracing::info!("telemetry endpoint listening on {}", local);
    let handle = tokio::spawn(accept_loop(listener, shutdown, move |mut socket, _peer| {
        let controller = controller.clone();
        let log_handle = log_handle.clone();
        async move {
            if let Err(err) = handle_conn(&mut socket, controller, log_handle).await {
                tracing::warn!("telemetry handler error: {err:?}");
            }
        }
    }));
    Ok((local, handle))
}

async fn handle_conn<C: Clock>(
    socket: &mut tokio::net::TcpStream,
    controller: Arc<Controller<C>>,
    log_handle: Option<LogHandle>,
) -> Result<()> {
    let mut buf = [0u8; 4096];
    let n = socket.read(&mut buf).await?;
    let req = String::from_utf8_lossy(&buf[..n]);
    let first = req.lines().next().unwrap_or("");
    let target = first.split_whitespace().nth(1).unwrap_or("/");
    let (route, query) = target.split_once('?').unwrap_or((target, ""));
    let (status, body, content_type) = match route {
        "/metrics" => (200, collect_metrics(&controller), "text/plain"),
        "/readyz" => readyz(&controller),
        "/livez" => livez(&controller),
        "/v1/loglevel" => {
            let mut status = "ok";
            match (log_handle, query.strip_prefix("level=")) {
                (Some(handle), Some(level)) => match EnvFilter::try_new(level) {
                    Ok(filter) => {
                        if handle.modify(|f| *f = filter).is_err() {
                            status = "reload failed";
                        }
                    }
                    Err(_) => status = "invalid level",
                },
                (None, _) => status = "logging not reloadable",
                (_, None) => status = "missing level",
            }
            (200, format!("{{\"status\":\"{status}\"}}"), "application/json")
        }
        _ => (404, "not found".to_string(), "text/plain"),
    };
    let resp = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason(status),
        content_type,
        body.len(),
        body
    );
    socket.write_all(resp.as_bytes()).await?;
    Ok(())
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        _ => "Service Unavailable",
    }
}

fn collect_metrics<C: Clock>(controller: &Controller<C>) -> String {
    let failover = controller.coordinator().failover().status();
    let states = controller.state_counts();
    let mut body = controller.metrics().snapshot().render();
    body.push_str(&format!(
        "crossway_primary_healthy {}\ncrossway_primary_consecutive_failures {}\ncrossway_intersections{{state=\"NORMAL\"}} {}\ncrossway_intersections{{state=\"CONGESTION\"}} {}\ncrossway_intersections{{state=\"GREEN_WAVE\"}} {}\ncrossway_audit_events {}\n",
        u8::from(failover.state == FailoverState::Healthy),
        failover.consecutive_failures,
        states.normal,
        states.congestion,
        states.green_wave,
        controller.audit().len(),
    ));
    body
}

/// Ready while the primary is reachable; a failed-over process still serves but reports degraded.
pub fn readyz<C: Clock>(controller: &Controller<C>) -> (u16, String, &'static str) {
    let failover = controller.coordinator().failover().status();
    let ready = failover.state == FailoverState::Healthy;
    let code = if ready { 200 } else { 503 };
    let body = format!(
        "{{\"ready\":{},\"failover\":\"{}\",\"consecutive_failures\":{},\"authoritative_store\":\"{}\"}}",
        ready,
        if ready { "HEALTHY" } else { "FAILED" },
        failover.consecutive_failures,
        controller.coordinator().authoritative().name()
    );
    (code, body, "application/json")
}

pub fn livez<C: Clock>(controller: &Controller<C>) -> (u16, String, &'static str) {
    let body = format!(
        "{{\"live\":true,\"intersections\":{}}}",
        controller.grid().len()
    );
    (200, body, "application/json")
}
