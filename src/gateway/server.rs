//! Line-JSON gateway listener.
//!
//! Connections only frame requests; a single worker serves them one at a time,
//! so a request is fully handled before the next one starts.

use crate::core::time::Clock;
use crate::gateway::api::{GatewayRequest, GatewayResponse};
use crate::gateway::service::GatewayService;
use crate::net::framing::{read_json, read_line, write_json, FrameError};
use crate::net::listener::{accept_loop, bind};
use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const WORK_QUEUE_DEPTH: usize = 64;

struct Job {
    line: String,
    reply: oneshot::Sender<GatewayResponse>,
}

/// Bind the gateway and serve until `shutdown` flips to true.
pub async fn serve_gateway<C: Clock>(
    addr: &str,
    service: Arc<GatewayService<C>>,
    shutdown: watch::Receiver<bool>,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let (listener, local) = bind(addr, "gateway").await?;
    tracing::info!(addr = %local, "gateway listening");
    let (tx, rx) = mpsc::channel(WORK_QUEUE_DEPTH);
    tokio::spawn(worker(service, rx));
    let handle = tokio::spawn(accept_loop(listener, shutdown, move |socket, peer| {
        let jobs = tx.clone();
        async move {
            if let Err(err) = handle_conn(socket, jobs).await {
                tracing::debug!(%peer, "gateway connection closed: {err}");
            }
        }
    }));
    Ok((local, handle))
}

async fn worker<C: Clock>(service: Arc<GatewayService<C>>, mut jobs: mpsc::Receiver<Job>) {
    while let Some(job) = jobs.recv().await {
        let response = service.handle_line(&job.line).await;
        let _ = job.reply.send(response);
    }
}

async fn handle_conn(socket: TcpStream, jobs: mpsc::Sender<Job>) -> Result<(), FrameError> {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);
    while let Some(line) = read_line(&mut reader).await? {
        if line.trim().is_empty() {
            continue;
        }
        let (reply, response) = oneshot::channel();
        if jobs.send(Job { line, reply }).await.is_err() {
            return Ok(());
        }
        match response.await {
            Ok(response) => write_json(&mut write, &response).await?,
            Err(_) => return Ok(()),
        }
    }
    Ok(())
}

/// Send one request and return the raw JSON response.
pub async fn request(addr: &str, request: &GatewayRequest, timeout: Duration) -> Result<serde_json::Value> {
    let exchange = async {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to gateway at {addr}"))?;
        let (read, mut write) = stream.into_split();
        write_json(&mut write, request).await?;
        read_json(&mut BufReader::new(read))
            .await?
            .ok_or_else(|| anyhow!("gateway closed the connection without answering"))
    };
    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| anyhow!("gateway request timed out after {timeout:?}"))?
}
