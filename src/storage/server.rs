//! Host side of the remote store: a request loop over a [`TrafficStore`] and
//! the `PING`/`PONG` heartbeat responder probed by the heartbeat monitor.

use crate::net::framing::{read_json, read_line, write_json, FrameError};
use crate::net::listener::{accept_loop, bind};
use crate::storage::remote::{StoreRequest, StoreResponse};
use crate::storage::store::TrafficStore;
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const PING: &str = "PING";
pub const PONG: &str = "PONG";

/// Bind the store listener and serve until `shutdown` flips to true.
pub async fn serve_store(
    addr: &str,
    store: Arc<dyn TrafficStore>,
    shutdown: watch::Receiver<bool>,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let (listener, addr) = bind(addr, "store listener").await?;
    tracing::info!(%addr, store = store.name(), "store listener ready");
    let handle = tokio::spawn(accept_loop(listener, shutdown, move |socket, peer| {
        let store = store.clone();
        async move {
            if let Err(err) = handle_store_conn(socket, store).await {
                tracing::debug!(%peer, "store connection closed: {err}");
            }
        }
    }));
    Ok((addr, handle))
}

/// Bind the heartbeat responder: every `PING` line is answered with `PONG`.
pub async fn serve_heartbeat(
    addr: &str,
    shutdown: watch::Receiver<bool>,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let (listener, addr) = bind(addr, "heartbeat responder").await?;
    tracing::info!(%addr, "heartbeat responder ready");
    let handle = tokio::spawn(accept_loop(listener, shutdown, |socket, peer| async move {
        if let Err(err) = handle_heartbeat_conn(socket).await {
            tracing::debug!(%peer, "heartbeat connection closed: {err}");
        }
    }));
    Ok((addr, handle))
}

async fn handle_store_conn(socket: TcpStream, store: Arc<dyn TrafficStore>) -> Result<(), FrameError> {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);
    loop {
        let request: StoreRequest = match read_json(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(FrameError::Decode(message)) => {
                write_json(&mut write, &StoreResponse::Error { message }).await?;
                continue;
            }
            Err(err) => return Err(err),
        };
        let response = match request {
            StoreRequest::Insert { record } => match store.insert(&record).await {
                Ok(()) => StoreResponse::Ok { reply: None },
                Err(err) => StoreResponse::Error {
                    message: err.to_string(),
                },
            },
            StoreRequest::Query { query } => match store.query(query).await {
                Ok(reply) => StoreResponse::Ok { reply: Some(reply) },
                Err(err) => StoreResponse::Error {
                    message: err.to_string(),
                },
            },
        };
        write_json(&mut write, &response).await?;
    }
}

async fn handle_heartbeat_conn(socket: TcpStream) -> Result<(), FrameError> {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);
    while let Some(line) = read_line(&mut reader).await? {
        if line.trim() == PING {
            write.write_all(format!("{PONG}\n").as_bytes()).await?;
            write.flush().await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::control::decision::{DecisionKind, TrafficStateKind};
    use crate::grid::Grid;
    use crate::storage::memory::MemoryStore;
    use crate::storage::records::{DecisionRecord, WriteRecord};
    use crate::storage::remote::RemoteStore;
    use chrono::Utc;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn remote_store_talks_to_served_store() {
        let (_tx, rx) = watch::channel(false);
        let backing = MemoryStore::new("primary");
        let (addr, _task) = serve_store("127.0.0.1:0", Arc::new(backing.clone()), rx)
            .await
            .unwrap();
        let remote = RemoteStore::new("primary", addr.to_string(), Duration::from_secs(2));
        let grid = Grid::from_config(&Config::default());
        let record = WriteRecord::Decision(DecisionRecord {
            intersection: grid.resolve("INT-C1").unwrap(),
            previous_state: TrafficStateKind::Normal,
            traffic_state: TrafficStateKind::Congestion,
            decision: DecisionKind::ExtendGreen,
            details: "congestion detected".into(),
            metrics: serde_json::Value::Null,
            recorded_at: Utc::now(),
        });
        remote.insert(&record).await.unwrap();
        remote.insert(&record).await.unwrap();
        assert_eq!(backing.len(), 2);
        assert_eq!(remote.summary().await.unwrap().congestion_detections, 2);

        backing.set_available(false);
        let err = remote.insert(&record).await.unwrap_err();
        assert!(err.to_string().contains("offline"));
    }

    #[tokio::test]
    async fn heartbeat_answers_ping_with_pong() {
        let (tx, rx) = watch::channel(false);
        let (addr, task) = serve_heartbeat("127.0.0.1:0", rx).await.unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        write.write_all(b"PING\n").await.unwrap();
        let mut lines = BufReader::new(read).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some(PONG));
        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
