//! Client side of the remote store protocol.
//!
//! One JSON request per line, answered by one JSON response per line. The
//! client keeps a single connection and drops it on any error; the next call
//! reconnects.

use crate::net::framing::{read_json, write_json, FrameError};
use crate::storage::records::WriteRecord;
use crate::storage::store::{StoreError, StoreFuture, StoreQuery, StoreReply, TrafficStore};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreRequest {
    Insert { record: WriteRecord },
    Query { query: StoreQuery },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StoreResponse {
    Ok {
        #[serde(default)]
        reply: Option<StoreReply>,
    },
    Error {
        message: String,
    },
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

pub struct RemoteStore {
    name: String,
    addr: String,
    timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl RemoteStore {
    pub fn new(name: impl Into<String>, addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            timeout,
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn call(&self, request: StoreRequest) -> Result<Option<StoreReply>, StoreError> {
        let mut guard = self.conn.lock().await;
        let result = tokio::time::timeout(self.timeout, self.exchange(&mut guard, &request)).await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(_) => Err(StoreError::Timeout),
        };
        if outcome.is_err() {
            *guard = None;
        }
        match outcome? {
            StoreResponse::Ok { reply } => Ok(reply),
            StoreResponse::Error { message } => Err(StoreError::Backend(message)),
        }
    }

    async fn exchange(
        &self,
        slot: &mut Option<Connection>,
        request: &StoreRequest,
    ) -> Result<StoreResponse, StoreError> {
        if slot.is_none() {
            let stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|e| StoreError::Unavailable(format!("{}: {e}", self.addr)))?;
            let _ = stream.set_nodelay(true);
            let (read, write) = stream.into_split();
            *slot = Some(Connection {
                reader: BufReader::new(read),
                writer: write,
            });
        }
        let conn = slot
            .as_mut()
            .ok_or_else(|| StoreError::Unavailable(self.addr.clone()))?;
        write_json(&mut conn.writer, request).await.map_err(frame_error)?;
        read_json(&mut conn.reader)
            .await
            .map_err(frame_error)?
            .ok_or_else(|| StoreError::Unavailable(format!("{} closed the connection", self.addr)))
    }
}

fn frame_error(err: FrameError) -> StoreError {
    match err {
        FrameError::Io(e) => StoreError::Unavailable(e.to_string()),
        other => StoreError::Protocol(other.to_string()),
    }
}

impl TrafficStore for RemoteStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn insert<'a>(&'a self, record: &'a WriteRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.call(StoreRequest::Insert {
                record: record.clone(),
            })
            .await
            .map(|_| ())
        })
    }

    fn query<'a>(&'a self, query: StoreQuery) -> StoreFuture<'a, StoreReply> {
        Box::pin(async move {
            self.call(StoreRequest::Query { query })
                .await?
                .ok_or_else(|| StoreError::Protocol("query answered without a reply".into()))
        })
    }
}
