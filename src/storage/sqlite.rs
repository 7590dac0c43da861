//! SQLite-backed store.
//!
//! Four tables mirror the traffic history layout: `sensor_events`,
//! `semaphore_states`, `congestion_history` and `priority_actions`. Each row
//! keeps queryable columns plus the full record as JSON in `payload`, which is
//! what reads decode. Blocking SQLite calls run on `spawn_blocking`.

use crate::storage::records::{StoreSummary, WriteRecord};
use crate::storage::store::{StoreError, StoreFuture, StoreQuery, StoreReply, TrafficStore};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS sensor_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sensor_id TEXT NOT NULL,
    tipo_sensor TEXT NOT NULL,
    interseccion TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sensor_events_intersection ON sensor_events(interseccion);

CREATE TABLE IF NOT EXISTS semaphore_states (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    interseccion TEXT NOT NULL,
    old_color TEXT NOT NULL,
    new_color TEXT NOT NULL,
    reason TEXT NOT NULL DEFAULT '',
    timer_until TEXT,
    timestamp TEXT NOT NULL,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_semaphore_states_intersection ON semaphore_states(interseccion);

CREATE TABLE IF NOT EXISTS congestion_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    interseccion TEXT NOT NULL,
    traffic_state TEXT NOT NULL,
    decision TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '',
    timestamp TEXT NOT NULL,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_congestion_history_intersection ON congestion_history(interseccion);
CREATE INDEX IF NOT EXISTS idx_congestion_history_timestamp ON congestion_history(timestamp);

CREATE TABLE IF NOT EXISTS priority_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action_type TEXT NOT NULL,
    target TEXT NOT NULL,
    reason TEXT NOT NULL DEFAULT '',
    requested_by TEXT NOT NULL DEFAULT 'system',
    affected_intersections TEXT NOT NULL DEFAULT '[]',
    timestamp TEXT NOT NULL,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_priority_actions_timestamp ON priority_actions(timestamp);
";

#[derive(Clone)]
pub struct SqliteStore {
    name: String,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema.
    pub fn open(name: impl Into<String>, path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(backend)?;
        Self::with_connection(name, conn)
    }

    pub fn open_in_memory(name: impl Into<String>) -> Result<Self, StoreError> {
        Self::with_connection(name, Connection::open_in_memory().map_err(backend)?)
    }

    fn with_connection(name: impl Into<String>, conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            name: name.into(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            op(&guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("sqlite worker failed: {e}")))?
    }
}

impl TrafficStore for SqliteStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn insert<'a>(&'a self, record: &'a WriteRecord) -> StoreFuture<'a, ()> {
        let record = record.clone();
        Box::pin(async move { self.blocking(move |conn| insert_record(conn, &record)).await })
    }

    fn query<'a>(&'a self, query: StoreQuery) -> StoreFuture<'a, StoreReply> {
        Box::pin(async move { self.blocking(move |conn| answer(conn, query)).await })
    }
}

fn insert_record(conn: &Connection, record: &WriteRecord) -> Result<(), StoreError> {
    match record {
        WriteRecord::SensorEvent(r) => conn.execute(
            "INSERT INTO sensor_events (sensor_id, tipo_sensor, interseccion, timestamp, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                r.sensor_id,
                r.measurement.sensor_kind().wire_name(),
                r.intersection.as_str(),
                ts(r.observed_at),
                encode(r)?
            ],
        ),
        WriteRecord::SemaphoreChange(t) => conn.execute(
            "INSERT INTO semaphore_states
             (interseccion, old_color, new_color, reason, timer_until, timestamp, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                t.intersection.as_str(),
                t.old_color.as_str(),
                t.new_color.as_str(),
                t.reason,
                t.timer_until.map(ts),
                ts(t.at),
                encode(t)?
            ],
        ),
        WriteRecord::Decision(d) => conn.execute(
            "INSERT INTO congestion_history
             (interseccion, traffic_state, decision, details, timestamp, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                d.intersection.as_str(),
                d.traffic_state.as_str(),
                d.decision.as_str(),
                d.details,
                ts(d.recorded_at),
                encode(d)?
            ],
        ),
        WriteRecord::PriorityAction(a) => conn.execute(
            "INSERT INTO priority_actions
             (action_type, target, reason, requested_by, affected_intersections, timestamp, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                a.action_type.as_str(),
                a.target,
                a.reason,
                a.requested_by,
                encode(&a.affected_intersections)?,
                ts(a.requested_at),
                encode(a)?
            ],
        ),
    }
    .map(|_| ())
    .map_err(backend)
}

fn answer(conn: &Connection, query: StoreQuery) -> Result<StoreReply, StoreError> {
    match query {
        StoreQuery::CongestionHistory {
            from,
            to,
            intersection,
        } => {
            let rows = match intersection {
                Some(id) => payloads(
                    conn,
                    "SELECT payload FROM congestion_history
                     WHERE timestamp >= ?1 AND timestamp <= ?2 AND interseccion = ?3
                     ORDER BY timestamp, id",
                    params![ts(from), ts(to), id.as_str()],
                )?,
                None => payloads(
                    conn,
                    "SELECT payload FROM congestion_history
                     WHERE timestamp >= ?1 AND timestamp <= ?2
                     ORDER BY timestamp, id",
                    params![ts(from), ts(to)],
                )?,
            };
            Ok(StoreReply::History(rows))
        }
        StoreQuery::RecentEvents {
            intersection,
            limit,
        } => Ok(StoreReply::Events(payloads(
            conn,
            "SELECT payload FROM sensor_events WHERE interseccion = ?1 ORDER BY id DESC LIMIT ?2",
            params![intersection.as_str(), limit_param(limit)],
        )?)),
        StoreQuery::LatestSemaphore { intersection } => {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT payload FROM semaphore_states WHERE interseccion = ?1
                     ORDER BY id DESC LIMIT 1",
                    params![intersection.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend)?;
            Ok(StoreReply::Semaphore(raw.map(|r| decode(&r)).transpose()?))
        }
        StoreQuery::PriorityActions { limit } => Ok(StoreReply::PriorityActions(payloads(
            conn,
            "SELECT payload FROM priority_actions ORDER BY id DESC LIMIT ?1",
            params![limit_param(limit)],
        )?)),
        StoreQuery::Summary => {
            let count = |sql: &str| -> Result<u64, StoreError> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| u64::try_from(n).unwrap_or(0))
                    .map_err(backend)
            };
            Ok(StoreReply::Summary(StoreSummary {
                sensor_events: count("SELECT COUNT(*) FROM sensor_events")?,
                congestion_detections: count(
                    "SELECT COUNT(*) FROM congestion_history WHERE traffic_state = 'CONGESTION'",
                )?,
                green_waves: count(
                    "SELECT COUNT(*) FROM priority_actions WHERE action_type = 'GREEN_WAVE'",
                )?,
                semaphore_changes: count("SELECT COUNT(*) FROM semaphore_states")?,
            }))
        }
    }
}

fn payloads<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<T>, StoreError> {
    let mut stmt = conn.prepare(sql).map_err(backend)?;
    let raw = stmt
        .query_map(params, |row| row.get::<_, String>(0))
        .map_err(backend)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(backend)?;
    raw.iter().map(|r| decode(r)).collect()
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Backend(format!("encode row: {e}")))
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Backend(format!("decode row: {e}")))
}

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}
