use crate::grid::Grid;
use crate::ingest::event::{parse_line, CongestionLevel, EventError, Measurement, SensorReading};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// A metric value together with when and by whom it was observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observed<T> {
    pub value: T,
    pub observed_at: DateTime<Utc>,
    pub sensor_id: String,
}

impl<T> Observed<T> {
    fn new(value: T, reading: &SensorReading) -> Self {
        Self {
            value,
            observed_at: reading.observed_at,
            sensor_id: reading.sensor_id.clone(),
        }
    }
}

/// Offer a newer observation; keeps the existing one if it carries a later timestamp.
fn offer<T>(slot: &mut Option<Observed<T>>, candidate: Observed<T>) -> bool {
    match slot {
        Some(current) if current.observed_at > candidate.observed_at => false,
        _ => {
            *slot = Some(candidate);
            true
        }
    }
}

/// Throughput derived from inductive loops. Recorded for history, never fed to the rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleFlow {
    pub last_count: u32,
    pub interval_secs: i64,
    pub vehicles_per_minute: f64,
    pub total_vehicles: u64,
    pub observed_at: DateTime<Utc>,
}

/// Latest known metrics for one intersection. `None` means unknown, never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntersectionSnapshot {
    pub queue_length: Option<Observed<u32>>,
    pub avg_speed: Option<Observed<f64>>,
    pub congestion_level: Option<Observed<CongestionLevel>>,
    pub vehicle_flow: Option<VehicleFlow>,
}

impl IntersectionSnapshot {
    pub fn queue_length(&self) -> Option<u32> {
        self.queue_length.as_ref().map(|o| o.value)
    }

    pub fn avg_speed(&self) -> Option<f64> {
        self.avg_speed.as_ref().map(|o| o.value)
    }

    pub fn congestion_level(&self) -> Option<CongestionLevel> {
        self.congestion_level.as_ref().map(|o| o.value)
    }

    /// Compact metric view stored alongside decision records.
    pub fn metrics(&self) -> Value {
        json!({
            "queue_length": self.queue_length(),
            "avg_speed": self.avg_speed(),
            "congestion_level": self.congestion_level(),
            "vehicles_per_minute": self.vehicle_flow.as_ref().map(|f| f.vehicles_per_minute),
        })
    }
}

/// Which snapshot fields a reading replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotUpdate {
    pub queue_length: bool,
    pub avg_speed: bool,
    pub congestion_level: bool,
    pub vehicle_flow: bool,
}

impl SnapshotUpdate {
    pub fn any(&self) -> bool {
        self.queue_length || self.avg_speed || self.congestion_level || self.vehicle_flow
    }
}

/// Parses relay lines and folds readings into snapshots.
#[derive(Debug, Clone)]
pub struct Normalizer {
    grid: Arc<Grid>,
}

impl Normalizer {
    pub fn new(grid: Arc<Grid>) -> Self {
        Self { grid }
    }

    pub fn parse(&self, line: &str) -> Result<SensorReading, EventError> {
        parse_line(line, &self.grid)
    }

    /// Fold a reading into its intersection's snapshot.
    ///
    /// Camera and GPS both feed `avg_speed`; per metric the observation with the
    /// latest timestamp wins, so a late arrival never hides a newer value.
    pub fn apply(&self, snapshot: &mut IntersectionSnapshot, reading: &SensorReading) -> SnapshotUpdate {
        let mut update = SnapshotUpdate::default();
        match &reading.measurement {
            Measurement::Queue(q) => {
                update.queue_length =
                    offer(&mut snapshot.queue_length, Observed::new(q.queue_length, reading));
                update.avg_speed = offer(&mut snapshot.avg_speed, Observed::new(q.avg_speed, reading));
            }
            Measurement::Density(d) => {
                update.avg_speed = offer(&mut snapshot.avg_speed, Observed::new(d.avg_speed, reading));
                update.congestion_level = offer(
                    &mut snapshot.congestion_level,
                    Observed::new(d.congestion_level, reading),
                );
            }
            Measurement::VehicleCount(vc) => {
                let interval_secs = vc.interval_secs();
                let per_minute = if interval_secs > 0 {
                    f64::from(vc.count) * 60.0 / interval_secs as f64
                } else {
                    0.0
                };
                let total = snapshot
                    .vehicle_flow
                    .as_ref()
                    .map(|f| f.total_vehicles)
                    .unwrap_or(0)
                    .saturating_add(u64::from(vc.count));
                match &mut snapshot.vehicle_flow {
                    Some(flow) if flow.observed_at > reading.observed_at => {
                        flow.total_vehicles = total;
                    }
                    slot => {
                        *slot = Some(VehicleFlow {
                            last_count: vc.count,
                            interval_secs,
                            vehicles_per_minute: per_minute,
                            total_vehicles: total,
                            observed_at: reading.observed_at,
                        });
                        update.vehicle_flow = true;
                    }
                }
            }
        }
        update
    }
}
