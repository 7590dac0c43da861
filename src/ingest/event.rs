//! Inbound telemetry payloads and their typed form.
//!
//! Producers publish one JSON object per line, optionally prefixed by the
//! relay topic (`"camara {...}"`). Field names are fixed by the upstream
//! sensors and are not renamed here.

use crate::config::SensorKind;
use crate::grid::{Grid, GridError, IntersectionId};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Speed below which GPS units report `ALTA`.
pub const ALTA_MAX_SPEED: f64 = 10.0;
/// Speed above which GPS units report `BAJA`.
pub const BAJA_MIN_SPEED: f64 = 40.0;

/// GPS-derived congestion indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CongestionLevel {
    Alta,
    Normal,
    Baja,
}

impl CongestionLevel {
    /// Upstream derivation rule; 10 and 40 both fall in `NORMAL`.
    pub fn from_speed(speed: f64) -> Self {
        if speed < ALTA_MAX_SPEED {
            CongestionLevel::Alta
        } else if speed > BAJA_MIN_SPEED {
            CongestionLevel::Baja
        } else {
            CongestionLevel::Normal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedEvent {
    #[error("line is not valid UTF-8: {0}")]
    InvalidEncoding(String),
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("cannot determine sensor kind (tipo_sensor={0:?})")]
    UnknownKind(Option<String>),
    #[error("payload does not match {kind} schema: {reason}")]
    Schema { kind: &'static str, reason: String },
    #[error("field {field} has invalid value: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("missing intersection for sensor {0}")]
    MissingIntersection(String),
}

/// Why an inbound event was dropped without touching any snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventError {
    #[error(transparent)]
    Malformed(#[from] MalformedEvent),
    #[error("unknown intersection {0}")]
    UnknownIntersection(String),
}

impl From<GridError> for EventError {
    fn from(err: GridError) -> Self {
        match err {
            GridError::UnknownIntersection(name) => EventError::UnknownIntersection(name),
            other => EventError::UnknownIntersection(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueReading {
    pub queue_length: u32,
    pub avg_speed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleCountReading {
    pub count: u32,
    pub interval_start: DateTime<Utc>,
    pub interval_end: DateTime<Utc>,
}

impl VehicleCountReading {
    pub fn interval_secs(&self) -> i64 {
        (self.interval_end - self.interval_start).num_seconds()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityReading {
    pub avg_speed: f64,
    pub congestion_level: CongestionLevel,
}

/// Kind-specific measurement carried by a reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Measurement {
    Queue(QueueReading),
    VehicleCount(VehicleCountReading),
    Density(DensityReading),
}

impl Measurement {
    pub fn sensor_kind(&self) -> SensorKind {
        match self {
            Measurement::Queue(_) => SensorKind::Camera,
            Measurement::VehicleCount(_) => SensorKind::InductiveLoop,
            Measurement::Density(_) => SensorKind::Gps,
        }
    }
}

/// Typed telemetry reading for one intersection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub intersection: IntersectionId,
    pub sensor_id: String,
    pub observed_at: DateTime<Utc>,
    pub measurement: Measurement,
}

#[derive(Debug, Deserialize)]
struct CameraPayload {
    sensor_id: String,
    interseccion: String,
    volumen: i64,
    velocidad_promedio: f64,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct InductivePayload {
    sensor_id: String,
    interseccion: String,
    vehiculos_contados: i64,
    #[serde(default)]
    intervalo_segundos: Option<i64>,
    timestamp_inicio: String,
    #[serde(default)]
    timestamp_fin: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GpsPayload {
    sensor_id: String,
    #[serde(default)]
    interseccion: Option<String>,
    #[serde(default)]
    nivel_congestion: Option<CongestionLevel>,
    velocidad_promedio: f64,
    timestamp: String,
}

/// Parse one relay line (`"<topic> <json>"` or a bare JSON object).
pub fn parse_line(line: &str, grid: &Grid) -> Result<SensorReading, EventError> {
    let trimmed = line.trim();
    let (topic, body) = if trimmed.starts_with('{') {
        (None, trimmed)
    } else {
        match trimmed.split_once(' ') {
            Some((topic, body)) => (Some(topic), body.trim()),
            None => return Err(MalformedEvent::InvalidJson("empty payload".into()).into()),
        }
    };
    let value: Value =
        serde_json::from_str(body).map_err(|e| MalformedEvent::InvalidJson(e.to_string()))?;
    parse_value(value, topic, grid)
}

/// Parse an already-decoded payload. `topic` is consulted only when `tipo_sensor` is absent.
pub fn parse_value(
    value: Value,
    topic: Option<&str>,
    grid: &Grid,
) -> Result<SensorReading, EventError> {
    let object = value.as_object().ok_or(MalformedEvent::NotAnObject)?;
    let tipo = object
        .get("tipo_sensor")
        .and_then(Value::as_str)
        .map(str::to_string);
    let kind = match tipo.as_deref() {
        Some(label) => kind_from_label(label),
        None => topic.and_then(kind_from_label).or_else(|| {
            object
                .get("sensor_id")
                .and_then(Value::as_str)
                .and_then(|id| grid.sensor_kind(id))
        }),
    }
    .ok_or_else(|| MalformedEvent::UnknownKind(tipo.clone()))?;

    match kind {
        SensorKind::Camera => {
            let p: CameraPayload = decode(value, "camara")?;
            let intersection = grid.resolve(&p.interseccion)?;
            let queue_length = non_negative("volumen", p.volumen)?;
            let avg_speed = speed("velocidad_promedio", p.velocidad_promedio)?;
            Ok(SensorReading {
                intersection,
                sensor_id: p.sensor_id,
                observed_at: timestamp("timestamp", &p.timestamp)?,
                measurement: Measurement::Queue(QueueReading {
                    queue_length,
                    avg_speed,
                }),
            })
        }
        SensorKind::InductiveLoop => {
            let p: InductivePayload = decode(value, "espira_inductiva")?;
            let intersection = grid.resolve(&p.interseccion)?;
            let count = non_negative("vehiculos_contados", p.vehiculos_contados)?;
            let interval_start = timestamp("timestamp_inicio", &p.timestamp_inicio)?;
            let interval_end = match p.timestamp_fin.as_deref().filter(|s| !s.is_empty()) {
                Some(raw) => timestamp("timestamp_fin", raw)?,
                None => {
                    let secs = p.intervalo_segundos.ok_or(MalformedEvent::InvalidValue {
                        field: "timestamp_fin",
                        reason: "missing and no intervalo_segundos to derive it".into(),
                    })?;
                    interval_start + ChronoDuration::seconds(secs)
                }
            };
            if interval_end < interval_start {
                return Err(MalformedEvent::InvalidValue {
                    field: "timestamp_fin",
                    reason: "interval ends before it starts".into(),
                }
                .into());
            }
            Ok(SensorReading {
                intersection,
                sensor_id: p.sensor_id,
                observed_at: interval_end,
                measurement: Measurement::VehicleCount(VehicleCountReading {
                    count,
                    interval_start,
                    interval_end,
                }),
            })
        }
        SensorKind::Gps => {
            let p: GpsPayload = decode(value, "gps")?;
            let intersection = match p.interseccion.as_deref() {
                Some(name) => grid.resolve(name)?,
                None => grid
                    .sensor_intersection(&p.sensor_id)
                    .cloned()
                    .ok_or_else(|| MalformedEvent::MissingIntersection(p.sensor_id.clone()))?,
            };
            let avg_speed = speed("velocidad_promedio", p.velocidad_promedio)?;
            let congestion_level = p
                .nivel_congestion
                .unwrap_or_else(|| CongestionLevel::from_speed(avg_speed));
            Ok(SensorReading {
                intersection,
                sensor_id: p.sensor_id,
                observed_at: timestamp("timestamp", &p.timestamp)?,
                measurement: Measurement::Density(DensityReading {
                    avg_speed,
                    congestion_level,
                }),
            })
        }
    }
}

fn kind_from_label(label: &str) -> Option<SensorKind> {
    match label {
        "camara" => Some(SensorKind::Camera),
        "espira" | "espira_inductiva" => Some(SensorKind::InductiveLoop),
        "gps" => Some(SensorKind::Gps),
        _ => None,
    }
}

fn decode<T: DeserializeOwned>(value: Value, kind: &'static str) -> Result<T, MalformedEvent> {
    serde_json::from_value(value).map_err(|e| MalformedEvent::Schema {
        kind,
        reason: e.to_string(),
    })
}

fn non_negative(field: &'static str, value: i64) -> Result<u32, MalformedEvent> {
    u32::try_from(value).map_err(|_| MalformedEvent::InvalidValue {
        field,
        reason: format!("{value} is not a non-negative count"),
    })
}

fn speed(field: &'static str, value: f64) -> Result<f64, MalformedEvent> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(MalformedEvent::InvalidValue {
            field,
            reason: format!("{value} is not a valid speed"),
        })
    }
}

fn timestamp(field: &'static str, raw: &str) -> Result<DateTime<Utc>, MalformedEvent> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| MalformedEvent::InvalidValue {
            field,
            reason: format!("{raw:?}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn grid() -> Grid {
        Grid::from_config(&Config::default())
    }

    #[test]
    fn congestion_level_boundaries() {
        assert_eq!(CongestionLevel::from_speed(9.0), CongestionLevel::Alta);
        assert_eq!(CongestionLevel::from_speed(10.0), CongestionLevel::Normal);
        assert_eq!(CongestionLevel::from_speed(39.0), CongestionLevel::Normal);
        assert_eq!(CongestionLevel::from_speed(40.0), CongestionLevel::Normal);
        assert_eq!(CongestionLevel::from_speed(41.0), CongestionLevel::Baja);
    }

    #[test]
    fn camera_line_with_topic_prefix() {
        let line = r#"camara {"sensor_id":"CAM-A1","tipo_sensor":"camara","interseccion":"INT-A1","volumen":12,"velocidad_promedio":18,"timestamp":"2025-02-01T10:00:00Z"}"#;
        let reading = parse_line(line, &grid()).unwrap();
        assert_eq!(reading.intersection.as_str(), "INT-A1");
        assert_eq!(
            reading.measurement,
            Measurement::Queue(QueueReading {
                queue_length: 12,
                avg_speed: 18.0
            })
        );
    }

    #[test]
    fn inductive_reading_uses_interval_end_as_observation_time() {
        let line = r#"{"sensor_id":"ESP-B2","tipo_sensor":"espira_inductiva","interseccion":"INT-B2","vehiculos_contados":17,"intervalo_segundos":30,"timestamp_inicio":"2025-02-01T10:00:00Z","timestamp_fin":"2025-02-01T10:00:30Z"}"#;
        let reading = parse_line(line, &grid()).unwrap();
        match &reading.measurement {
            Measurement::VehicleCount(vc) => {
                assert_eq!(vc.count, 17);
                assert_eq!(vc.interval_secs(), 30);
                assert_eq!(reading.observed_at, vc.interval_end);
            }
            other => panic!("unexpected measurement {other:?}"),
        }
    }

    #[test]
    fn gps_without_intersection_resolves_through_sensor_map() {
        let line = r#"gps {"sensor_id":"GPS-C4","nivel_congestion":"ALTA","velocidad_promedio":7.5,"timestamp":"2025-02-01T10:00:00Z"}"#;
        let reading = parse_line(line, &grid()).unwrap();
        assert_eq!(reading.intersection.as_str(), "INT-C4");
        assert_eq!(
            reading.measurement,
            Measurement::Density(DensityReading {
                avg_speed: 7.5,
                congestion_level: CongestionLevel::Alta
            })
        );
    }

    #[test]
    fn upstream_congestion_level_is_trusted() {
        let line = r#"{"sensor_id":"GPS-A1","tipo_sensor":"gps","interseccion":"INT-A1","nivel_congestion":"BAJA","velocidad_promedio":5,"timestamp":"2025-02-01T10:00:00Z"}"#;
        let reading = parse_line(line, &grid()).unwrap();
        match reading.measurement {
            Measurement::Density(d) => assert_eq!(d.congestion_level, CongestionLevel::Baja),
            other => panic!("unexpected measurement {other:?}"),
        }
    }

    #[test]
    fn malformed_payloads_are_classified() {
        let grid = grid();
        assert!(matches!(
            parse_line("camara {not json", &grid),
            Err(EventError::Malformed(MalformedEvent::InvalidJson(_)))
        ));
        assert!(matches!(
            parse_line(
                r#"{"sensor_id":"CAM-A1","tipo_sensor":"camara","interseccion":"INT-A1","timestamp":"2025-02-01T10:00:00Z"}"#,
                &grid
            ),
            Err(EventError::Malformed(MalformedEvent::Schema { .. }))
        ));
        assert!(matches!(
            parse_line(
                r#"{"sensor_id":"X","tipo_sensor":"radar","interseccion":"INT-A1"}"#,
                &grid
            ),
            Err(EventError::Malformed(MalformedEvent::UnknownKind(_)))
        ));
        assert!(matches!(
            parse_line(
                r#"{"sensor_id":"CAM-A1","tipo_sensor":"camara","interseccion":"INT-A1","volumen":-1,"velocidad_promedio":10,"timestamp":"2025-02-01T10:00:00Z"}"#,
                &grid
            ),
            Err(EventError::Malformed(MalformedEvent::InvalidValue { field: "volumen", .. }))
        ));
        assert!(matches!(
            parse_line(
                r#"{"sensor_id":"CAM-A1","tipo_sensor":"camara","interseccion":"INT-A1","volumen":1,"velocidad_promedio":10,"timestamp":"yesterday"}"#,
                &grid
            ),
            Err(EventError::Malformed(MalformedEvent::InvalidValue { field: "timestamp", .. }))
        ));
    }

    #[test]
    fn unknown_intersection_is_not_malformed() {
        let line = r#"{"sensor_id":"CAM-Z9","tipo_sensor":"camara","interseccion":"INT-Z9","volumen":1,"velocidad_promedio":40,"timestamp":"2025-02-01T10:00:00Z"}"#;
        assert_eq!(
            parse_line(line, &grid()),
            Err(EventError::UnknownIntersection("INT-Z9".into()))
        );
    }
}
