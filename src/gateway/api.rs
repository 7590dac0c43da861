use crate::control::controller::{ControlError, GreenWaveOutcome, IntersectionView, ManualChangeOutcome, StateCounts};
use crate::control::semaphore::{SemaphoreColor, SemaphoreTransition};
use crate::grid::{GridError, RouteSpec};
use crate::ingest::event::{EventError, SensorReading};
use crate::ops::metrics::MetricsSnapshot;
use crate::replication::failover::FailoverStatus;
use crate::storage::records::{DecisionRecord, PriorityActionRecord, StoreSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One gateway request per line: `{"command":"INTERSECTION_STATUS","intersection":"INT-A1"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayRequest {
    IntersectionStatus {
        intersection: String,
    },
    CongestionHistory {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        #[serde(default)]
        intersection: Option<String>,
    },
    ForceGreenWave {
        route: RouteSpec,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        requested_by: Option<String>,
    },
    ManualSemaphoreChange {
        intersection: String,
        color: SemaphoreColor,
        #[serde(default)]
        requested_by: Option<String>,
    },
    SystemSummary,
    HealthCheck,
}

impl GatewayRequest {
    pub fn name(&self) -> &'static str {
        match self {
            GatewayRequest::IntersectionStatus { .. } => "INTERSECTION_STATUS",
            GatewayRequest::CongestionHistory { .. } => "CONGESTION_HISTORY",
            GatewayRequest::ForceGreenWave { .. } => "FORCE_GREEN_WAVE",
            GatewayRequest::ManualSemaphoreChange { .. } => "MANUAL_SEMAPHORE_CHANGE",
            GatewayRequest::SystemSummary => "SYSTEM_SUMMARY",
            GatewayRequest::HealthCheck => "HEALTH_CHECK",
        }
    }
}

/// Error payload carried in a response; never a silent no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "code", content = "message", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("unknown intersection {0}")]
    UnknownIntersection(String),
    #[error("invalid override route: {0}")]
    InvalidOverrideRoute(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<ControlError> for GatewayError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::UnknownIntersection(id) => GatewayError::UnknownIntersection(id),
            ControlError::InvalidOverrideRoute(route) => GatewayError::InvalidOverrideRoute(route.to_string()),
            ControlError::Event(EventError::UnknownIntersection(id)) => GatewayError::UnknownIntersection(id),
            ControlError::Event(other) => GatewayError::MalformedRequest(other.to_string()),
        }
    }
}

impl From<GridError> for GatewayError {
    fn from(err: GridError) -> Self {
        match err {
            GridError::UnknownIntersection(id) => GatewayError::UnknownIntersection(id),
            other => GatewayError::InvalidOverrideRoute(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntersectionStatusReply {
    #[serde(flatten)]
    pub view: IntersectionView,
    /// Latest persisted sensor events, newest first.
    pub recent_events: Vec<SensorReading>,
    pub last_recorded_change: Option<SemaphoreTransition>,
    /// Store that answered the persisted part.
    pub source: Option<String>,
    pub store_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryReply {
    pub source: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub records: Vec<DecisionRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReply {
    pub failover: FailoverStatus,
    pub intersections: usize,
    pub states: StateCounts,
    pub totals: Option<StoreSummary>,
    /// Latest green waves and manual changes, newest first.
    pub recent_overrides: Vec<PriorityActionRecord>,
    pub source: Option<String>,
    pub store_error: Option<String>,
    pub counters: MetricsSnapshot,
    pub alerts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReply {
    pub live: bool,
    pub failover: FailoverStatus,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayReply {
    IntersectionStatus(IntersectionStatusReply),
    CongestionHistory(HistoryReply),
    GreenWave(GreenWaveOutcome),
    ManualChange(ManualChangeOutcome),
    Summary(SummaryReply),
    Health(HealthReply),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GatewayResponse {
    Ok { result: GatewayReply },
    Error { error: GatewayError },
}

impl GatewayResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, GatewayResponse::Ok { .. })
    }
}

impl From<Result<GatewayReply, GatewayError>> for GatewayResponse {
    fn from(result: Result<GatewayReply, GatewayError>) -> Self {
        match result {
            Ok(result) => GatewayResponse::Ok { result },
            Err(error) => GatewayResponse::Error { error },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_names() {
        let request: GatewayRequest = serde_json::from_str(
            r#"{"command":"FORCE_GREEN_WAVE","route":{"row":"B"},"reason":"ambulance"}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            GatewayRequest::ForceGreenWave {
                route: RouteSpec::Row("B".into()),
                reason: Some("ambulance".into()),
                requested_by: None,
            }
        );
        let summary: GatewayRequest = serde_json::from_str(r#"{"command":"SYSTEM_SUMMARY"}"#).unwrap();
        assert_eq!(summary.name(), "SYSTEM_SUMMARY");
    }

    #[test]
    fn error_payload_shape() {
        let response = GatewayResponse::from(Err(GatewayError::UnknownIntersection("INT-Z9".into())));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"]["code"], "UNKNOWN_INTERSECTION");
        assert_eq!(value["error"]["message"], "INT-Z9");
    }
}
