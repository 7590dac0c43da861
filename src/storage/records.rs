use crate::control::decision::{DecisionKind, TrafficStateKind};
use crate::control::semaphore::SemaphoreTransition;
use crate::grid::IntersectionId;
use crate::ingest::event::SensorReading;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Row of the congestion-history table: one traffic decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub intersection: IntersectionId,
    pub previous_state: TrafficStateKind,
    pub traffic_state: TrafficStateKind,
    pub decision: DecisionKind,
    pub details: String,
    /// Metric snapshot the decision was taken on.
    pub metrics: Value,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorityActionType {
    GreenWave,
    ForceChange,
}

impl PriorityActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            PriorityActionType::GreenWave => "GREEN_WAVE",
            PriorityActionType::ForceChange => "FORCE_CHANGE",
        }
    }
}

/// Row of the priority-actions table: an operator override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityActionRecord {
    pub action_type: PriorityActionType,
    pub target: String,
    pub reason: String,
    pub requested_by: String,
    pub affected_intersections: Vec<IntersectionId>,
    pub requested_at: DateTime<Utc>,
}

/// Anything the coordinator persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum WriteRecord {
    SensorEvent(SensorReading),
    SemaphoreChange(SemaphoreTransition),
    Decision(DecisionRecord),
    PriorityAction(PriorityActionRecord),
}

impl WriteRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            WriteRecord::SensorEvent(_) => "sensor_event",
            WriteRecord::SemaphoreChange(_) => "semaphore_change",
            WriteRecord::Decision(_) => "decision",
            WriteRecord::PriorityAction(_) => "priority_action",
        }
    }

    /// Intersection the record belongs to; `None` for multi-intersection overrides.
    pub fn intersection(&self) -> Option<&IntersectionId> {
        match self {
            WriteRecord::SensorEvent(r) => Some(&r.intersection),
            WriteRecord::SemaphoreChange(t) => Some(&t.intersection),
            WriteRecord::Decision(d) => Some(&d.intersection),
            WriteRecord::PriorityAction(_) => None,
        }
    }
}

/// Aggregate totals kept by a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub sensor_events: u64,
    pub congestion_detections: u64,
    pub green_waves: u64,
    pub semaphore_changes: u64,
}

impl StoreSummary {
    /// Fold one record into the totals.
    pub fn count(&mut self, record: &WriteRecord) {
        match record {
            WriteRecord::SensorEvent(_) => self.sensor_events += 1,
            WriteRecord::SemaphoreChange(_) => self.semaphore_changes += 1,
            WriteRecord::Decision(d) if d.traffic_state == TrafficStateKind::Congestion => {
                self.congestion_detections += 1
            }
            WriteRecord::Decision(_) => {}
            WriteRecord::PriorityAction(a) if a.action_type == PriorityActionType::GreenWave => {
                self.green_waves += 1
            }
            WriteRecord::PriorityAction(_) => {}
        }
    }
}
