//! Per-intersection control loop.
//!
//! Each intersection owns one cell holding its snapshot, traffic state and
//! semaphore state behind a single mutex. Every operation locks at most one
//! cell at a time, collects the records it produced, releases the lock and only
//! then awaits the persistence coordinator.

use crate::core::config::Config;
use crate::core::time::{after_secs, Clock};
use crate::control::decision::{DecisionEngine, DecisionKind, TrafficState, TrafficStateKind};
use crate::control::rules::RuleSet;
use crate::control::semaphore::{
    CommandReason, SemaphoreColor, SemaphoreCommand, SemaphoreMachine, SemaphoreState,
    SemaphoreTransition,
};
use crate::grid::{Grid, GridError, IntersectionId, RouteSpec};
use crate::ingest::event::{EventError, SensorReading};
use crate::ingest::normalizer::{IntersectionSnapshot, Normalizer};
use crate::ops::audit::AuditLog;
use crate::ops::metrics::{bump, CoreMetrics};
use crate::storage::coordinator::PersistenceCoordinator;
use crate::storage::records::{DecisionRecord, PriorityActionRecord, PriorityActionType, WriteRecord};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error("rejected sensor event: {0}")]
    Event(#[from] EventError),
    #[error("unknown intersection {0}")]
    UnknownIntersection(String),
    #[error("invalid override route: {0}")]
    InvalidOverrideRoute(#[source] GridError),
}

struct IntersectionCell {
    snapshot: IntersectionSnapshot,
    traffic: TrafficState,
    semaphore: SemaphoreState,
}

/// Point-in-time view of one intersection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntersectionView {
    pub intersection: IntersectionId,
    pub traffic_state: TrafficState,
    pub semaphore: SemaphoreState,
    pub snapshot: IntersectionSnapshot,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub normal: usize,
    pub congestion: usize,
    pub green_wave: usize,
}

/// Result of folding one reading.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub traffic_state: TrafficStateKind,
    pub color: SemaphoreColor,
    /// Decision taken by the re-evaluation, if it produced one.
    pub decision: Option<DecisionKind>,
    pub records: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GreenWaveOutcome {
    pub affected: Vec<IntersectionId>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualChangeOutcome {
    pub intersection: IntersectionId,
    pub color: SemaphoreColor,
    /// `false` when the same hold was already in place.
    pub applied: bool,
}

pub struct Controller<C: Clock> {
    grid: Arc<Grid>,
    normalizer: Normalizer,
    engine: DecisionEngine,
    machine: SemaphoreMachine,
    green_wave_duration_sec: u64,
    cells: HashMap<IntersectionId, Mutex<IntersectionCell>>,
    coordinator: Arc<PersistenceCoordinator>,
    metrics: Arc<CoreMetrics>,
    audit: AuditLog,
    clock: C,
}

impl<C: Clock> Controller<C> {
    /// Build one cell per configured intersection: unknown metrics, `NORMAL`, `RED`.
    pub fn new(
        config: &Config,
        grid: Arc<Grid>,
        coordinator: Arc<PersistenceCoordinator>,
        metrics: Arc<CoreMetrics>,
        audit: AuditLog,
        clock: C,
    ) -> Self {
        let now = clock.now();
        let cells = grid
            .intersections()
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    Mutex::new(IntersectionCell {
                        snapshot: IntersectionSnapshot::default(),
                        traffic: TrafficState::new(now),
                        semaphore: SemaphoreState::new(now),
                    }),
                )
            })
            .collect();
        Self {
            normalizer: Normalizer::new(grid.clone()),
            engine: DecisionEngine::new(RuleSet::new(config.rules), config.timings),
            machine: SemaphoreMachine::new(config.timings.normal_cycle_sec),
            green_wave_duration_sec: config.timings.green_wave_duration_sec,
            grid,
            cells,
            coordinator,
            metrics,
            audit,
            clock,
        }
    }

    pub fn grid(&self) -> &Arc<Grid> {
        &self.grid
    }

    pub fn coordinator(&self) -> &Arc<PersistenceCoordinator> {
        &self.coordinator
    }

    pub fn metrics(&self) -> &Arc<CoreMetrics> {
        &self.metrics
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Parse and fold one raw relay line. Bad lines are counted, logged and dropped.
    pub async fn ingest_line(&self, line: &str) -> Result<IngestOutcome, ControlError> {
        let reading = match self.normalizer.parse(line) {
            Ok(reading) => reading,
            Err(err) => {
                self.reject_event(&err);
                return Err(err.into());
            }
        };
        self.ingest(reading).await
    }

    /// Count and log an event dropped before it reached any snapshot.
    pub fn reject_event(&self, err: &EventError) {
        match err {
            EventError::Malformed(_) => bump(&self.metrics.events_malformed),
            EventError::UnknownIntersection(_) => bump(&self.metrics.unknown_intersection),
        }
        tracing::warn!("dropping sensor event: {err}");
    }

    /// Fold a typed reading into its snapshot and re-evaluate that intersection.
    pub async fn ingest(&self, reading: SensorReading) -> Result<IngestOutcome, ControlError> {
        let id = reading.intersection.clone();
        let cell = self.cell(&id)?;
        let now = self.clock.now();
        let mut records = Vec::new();
        let outcome = {
            let mut guard = cell.lock();
            let cell = &mut *guard;
            let update = self.normalizer.apply(&mut cell.snapshot, &reading);
            self.tick_cell(&id, cell, now, &mut records);
            let decision = if update.any() {
                self.evaluate_cell(&id, cell, now, &mut records)
            } else {
                tracing::debug!(intersection = %id, sensor = %reading.sensor_id, "stale reading ignored");
                None
            };
            IngestOutcome {
                traffic_state: cell.traffic.kind,
                color: cell.semaphore.color,
                decision,
                records: records.len() + 1,
            }
        };
        bump(&self.metrics.events_accepted);
        records.insert(0, WriteRecord::SensorEvent(reading));
        self.persist(records).await;
        Ok(outcome)
    }

    /// Advance every semaphore timer and cycle, and leave expired green waves.
    /// Returns how many records the pass produced.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut records = Vec::new();
        for id in self.grid.intersections() {
            let Some(cell) = self.cells.get(id) else {
                continue;
            };
            let mut guard = cell.lock();
            let cell = &mut *guard;
            self.tick_cell(id, cell, now, &mut records);
            if cell.traffic.kind == TrafficStateKind::GreenWave && !cell.traffic.green_wave_active(now) {
                self.evaluate_cell(id, cell, now, &mut records);
            }
        }
        let produced = records.len();
        self.persist(records).await;
        produced
    }

    /// Hold every intersection on `route` green for the configured wave duration.
    /// An unknown member rejects the whole route before any state changes.
    pub async fn force_green_wave(
        &self,
        route: &RouteSpec,
        reason: &str,
        requested_by: &str,
    ) -> Result<GreenWaveOutcome, ControlError> {
        let affected = self
            .grid
            .expand_route(route)
            .map_err(ControlError::InvalidOverrideRoute)?;
        let cells = affected
            .iter()
            .map(|id| self.cell(id).map(|cell| (id, cell)))
            .collect::<Result<Vec<_>, _>>()?;
        let now = self.clock.now();
        let mut records = Vec::new();
        for (id, cell) in cells {
            let mut guard = cell.lock();
            let cell = &mut *guard;
            self.tick_cell(id, cell, now, &mut records);
            let evaluation = self.engine.enter_green_wave(id, &mut cell.traffic, now);
            if evaluation.changed() {
                bump(&self.metrics.state_transitions);
            }
            tracing::info!(
                intersection = %id,
                from = %evaluation.previous,
                to = %evaluation.current,
                "green wave override"
            );
            if let Some(command) = &evaluation.command {
                self.apply_command(cell, command, &mut records);
            }
            records.push(WriteRecord::Decision(DecisionRecord {
                intersection: id.clone(),
                previous_state: evaluation.previous,
                traffic_state: evaluation.current,
                decision: evaluation.decision,
                details: format!("{}; {reason}", evaluation.details),
                metrics: cell.snapshot.metrics(),
                recorded_at: now,
            }));
        }
        let expires_at = after_secs(now, self.green_wave_duration_sec);
        let target = route.describe();
        records.push(WriteRecord::PriorityAction(PriorityActionRecord {
            action_type: PriorityActionType::GreenWave,
            target: target.clone(),
            reason: reason.to_string(),
            requested_by: requested_by.to_string(),
            affected_intersections: affected.clone(),
            requested_at: now,
        }));
        bump(&self.metrics.green_waves);
        self.audit.emit(
            "green_wave",
            &target,
            &format!(
                "{reason}; {} intersections green until {expires_at} (requested by {requested_by})",
                affected.len()
            ),
            now,
        );
        self.persist(records).await;
        Ok(GreenWaveOutcome { affected, expires_at })
    }

    /// Hold one semaphore at `color` until the next rule-driven or operator command.
    pub async fn manual_change(
        &self,
        intersection: &str,
        color: SemaphoreColor,
        requested_by: &str,
    ) -> Result<ManualChangeOutcome, ControlError> {
        let id = self.resolve(intersection)?;
        let cell = self.cell(&id)?;
        let now = self.clock.now();
        let mut records = Vec::new();
        let applied = {
            let mut guard = cell.lock();
            let cell = &mut *guard;
            self.tick_cell(&id, cell, now, &mut records);
            let command = SemaphoreCommand {
                intersection: id.clone(),
                target_color: color,
                reason: CommandReason::Manual,
                duration_secs: None,
                issued_at: now,
            };
            let applied = self.apply_command(cell, &command, &mut records);
            if applied {
                records.push(WriteRecord::Decision(DecisionRecord {
                    intersection: id.clone(),
                    previous_state: cell.traffic.kind,
                    traffic_state: cell.traffic.kind,
                    decision: DecisionKind::ForceChange,
                    details: format!("manual change to {color}"),
                    metrics: cell.snapshot.metrics(),
                    recorded_at: now,
                }));
            }
            applied
        };
        if applied {
            records.push(WriteRecord::PriorityAction(PriorityActionRecord {
                action_type: PriorityActionType::ForceChange,
                target: id.to_string(),
                reason: format!("manual change to {color}"),
                requested_by: requested_by.to_string(),
                affected_intersections: vec![id.clone()],
                requested_at: now,
            }));
            bump(&self.metrics.manual_changes);
            self.audit.emit(
                "manual_change",
                id.as_str(),
                &format!("semaphore held {color} by {requested_by}"),
                now,
            );
        } else {
            tracing::debug!(intersection = %id, %color, "manual change already in effect");
        }
        self.persist(records).await;
        Ok(ManualChangeOutcome {
            intersection: id,
            color,
            applied,
        })
    }

    /// Current state of one intersection; the semaphore is projected to `now`
    /// without mutating it.
    pub fn status(&self, intersection: &str) -> Result<IntersectionView, ControlError> {
        let id = self.resolve(intersection)?;
        let cell = self.cell(&id)?;
        let now = self.clock.now();
        let guard = cell.lock();
        let mut semaphore = guard.semaphore.clone();
        self.machine.tick(&id, &mut semaphore, now);
        Ok(IntersectionView {
            traffic_state: guard.traffic,
            semaphore,
            snapshot: guard.snapshot.clone(),
            intersection: id,
            as_of: now,
        })
    }

    pub fn state_counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for cell in self.cells.values() {
            match cell.lock().traffic.kind {
                TrafficStateKind::Normal => counts.normal += 1,
                TrafficStateKind::Congestion => counts.congestion += 1,
                TrafficStateKind::GreenWave => counts.green_wave += 1,
            }
        }
        counts
    }

    pub fn resolve(&self, intersection: &str) -> Result<IntersectionId, ControlError> {
        self.grid.resolve(intersection).map_err(|_| {
            bump(&self.metrics.unknown_intersection);
            ControlError::UnknownIntersection(intersection.to_string())
        })
    }

    fn cell(&self, id: &IntersectionId) -> Result<&Mutex<IntersectionCell>, ControlError> {
        self.cells
            .get(id)
            .ok_or_else(|| ControlError::UnknownIntersection(id.to_string()))
    }

    fn tick_cell(
        &self,
        id: &IntersectionId,
        cell: &mut IntersectionCell,
        now: DateTime<Utc>,
        records: &mut Vec<WriteRecord>,
    ) {
        if let Some(transition) = self.machine.tick(id, &mut cell.semaphore, now) {
            self.note_transition(transition, records);
        }
    }

    fn evaluate_cell(
        &self,
        id: &IntersectionId,
        cell: &mut IntersectionCell,
        now: DateTime<Utc>,
        records: &mut Vec<WriteRecord>,
    ) -> Option<DecisionKind> {
        let extension_running = cell.semaphore.extension_running(now);
        let evaluation =
            self.engine
                .evaluate(id, &mut cell.traffic, &cell.snapshot, extension_running, now)?;
        if evaluation.changed() {
            bump(&self.metrics.state_transitions);
            tracing::info!(
                intersection = %id,
                from = %evaluation.previous,
                to = %evaluation.current,
                decision = evaluation.decision.as_str(),
                "traffic state changed"
            );
        }
        if let Some(command) = &evaluation.command {
            self.apply_command(cell, command, records);
        }
        if evaluation.resume_cycle && self.machine.resume_cycle(&mut cell.semaphore, now) {
            tracing::info!(intersection = %id, color = %cell.semaphore.color, "extension cancelled; cycling resumed");
        }
        records.push(WriteRecord::Decision(DecisionRecord {
            intersection: id.clone(),
            previous_state: evaluation.previous,
            traffic_state: evaluation.current,
            decision: evaluation.decision,
            details: evaluation.details,
            metrics: cell.snapshot.metrics(),
            recorded_at: now,
        }));
        Some(evaluation.decision)
    }

    fn apply_command(
        &self,
        cell: &mut IntersectionCell,
        command: &SemaphoreCommand,
        records: &mut Vec<WriteRecord>,
    ) -> bool {
        match self.machine.apply(&mut cell.semaphore, command) {
            Some(transition) => {
                self.note_transition(transition, records);
                true
            }
            None => false,
        }
    }

    fn note_transition(&self, transition: SemaphoreTransition, records: &mut Vec<WriteRecord>) {
        bump(&self.metrics.semaphore_changes);
        tracing::info!(
            intersection = %transition.intersection,
            old_color = %transition.old_color,
            new_color = %transition.new_color,
            reason = %transition.reason,
            "semaphore transition"
        );
        records.push(WriteRecord::SemaphoreChange(transition));
    }

    async fn persist(&self, records: Vec<WriteRecord>) {
        for record in records {
            self.coordinator.record(record).await;
        }
    }
}
