use crate::config::TimingConfig;
use crate::control::rules::{RuleSet, Verdict};
use crate::control::semaphore::{CommandReason, SemaphoreColor, SemaphoreCommand};
use crate::grid::IntersectionId;
use crate::ingest::normalizer::IntersectionSnapshot;
use crate::time::after_secs;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrafficStateKind {
    Normal,
    Congestion,
    GreenWave,
}

impl TrafficStateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TrafficStateKind::Normal => "NORMAL",
            TrafficStateKind::Congestion => "CONGESTION",
            TrafficStateKind::GreenWave => "GREEN_WAVE",
        }
    }
}

impl fmt::Display for TrafficStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrafficState {
    pub kind: TrafficStateKind,
    pub entered_at: DateTime<Utc>,
    /// Set only while in `GREEN_WAVE`.
    pub expires_at: Option<DateTime<Utc>>,
}

impl TrafficState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            kind: TrafficStateKind::Normal,
            entered_at: now,
            expires_at: None,
        }
    }

    fn enter(&mut self, kind: TrafficStateKind, now: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) {
        self.kind = kind;
        self.entered_at = now;
        self.expires_at = expires_at;
    }

    pub fn green_wave_active(&self, now: DateTime<Utc>) -> bool {
        self.kind == TrafficStateKind::GreenWave && self.expires_at.is_some_and(|at| at > now)
    }
}

/// Action column of a decision record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    NoAction,
    ExtendGreen,
    GreenWave,
    ForceChange,
}

impl DecisionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionKind::NoAction => "NO_ACTION",
            DecisionKind::ExtendGreen => "EXTEND_GREEN",
            DecisionKind::GreenWave => "GREEN_WAVE",
            DecisionKind::ForceChange => "FORCE_CHANGE",
        }
    }
}

/// What one evaluation pass decided.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub previous: TrafficStateKind,
    pub current: TrafficStateKind,
    pub decision: DecisionKind,
    pub command: Option<SemaphoreCommand>,
    /// Cancel a running congestion extension and go back to cycling.
    pub resume_cycle: bool,
    pub details: String,
}

impl Evaluation {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// Per-intersection traffic state machine.
#[derive(Debug, Clone, Copy)]
pub struct DecisionEngine {
    rules: RuleSet,
    timings: TimingConfig,
}

impl DecisionEngine {
    pub fn new(rules: RuleSet, timings: TimingConfig) -> Self {
        Self { rules, timings }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Re-evaluate after a snapshot update or timer expiry.
    ///
    /// `extension_running` tells whether the intersection's semaphore is still
    /// inside a congestion extension. Returns `None` when nothing changes.
    pub fn evaluate(
        &self,
        intersection: &IntersectionId,
        state: &mut TrafficState,
        snapshot: &IntersectionSnapshot,
        extension_running: bool,
        now: DateTime<Utc>,
    ) -> Option<Evaluation> {
        let previous = state.kind;
        let verdict = self.rules.evaluate(snapshot);

        if previous == TrafficStateKind::GreenWave {
            if state.green_wave_active(now) {
                return None;
            }
            // Expired override: always leave GREEN_WAVE, defaulting to NORMAL.
            return Some(match verdict {
                Verdict::Congestion => {
                    state.enter(TrafficStateKind::Congestion, now, None);
                    self.extension(intersection, previous, now, "green wave expired under congestion")
                }
                Verdict::Normal | Verdict::Inconclusive => {
                    state.enter(TrafficStateKind::Normal, now, None);
                    Evaluation {
                        previous,
                        current: TrafficStateKind::Normal,
                        decision: DecisionKind::NoAction,
                        command: None,
                        resume_cycle: false,
                        details: format!("green wave expired; rules {}", verdict_label(verdict)),
                    }
                }
            });
        }

        match verdict {
            Verdict::Congestion if previous != TrafficStateKind::Congestion => {
                state.enter(TrafficStateKind::Congestion, now, None);
                Some(self.extension(intersection, previous, now, "congestion detected"))
            }
            Verdict::Congestion if !extension_running => {
                Some(self.extension(intersection, previous, now, "congestion persists"))
            }
            Verdict::Normal if previous != TrafficStateKind::Normal => {
                state.enter(TrafficStateKind::Normal, now, None);
                Some(Evaluation {
                    previous,
                    current: TrafficStateKind::Normal,
                    decision: DecisionKind::NoAction,
                    command: None,
                    resume_cycle: extension_running,
                    details: "traffic back to normal".to_string(),
                })
            }
            _ => None,
        }
    }

    /// Force `GREEN_WAVE` (or refresh its expiry) regardless of the rules.
    pub fn enter_green_wave(
        &self,
        intersection: &IntersectionId,
        state: &mut TrafficState,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let previous = state.kind;
        let duration = self.timings.green_wave_duration_sec;
        state.enter(TrafficStateKind::GreenWave, now, Some(after_secs(now, duration)));
        Evaluation {
            previous,
            current: TrafficStateKind::GreenWave,
            decision: DecisionKind::GreenWave,
            command: Some(SemaphoreCommand {
                intersection: intersection.clone(),
                target_color: SemaphoreColor::Green,
                reason: CommandReason::PriorityOverride,
                duration_secs: Some(duration),
                issued_at: now,
            }),
            resume_cycle: false,
            details: format!("green wave for {duration}s"),
        }
    }

    fn extension(
        &self,
        intersection: &IntersectionId,
        previous: TrafficStateKind,
        now: DateTime<Utc>,
        details: &str,
    ) -> Evaluation {
        let duration = self.timings.congestion_extension_sec;
        Evaluation {
            previous,
            current: TrafficStateKind::Congestion,
            decision: DecisionKind::ExtendGreen,
            command: Some(SemaphoreCommand {
                intersection: intersection.clone(),
                target_color: SemaphoreColor::Green,
                reason: CommandReason::Congestion,
                duration_secs: Some(duration),
                issued_at: now,
            }),
            resume_cycle: false,
            details: format!("{details}; green extended {duration}s"),
        }
    }
}

fn verdict_label(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Congestion => "congestion",
        Verdict::Normal => "normal",
        Verdict::Inconclusive => "inconclusive",
    }
}
