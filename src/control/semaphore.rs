use crate::grid::IntersectionId;
use crate::time::{after_secs, secs};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SemaphoreColor {
    Red,
    Green,
}

impl SemaphoreColor {
    pub fn flipped(self) -> Self {
        match self {
            SemaphoreColor::Red => SemaphoreColor::Green,
            SemaphoreColor::Green => SemaphoreColor::Red,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SemaphoreColor::Red => "RED",
            SemaphoreColor::Green => "GREEN",
        }
    }
}

impl fmt::Display for SemaphoreColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a semaphore command was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandReason {
    Congestion,
    PriorityOverride,
    Manual,
}

impl CommandReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandReason::Congestion => "congestion",
            CommandReason::PriorityOverride => "priority-override",
            CommandReason::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemaphoreCommand {
    pub intersection: IntersectionId,
    pub target_color: SemaphoreColor,
    pub reason: CommandReason,
    /// `None` holds the color until the next command.
    pub duration_secs: Option<u64>,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SemaphoreMode {
    /// Standard alternation every normal cycle.
    Cycling,
    /// Forced color until `until`, then back to cycling.
    Timed {
        until: DateTime<Utc>,
        reason: CommandReason,
    },
    /// Operator hold with no expiry.
    Held,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemaphoreState {
    pub color: SemaphoreColor,
    /// When the current color was entered.
    pub since: DateTime<Utc>,
    pub mode: SemaphoreMode,
    /// Start of the current cycle phase; only meaningful while cycling.
    pub phase_started_at: DateTime<Utc>,
}

impl SemaphoreState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            color: SemaphoreColor::Red,
            since: now,
            mode: SemaphoreMode::Cycling,
            phase_started_at: now,
        }
    }

    pub fn active_timer(&self) -> Option<DateTime<Utc>> {
        match self.mode {
            SemaphoreMode::Timed { until, .. } => Some(until),
            _ => None,
        }
    }

    /// True while a congestion extension is still running at `now`.
    pub fn extension_running(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.mode,
            SemaphoreMode::Timed { until, reason: CommandReason::Congestion } if until > now
        )
    }
}

/// One applied semaphore transition, as logged and persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemaphoreTransition {
    pub intersection: IntersectionId,
    pub old_color: SemaphoreColor,
    pub new_color: SemaphoreColor,
    pub reason: String,
    pub timer_until: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

/// Pure state machine over [`SemaphoreState`]; the caller owns locking and time.
#[derive(Debug, Clone, Copy)]
pub struct SemaphoreMachine {
    normal_cycle_sec: u64,
}

impl SemaphoreMachine {
    pub fn new(normal_cycle_sec: u64) -> Self {
        Self {
            normal_cycle_sec: normal_cycle_sec.max(1),
        }
    }

    /// Apply a command. Last command wins; returns `None` for a repeated hold.
    pub fn apply(
        &self,
        state: &mut SemaphoreState,
        command: &SemaphoreCommand,
    ) -> Option<SemaphoreTransition> {
        let mode = match command.duration_secs {
            Some(duration) => SemaphoreMode::Timed {
                until: after_secs(command.issued_at, duration),
                reason: command.reason,
            },
            None => SemaphoreMode::Held,
        };
        if mode == SemaphoreMode::Held
            && state.mode == SemaphoreMode::Held
            && state.color == command.target_color
        {
            return None;
        }
        let old_color = state.color;
        if old_color != command.target_color {
            state.color = command.target_color;
            state.since = command.issued_at;
        }
        state.mode = mode;
        state.phase_started_at = command.issued_at;
        Some(SemaphoreTransition {
            intersection: command.intersection.clone(),
            old_color,
            new_color: state.color,
            reason: command.reason.as_str().to_string(),
            timer_until: state.active_timer(),
            at: command.issued_at,
        })
    }

    /// Drop any running timer or hold and restart the cycle at `now` without changing color.
    pub fn resume_cycle(&self, state: &mut SemaphoreState, now: DateTime<Utc>) -> bool {
        if state.mode == SemaphoreMode::Cycling {
            return false;
        }
        state.mode = SemaphoreMode::Cycling;
        state.phase_started_at = now;
        true
    }

    /// Advance timers and the standard cycle up to `now`.
    ///
    /// A lapsed timer reverts to cycling with the phase anchored at its expiry;
    /// missed cycle phases collapse into at most one color flip.
    pub fn tick(
        &self,
        intersection: &IntersectionId,
        state: &mut SemaphoreState,
        now: DateTime<Utc>,
    ) -> Option<SemaphoreTransition> {
        if let SemaphoreMode::Timed { until, .. } = state.mode {
            if now < until {
                return None;
            }
            state.mode = SemaphoreMode::Cycling;
            state.phase_started_at = until;
        }
        if state.mode != SemaphoreMode::Cycling {
            return None;
        }
        let cycle = secs(self.normal_cycle_sec);
        let elapsed = now - state.phase_started_at;
        if elapsed < cycle {
            return None;
        }
        let phases = elapsed.num_seconds() / cycle.num_seconds();
        state.phase_started_at += cycle * i32::try_from(phases).unwrap_or(i32::MAX);
        if phases % 2 == 0 {
            return None;
        }
        let old_color = state.color;
        state.color = old_color.flipped();
        state.since = state.phase_started_at;
        Some(SemaphoreTransition {
            intersection: intersection.clone(),
            old_color,
            new_color: state.color,
            reason: "cycle".to_string(),
            timer_until: None,
            at: state.phase_started_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::grid::Grid;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 8, 0, 0).unwrap()
    }

    fn id() -> IntersectionId {
        Grid::from_config(&Config::default()).resolve("INT-B3").unwrap()
    }

    fn command(color: SemaphoreColor, reason: CommandReason, duration: Option<u64>, at: i64) -> SemaphoreCommand {
        SemaphoreCommand {
            intersection: id(),
            target_color: color,
            reason,
            duration_secs: duration,
            issued_at: t0() + Duration::seconds(at),
        }
    }

    #[test]
    fn standard_cycle_alternates_every_period() {
        let machine = SemaphoreMachine::new(15);
        let mut state = SemaphoreState::new(t0());
        assert!(machine.tick(&id(), &mut state, t0() + Duration::seconds(14)).is_none());
        let flip = machine.tick(&id(), &mut state, t0() + Duration::seconds(15)).unwrap();
        assert_eq!((flip.old_color, flip.new_color), (SemaphoreColor::Red, SemaphoreColor::Green));
        assert!(machine.tick(&id(), &mut state, t0() + Duration::seconds(29)).is_none());
        assert!(machine.tick(&id(), &mut state, t0() + Duration::seconds(30)).is_some());
        assert_eq!(state.color, SemaphoreColor::Red);
    }

    #[test]
    fn long_gaps_collapse_into_parity() {
        let machine = SemaphoreMachine::new(15);
        let mut state = SemaphoreState::new(t0());
        // Four full phases: back to the starting color without a transition.
        assert!(machine.tick(&id(), &mut state, t0() + Duration::seconds(61)).is_none());
        assert_eq!(state.color, SemaphoreColor::Red);
        assert_eq!(state.phase_started_at, t0() + Duration::seconds(60));
    }

    #[test]
    fn timed_command_reverts_to_cycling_at_expiry_not_before() {
        let machine = SemaphoreMachine::new(15);
        let mut state = SemaphoreState::new(t0());
        let applied = machine
            .apply(&mut state, &command(SemaphoreColor::Green, CommandReason::Congestion, Some(10), 3))
            .unwrap();
        assert_eq!(applied.timer_until, Some(t0() + Duration::seconds(13)));
        assert!(state.extension_running(t0() + Duration::seconds(12)));

        assert!(machine.tick(&id(), &mut state, t0() + Duration::seconds(12)).is_none());
        assert!(matches!(state.mode, SemaphoreMode::Timed { .. }));

        assert!(machine.tick(&id(), &mut state, t0() + Duration::seconds(13)).is_none());
        assert_eq!(state.mode, SemaphoreMode::Cycling);
        assert_eq!(state.color, SemaphoreColor::Green);
        assert_eq!(state.phase_started_at, t0() + Duration::seconds(13));

        let flip = machine.tick(&id(), &mut state, t0() + Duration::seconds(28)).unwrap();
        assert_eq!(flip.new_color, SemaphoreColor::Red);
    }

    #[test]
    fn newer_command_preempts_running_timer() {
        let machine = SemaphoreMachine::new(15);
        let mut state = SemaphoreState::new(t0());
        machine.apply(&mut state, &command(SemaphoreColor::Green, CommandReason::Congestion, Some(10), 0));
        machine.apply(&mut state, &command(SemaphoreColor::Green, CommandReason::PriorityOverride, Some(30), 5));
        assert_eq!(state.active_timer(), Some(t0() + Duration::seconds(35)));
        assert!(!state.extension_running(t0() + Duration::seconds(6)));
        let manual = machine
            .apply(&mut state, &command(SemaphoreColor::Red, CommandReason::Manual, None, 8))
            .unwrap();
        assert_eq!(manual.old_color, SemaphoreColor::Green);
        assert_eq!(state.mode, SemaphoreMode::Held);
        assert!(machine.tick(&id(), &mut state, t0() + Duration::seconds(600)).is_none());
        assert_eq!(state.color, SemaphoreColor::Red);
    }

    #[test]
    fn repeated_manual_change_is_idempotent() {
        let machine = SemaphoreMachine::new(15);
        let mut state = SemaphoreState::new(t0());
        assert!(machine
            .apply(&mut state, &command(SemaphoreColor::Green, CommandReason::Manual, None, 1))
            .is_some());
        let after_first = state.clone();
        assert!(machine
            .apply(&mut state, &command(SemaphoreColor::Green, CommandReason::Manual, None, 2))
            .is_none());
        assert_eq!(state, after_first);
    }

    #[test]
    fn resume_cycle_keeps_color() {
        let machine = SemaphoreMachine::new(15);
        let mut state = SemaphoreState::new(t0());
        machine.apply(&mut state, &command(SemaphoreColor::Green, CommandReason::Congestion, Some(10), 0));
        assert!(machine.resume_cycle(&mut state, t0() + Duration::seconds(4)));
        assert_eq!(state.color, SemaphoreColor::Green);
        assert_eq!(state.phase_started_at, t0() + Duration::seconds(4));
        assert!(!machine.resume_cycle(&mut state, t0() + Duration::seconds(5)));
    }
}
