//! Run domain types
//!
//! A run is one execution of a strategy: a backtest over a bounded window,
//! or a paper/live session that runs until stopped.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::RunError;
use crate::clock::Timeframe;

/// Execution mode of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum RunMode {
    Backtest = 1,
    Paper = 2,
    Live = 3,
}

impl RunMode {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(RunMode::Backtest),
            2 => Some(RunMode::Paper),
            3 => Some(RunMode::Live),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Backtest => "backtest",
            RunMode::Paper => "paper",
            RunMode::Live => "live",
        }
    }

    /// Whether this mode trades against a connected exchange.
    #[inline]
    pub fn is_exchange_backed(&self) -> bool {
        matches!(self, RunMode::Paper | RunMode::Live)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backtest" => Ok(RunMode::Backtest),
            "paper" => Ok(RunMode::Paper),
            "live" => Ok(RunMode::Live),
            other => Err(format!("unknown run mode: {other}")),
        }
    }
}

/// Run lifecycle states.
///
/// Transitions: PENDING -> RUNNING -> {STOPPED | COMPLETED | ERROR}.
/// Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum RunStatus {
    Pending = 0,
    Running = 10,
    Stopped = 20,
    Completed = 30,
    Error = -10,
}

impl RunStatus {
    /// Check if no further transitions are possible.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Stopped | RunStatus::Completed | RunStatus::Error
        )
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match (self, next) {
            (RunStatus::Pending, RunStatus::Running) => true,
            (RunStatus::Running, RunStatus::Stopped)
            | (RunStatus::Running, RunStatus::Completed)
            | (RunStatus::Running, RunStatus::Error) => true,
            _ => false,
        }
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(RunStatus::Pending),
            10 => Some(RunStatus::Running),
            20 => Some(RunStatus::Stopped),
            30 => Some(RunStatus::Completed),
            -10 => Some(RunStatus::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Stopped => "stopped",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Caller-supplied description of a run to create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub mode: RunMode,
    pub strategy_id: String,
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl RunSpec {
    /// Validate the spec shape before a run record is created.
    pub fn validate(&self) -> Result<(), RunError> {
        if self.strategy_id.is_empty() {
            return Err(RunError::Validation("strategy_id must not be empty".to_string()));
        }
        if self.symbols.is_empty() {
            return Err(RunError::Validation("symbols must not be empty".to_string()));
        }
        if self.mode == RunMode::Backtest {
            let (start, end) = match (self.start_time, self.end_time) {
                (Some(s), Some(e)) => (s, e),
                _ => {
                    return Err(RunError::Validation(
                        "backtest runs require start_time and end_time".to_string(),
                    ))
                }
            };
            if end <= start {
                return Err(RunError::Validation(format!(
                    "backtest end_time {end} must be after start_time {start}"
                )));
            }
        }
        Ok(())
    }
}

/// One execution of a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub mode: RunMode,
    pub strategy_id: String,
    /// Ordered symbol list; the first symbol is the primary instrument.
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn from_spec(spec: &RunSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode: spec.mode,
            strategy_id: spec.strategy_id.clone(),
            symbols: spec.symbols.clone(),
            timeframe: spec.timeframe,
            start_time: spec.start_time,
            end_time: spec.end_time,
            status: RunStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            stopped_at: None,
        }
    }

    /// Transition the status, stamping lifecycle timestamps.
    pub fn transition(&mut self, next: RunStatus) -> Result<(), RunError> {
        if !self.status.can_transition_to(next) {
            return Err(RunError::IllegalTransition {
                run_id: self.id,
                from: self.status,
                to: next,
            });
        }
        match next {
            RunStatus::Running => self.started_at = Some(Utc::now()),
            RunStatus::Stopped | RunStatus::Completed | RunStatus::Error => {
                self.stopped_at = Some(Utc::now())
            }
            RunStatus::Pending => {}
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn spec(mode: RunMode) -> RunSpec {
        RunSpec {
            mode,
            strategy_id: "sma_cross".to_string(),
            symbols: vec!["BTC/USD".to_string()],
            timeframe: Timeframe::H1,
            start_time: None,
            end_time: None,
        }
    }

    #[test]
    fn test_backtest_requires_both_bounds() {
        let mut s = spec(RunMode::Backtest);
        assert!(s.validate().is_err());

        s.start_time = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(s.validate().is_err());

        s.end_time = Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        assert!(s.validate().is_ok());

        // Inverted bounds are invalid.
        s.end_time = Some(Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap());
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_paper_needs_no_bounds() {
        assert!(spec(RunMode::Paper).validate().is_ok());
        assert!(spec(RunMode::Live).validate().is_ok());
    }

    #[test]
    fn test_status_transitions() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Stopped));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Error));

        assert!(!RunStatus::Pending.can_transition_to(RunStatus::Completed));
        assert!(!RunStatus::Stopped.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Error));
        assert!(!RunStatus::Error.can_transition_to(RunStatus::Running));
    }

    #[test]
    fn test_run_transition_stamps_timestamps() {
        let mut s = spec(RunMode::Paper);
        s.start_time = None;
        let mut run = Run::from_spec(&s);
        assert!(run.started_at.is_none());

        run.transition(RunStatus::Running).unwrap();
        assert!(run.started_at.is_some());

        run.transition(RunStatus::Stopped).unwrap();
        assert!(run.stopped_at.is_some());

        let err = run.transition(RunStatus::Running).unwrap_err();
        assert!(matches!(err, RunError::IllegalTransition { .. }));
    }

    #[test]
    fn test_mode_ids_roundtrip() {
        for mode in [RunMode::Backtest, RunMode::Paper, RunMode::Live] {
            assert_eq!(RunMode::from_id(mode.id()), Some(mode));
        }
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Stopped,
            RunStatus::Completed,
            RunStatus::Error,
        ] {
            assert_eq!(RunStatus::from_id(status.id()), Some(status));
        }
    }
}
