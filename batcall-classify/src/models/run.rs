//! Classification run state machine
//!
//! A run progresses through four states:
//! QUEUED → IN_PROGRESS → COMPLETED | FAILED
//!
//! `RunState` is the in-memory view the orchestrator drives through its
//! transition methods; `ClassificationRun` is the durable row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Durable status column value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(RunStatus::Queued),
            "in_progress" => Some(RunStatus::InProgress),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid run transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: RunStatus,
    pub to: RunStatus,
}

/// In-memory run state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Queued,
    InProgress { progress: f64 },
    Completed,
    Failed { message: String },
}

impl RunState {
    pub fn status(&self) -> RunStatus {
        match self {
            RunState::Queued => RunStatus::Queued,
            RunState::InProgress { .. } => RunStatus::InProgress,
            RunState::Completed => RunStatus::Completed,
            RunState::Failed { .. } => RunStatus::Failed,
        }
    }

    /// Progress in percent; 100 once completed
    pub fn progress(&self) -> f64 {
        match self {
            RunState::Queued => 0.0,
            RunState::InProgress { progress } => *progress,
            RunState::Completed => 100.0,
            RunState::Failed { .. } => 0.0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// QUEUED → IN_PROGRESS at 0%
    pub fn begin(&self) -> Result<RunState, InvalidTransition> {
        match self {
            RunState::Queued => Ok(RunState::InProgress { progress: 0.0 }),
            other => Err(InvalidTransition {
                from: other.status(),
                to: RunStatus::InProgress,
            }),
        }
    }

    /// IN_PROGRESS → IN_PROGRESS with progress never moving backwards
    ///
    /// Values are clamped to [0, 100]; a lower value keeps the current one.
    pub fn advance(&self, progress: f64) -> Result<RunState, InvalidTransition> {
        match self {
            RunState::InProgress { progress: current } => {
                let requested = if progress.is_finite() { progress.clamp(0.0, 100.0) } else { 0.0 };
                Ok(RunState::InProgress {
                    progress: current.max(requested),
                })
            }
            other => Err(InvalidTransition {
                from: other.status(),
                to: RunStatus::InProgress,
            }),
        }
    }

    /// IN_PROGRESS → COMPLETED
    pub fn complete(&self) -> Result<RunState, InvalidTransition> {
        match self {
            RunState::InProgress { .. } => Ok(RunState::Completed),
            other => Err(InvalidTransition {
                from: other.status(),
                to: RunStatus::Completed,
            }),
        }
    }

    /// QUEUED | IN_PROGRESS → FAILED; an empty message is replaced
    pub fn fail(&self, message: &str) -> Result<RunState, InvalidTransition> {
        if self.is_terminal() {
            return Err(InvalidTransition {
                from: self.status(),
                to: RunStatus::Failed,
            });
        }
        let message = if message.trim().is_empty() {
            "Classification run failed".to_string()
        } else {
            message.to_string()
        };
        Ok(RunState::Failed { message })
    }
}

/// Classification run row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRun {
    pub id: i64,
    pub name: String,
    pub segmentation_id: i64,
    /// Explicit classifier; `None` selects the configured default
    pub classifier_id: Option<i64>,
    pub status: RunStatus,
    /// Percent complete, 0.0 - 100.0
    pub progress: f64,
    pub error_message: Option<String>,
    /// Merged feature table, when the classifier exported features
    pub features_file: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClassificationRun {
    /// Rebuild the in-memory state from the durable columns
    pub fn state(&self) -> RunState {
        match self.status {
            RunStatus::Queued => RunState::Queued,
            RunStatus::InProgress => RunState::InProgress {
                progress: self.progress,
            },
            RunStatus::Completed => RunState::Completed,
            RunStatus::Failed => RunState::Failed {
                message: self.error_message.clone().unwrap_or_default(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let state = RunState::Queued;
        let state = state.begin().unwrap();
        assert_eq!(state, RunState::InProgress { progress: 0.0 });

        let state = state.advance(45.0).unwrap();
        assert_eq!(state.progress(), 45.0);

        let state = state.complete().unwrap();
        assert_eq!(state, RunState::Completed);
        assert_eq!(state.progress(), 100.0);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_progress_never_decreases() {
        let state = RunState::InProgress { progress: 60.0 };
        assert_eq!(state.advance(30.0).unwrap().progress(), 60.0);
        assert_eq!(state.advance(250.0).unwrap().progress(), 100.0);
        assert_eq!(state.advance(f64::NAN).unwrap().progress(), 60.0);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let completed = RunState::Completed;
        assert!(completed.begin().is_err());
        assert!(completed.advance(10.0).is_err());
        assert!(completed.fail("late").is_err());

        let failed = RunState::Failed {
            message: "boom".to_string(),
        };
        assert!(failed.complete().is_err());
        assert_eq!(
            failed.begin().unwrap_err(),
            InvalidTransition {
                from: RunStatus::Failed,
                to: RunStatus::InProgress
            }
        );
    }

    #[test]
    fn test_queued_cannot_complete_directly() {
        assert!(RunState::Queued.complete().is_err());
        assert!(RunState::Queued.advance(10.0).is_err());
    }

    #[test]
    fn test_failure_message_never_empty() {
        let state = RunState::InProgress { progress: 10.0 }.fail("  ").unwrap();
        match state {
            RunState::Failed { message } => assert!(!message.is_empty()),
            other => panic!("unexpected state {:?}", other),
        }

        let state = RunState::Queued.fail("No classifier").unwrap();
        assert_eq!(
            state,
            RunState::Failed {
                message: "No classifier".to_string()
            }
        );
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            RunStatus::Queued,
            RunStatus::InProgress,
            RunStatus::Completed,
            RunStatus::Failed,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("cancelled"), None);
    }
}
