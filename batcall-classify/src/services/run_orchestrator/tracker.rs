//! Durable run state
//!
//! Pairs the in-memory [`RunState`] with its row in `classification_runs`.
//! Every transition is validated in memory first and then written through
//! the guarded queries in [`crate::db::runs`].

use sqlx::SqlitePool;
use std::path::Path;
use tracing::debug;

use super::RunError;
use crate::db::runs;
use crate::models::{ClassificationRun, RunState};

pub struct RunTracker {
    db: SqlitePool,
    run_id: i64,
    state: RunState,
}

impl RunTracker {
    /// QUEUED → IN_PROGRESS
    pub async fn begin(db: SqlitePool, run: &ClassificationRun) -> Result<Self, RunError> {
        let state = run.state().begin()?;
        if !runs::mark_in_progress(&db, run.id).await? {
            return Err(RunError::NotQueued(run.id));
        }
        debug!(run_id = run.id, "Run marked in progress");

        Ok(Self {
            db,
            run_id: run.id,
            state,
        })
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Raise progress; writes only when the value actually grows
    pub async fn advance(&mut self, progress: f64) -> Result<(), RunError> {
        let previous = self.state.progress();
        let next = self.state.advance(progress)?;
        if next.progress() > previous {
            runs::update_progress(&self.db, self.run_id, next.progress()).await?;
        }
        self.state = next;
        Ok(())
    }

    /// IN_PROGRESS → COMPLETED
    pub async fn complete(&mut self, features_file: Option<&Path>) -> Result<(), RunError> {
        let next = self.state.complete()?;
        runs::mark_completed(&self.db, self.run_id, features_file).await?;
        self.state = next;
        Ok(())
    }

    /// Any non-terminal state → FAILED
    pub async fn fail(&mut self, message: &str) -> Result<(), RunError> {
        let next = self.state.fail(message)?;
        if let RunState::Failed { message } = &next {
            runs::mark_failed(&self.db, self.run_id, message).await?;
        }
        self.state = next;
        Ok(())
    }
}
