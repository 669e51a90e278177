//! Classification run orchestrator
//!
//! Drives one run through its state machine:
//!
//! ```text
//! queued ──validate──► in_progress ──(each batch ok)──► in_progress
//!                                  ──(any failure)────► failed
//! in_progress ──(all batches + finalize ok)──► completed
//! ```
//!
//! Phases live in their own modules:
//! - `phase_validation`: classifier selection and prerequisite checks
//! - `phase_dispatch`: serial batch loop against the classifier service
//! - `phase_finalize`: feature merge and per-batch persistence
//!
//! The dummy classifier skips dispatch and feeds uniform results straight to
//! the persister.

use batcall_common::config::ClassifierServiceConfig;
use batcall_common::db::{Call, Recording, Segment};
use batcall_common::{EngineConfig, PathMapping};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::audio_slicer::SliceError;
use super::batch_dispatcher::{BatchDispatcher, DispatchError};
use super::classifier_client::{ClassifierClient, ClassifierError};
use super::dummy_classifier;
use super::result_persister::{self, PersistError};
use crate::db::runs;
use crate::models::InvalidTransition;

mod phase_dispatch;
mod phase_finalize;
mod phase_validation;
pub mod tracker;

pub use phase_validation::{ClassifierMode, ValidatedRun};
pub use tracker::RunTracker;

/// Share of progress spent dispatching; persistence covers the rest
pub const DISPATCH_PROGRESS_SHARE: f64 = 90.0;

const MIN_BATCH_SIZE: usize = 5;
const MAX_BATCH_SIZE: usize = 50;

/// Run failures; the display text is what lands on the run row
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Classification run {0} not found")]
    RunNotFound(i64),

    #[error("Classification run {0} is not queued")]
    NotQueued(i64),

    #[error("No classifier specified and default classifier not found")]
    NoClassifier,

    #[error("Classifier {0} not found")]
    ClassifierNotFound(i64),

    #[error("Segmentation {0} not found")]
    SegmentationNotFound(i64),

    #[error("WAV file not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Classifier service unavailable: {0}")]
    ServiceUnreachable(String),

    #[error("No segments found in segmentation {0}")]
    NoSegments(i64),

    #[error("No calls defined for species {0}")]
    NoCalls(i64),

    #[error("No model file configured for classifier '{0}'")]
    NoModel(String),

    #[error("Model file not found: {}", .0.display())]
    ModelMissing(PathBuf),

    #[error(transparent)]
    Audio(#[from] SliceError),

    #[error("Error processing batch {index}: {source}")]
    Batch {
        index: usize,
        #[source]
        source: DispatchError,
    },

    #[error("Failed to save results for batch {index}: {source}")]
    Persist {
        index: usize,
        #[source]
        source: PersistError,
    },

    #[error("Classification run cancelled")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error(transparent)]
    Store(#[from] batcall_common::Error),
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Success { message: String },
    Error { message: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            RunOutcome::Success { message } | RunOutcome::Error { message } => message,
        }
    }
}

/// Explicit process-wide settings a run needs
#[derive(Debug, Clone)]
pub struct EngineContext {
    /// Relative recording and model paths resolve against this folder
    pub root_folder: PathBuf,
    pub tmp_root: PathBuf,
    pub path_mapping: PathMapping,
    pub classifier: ClassifierServiceConfig,
    pub default_classifier_names: Vec<String>,
}

impl EngineContext {
    /// Absolute local path for a stored path
    pub fn resolve_path(&self, stored: &str) -> PathBuf {
        let path = Path::new(stored);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_folder.join(path)
        }
    }
}

impl From<&EngineConfig> for EngineContext {
    fn from(config: &EngineConfig) -> Self {
        Self {
            root_folder: config.root_folder.clone(),
            tmp_root: config.tmp_root.clone(),
            path_mapping: config.path_mapping.clone(),
            classifier: config.classifier.clone(),
            default_classifier_names: config.default_classifier_names.clone(),
        }
    }
}

/// Batch sizing for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub total: usize,
    pub batch_size: usize,
    pub num_batches: usize,
}

impl BatchPlan {
    /// `batch_size = clamp(total / 100 + 1, 5, 50)`
    pub fn for_total(total: usize) -> Self {
        let batch_size = (total / 100 + 1).clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);
        Self {
            total,
            batch_size,
            num_batches: total.div_ceil(batch_size),
        }
    }

    /// Progress after dispatching batch `index`
    pub fn dispatch_progress(&self, index: usize) -> f64 {
        scaled_progress(index, self.num_batches, 0.0, DISPATCH_PROGRESS_SHARE)
    }

    /// Progress after persisting batch `index`
    pub fn persist_progress(&self, index: usize) -> f64 {
        scaled_progress(index, self.num_batches, DISPATCH_PROGRESS_SHARE, 100.0)
    }
}

fn scaled_progress(index: usize, count: usize, from: f64, to: f64) -> f64 {
    if count == 0 {
        return to;
    }
    from + (to - from) * (index + 1) as f64 / count as f64
}

/// Runs classification jobs
pub struct RunOrchestrator {
    db: SqlitePool,
    context: EngineContext,
    client: ClassifierClient,
    dispatcher: BatchDispatcher,
}

impl RunOrchestrator {
    pub fn new(db: SqlitePool, context: EngineContext) -> Result<Self, ClassifierError> {
        let client = ClassifierClient::new(&context.classifier)?;
        let dispatcher = BatchDispatcher::new(
            client.clone(),
            context.tmp_root.clone(),
            context.path_mapping.clone(),
        );

        Ok(Self {
            db,
            context,
            client,
            dispatcher,
        })
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    /// Execute a queued run to completion or failure
    ///
    /// Failures never escape: they are written to the run row and returned
    /// as [`RunOutcome::Error`].
    pub async fn execute(&self, run_id: i64, cancel_token: CancellationToken) -> RunOutcome {
        let start_time = std::time::Instant::now();

        let run = match runs::load_run(&self.db, run_id).await {
            Ok(Some(run)) => run,
            Ok(None) => return error_outcome(run_id, RunError::RunNotFound(run_id)),
            Err(e) => return error_outcome(run_id, RunError::Store(e)),
        };

        let mut tracker = match RunTracker::begin(self.db.clone(), &run).await {
            Ok(tracker) => tracker,
            Err(e) => return error_outcome(run_id, e),
        };

        info!(run_id, name = %run.name, segmentation_id = run.segmentation_id, "Starting classification run");

        let result = match self.validate(&run).await {
            Ok(validated) => match validated.mode {
                ClassifierMode::Dummy => {
                    self.run_dummy(&mut tracker, &validated.segments, &validated.calls, &validated.recording)
                        .await
                }
                ClassifierMode::Service { .. } => {
                    self.run_service(&mut tracker, &validated, &cancel_token).await
                }
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(message) => {
                info!(
                    run_id,
                    duration_ms = start_time.elapsed().as_millis() as u64,
                    "{}",
                    message
                );
                RunOutcome::Success { message }
            }
            Err(err) => {
                let message = err.to_string();
                error!(run_id, "Classification run failed: {}", message);
                if let Err(e) = tracker.fail(&message).await {
                    error!(run_id, "Failed to record run failure: {}", e);
                }
                RunOutcome::Error { message }
            }
        }
    }

    /// Uniform in-process classification
    async fn run_dummy(
        &self,
        tracker: &mut RunTracker,
        segments: &[Segment],
        calls: &[Call],
        recording: &Recording,
    ) -> Result<String, RunError> {
        let run_id = tracker.run_id();
        let plan = BatchPlan::for_total(segments.len());
        let segments_by_id: HashMap<i64, Segment> =
            segments.iter().map(|s| (s.id, s.clone())).collect();

        let mut saved = 0;
        for (index, chunk) in segments.chunks(plan.batch_size).enumerate() {
            let results = dummy_classifier::classify(chunk, calls, recording);
            saved += result_persister::persist(&self.db, &results, run_id, &segments_by_id, calls)
                .await
                .map_err(|source| RunError::Persist { index, source })?;
            tracker
                .advance(scaled_progress(index, plan.num_batches, 0.0, 100.0))
                .await?;
        }

        tracker.complete(None).await?;
        Ok(format!("Dummy classification completed: {} segments classified", saved))
    }
}

fn error_outcome(run_id: i64, err: RunError) -> RunOutcome {
    let message = err.to_string();
    error!(run_id, "Classification run not started: {}", message);
    RunOutcome::Error { message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_plan_sizing() {
        assert_eq!(BatchPlan::for_total(2), BatchPlan { total: 2, batch_size: 5, num_batches: 1 });
        assert_eq!(BatchPlan::for_total(12).num_batches, 3);
        assert_eq!(BatchPlan::for_total(1000).batch_size, 11);
        assert_eq!(BatchPlan::for_total(1000).num_batches, 91);
        assert_eq!(BatchPlan::for_total(4900).batch_size, 50);
        assert_eq!(BatchPlan::for_total(100_000).batch_size, 50);
        assert_eq!(BatchPlan::for_total(0).num_batches, 0);
    }

    #[test]
    fn test_progress_schedule() {
        let plan = BatchPlan::for_total(20);
        assert_eq!(plan.num_batches, 4);
        assert_eq!(plan.dispatch_progress(0), 22.5);
        assert_eq!(plan.dispatch_progress(3), 90.0);
        assert_eq!(plan.persist_progress(1), 95.0);
        assert_eq!(plan.persist_progress(3), 100.0);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            RunError::NoClassifier.to_string(),
            "No classifier specified and default classifier not found"
        );
        assert_eq!(
            RunError::ModelMissing(PathBuf::from("/models/bat.pkl")).to_string(),
            "Model file not found: /models/bat.pkl"
        );
        let batch = RunError::Batch {
            index: 0,
            source: DispatchError::Classifier(ClassifierError::HttpNon200 {
                status: 500,
                body: "boom".to_string(),
            }),
        };
        assert_eq!(
            batch.to_string(),
            "Error processing batch 0: Classifier service error (HTTP 500): boom"
        );
    }

    #[test]
    fn test_resolve_path() {
        let context = EngineContext {
            root_folder: PathBuf::from("/srv/batcall"),
            tmp_root: PathBuf::from("/srv/batcall/tmp"),
            path_mapping: PathMapping::identity("/srv/batcall/tmp"),
            classifier: ClassifierServiceConfig::default(),
            default_classifier_names: vec![],
        };
        assert_eq!(context.resolve_path("models/a.pkl"), PathBuf::from("/srv/batcall/models/a.pkl"));
        assert_eq!(context.resolve_path("/abs/a.pkl"), PathBuf::from("/abs/a.pkl"));
    }
}
