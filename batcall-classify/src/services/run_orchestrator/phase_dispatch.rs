//! Serial batch loop against the classifier service

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::phase_validation::{ClassifierMode, ValidatedRun};
use super::{BatchPlan, RunError, RunOrchestrator, RunTracker};
use crate::services::audio_slicer::SourceWaveform;
use crate::services::batch_dispatcher::{SegmentMetadata, SegmentResult};

/// Accumulated output of every dispatched batch
#[derive(Debug, Default)]
pub(super) struct DispatchedBatches {
    pub batches: Vec<Vec<SegmentResult>>,
    pub metadata: HashMap<String, SegmentMetadata>,
    pub feature_files: Vec<PathBuf>,
}

impl DispatchedBatches {
    /// Best-effort removal of collected feature files
    pub fn discard_feature_files(&mut self) {
        for path in self.feature_files.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), "Failed to remove batch features file: {}", e);
            }
        }
    }
}

impl RunOrchestrator {
    /// Dispatch every batch, then persist and finalize
    pub(super) async fn run_service(
        &self,
        tracker: &mut RunTracker,
        validated: &ValidatedRun,
        cancel_token: &CancellationToken,
    ) -> Result<String, RunError> {
        let ClassifierMode::Service { source_path, .. } = &validated.mode else {
            return Err(RunError::Worker("service run without a service classifier".to_string()));
        };

        let source = decode_source(source_path).await?;
        let plan = BatchPlan::for_total(validated.segments.len());

        info!(
            run_id = tracker.run_id(),
            classifier = %validated.classifier.name,
            segments = plan.total,
            batch_size = plan.batch_size,
            batches = plan.num_batches,
            "Dispatching segments to classifier service"
        );

        let mut dispatched = DispatchedBatches::default();
        if let Err(e) = self
            .dispatch_batches(tracker, validated, source, &plan, cancel_token, &mut dispatched)
            .await
        {
            dispatched.discard_feature_files();
            return Err(e);
        }

        self.finalize(tracker, validated, &plan, dispatched).await
    }

    async fn dispatch_batches(
        &self,
        tracker: &mut RunTracker,
        validated: &ValidatedRun,
        source: Arc<SourceWaveform>,
        plan: &BatchPlan,
        cancel_token: &CancellationToken,
        dispatched: &mut DispatchedBatches,
    ) -> Result<(), RunError> {
        let ClassifierMode::Service { target, .. } = &validated.mode else {
            return Ok(());
        };
        let run_id = tracker.run_id();

        for (index, chunk) in validated.segments.chunks(plan.batch_size).enumerate() {
            if cancel_token.is_cancelled() {
                info!(run_id, batch = index, "Classification run cancelled by request");
                return Err(RunError::Cancelled);
            }

            let outcome = self
                .dispatcher
                .dispatch(index, chunk, run_id, &validated.recording, Arc::clone(&source), target)
                .await
                .map_err(|source| RunError::Batch { index, source })?;

            debug!(
                run_id,
                batch = index,
                results = outcome.results.len(),
                "Batch dispatched"
            );

            dispatched.batches.push(outcome.results);
            dispatched.metadata.extend(outcome.metadata);
            if let Some(path) = outcome.feature_file {
                dispatched.feature_files.push(path);
            }

            tracker.advance(plan.dispatch_progress(index)).await?;
        }

        Ok(())
    }
}

/// Open the recording once per run on the blocking pool
async fn decode_source(path: &Path) -> Result<Arc<SourceWaveform>, RunError> {
    let path = path.to_path_buf();
    let source = tokio::task::spawn_blocking(move || SourceWaveform::open(&path))
        .await
        .map_err(|e| RunError::Worker(e.to_string()))??;
    Ok(Arc::new(source))
}
