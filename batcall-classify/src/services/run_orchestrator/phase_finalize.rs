//! Feature merge and persistence after the last batch

use batcall_common::db::Segment;
use std::collections::HashMap;
use tracing::{info, warn};

use super::phase_dispatch::DispatchedBatches;
use super::phase_validation::ValidatedRun;
use super::{BatchPlan, RunError, RunOrchestrator, RunTracker};
use crate::services::{feature_merger, result_persister};

impl RunOrchestrator {
    /// Merge features, persist every batch in order, complete the run
    pub(super) async fn finalize(
        &self,
        tracker: &mut RunTracker,
        validated: &ValidatedRun,
        plan: &BatchPlan,
        dispatched: DispatchedBatches,
    ) -> Result<String, RunError> {
        let run_id = tracker.run_id();
        let DispatchedBatches {
            batches,
            metadata,
            feature_files,
        } = dispatched;

        let tmp_root = self.context.tmp_root.clone();
        let merged = tokio::task::spawn_blocking(move || {
            feature_merger::merge(&feature_files, &metadata, run_id, &tmp_root)
        })
        .await
        .map_err(|e| RunError::Worker(e.to_string()))?;

        let segments_by_id: HashMap<i64, Segment> = validated
            .segments
            .iter()
            .map(|s| (s.id, s.clone()))
            .collect();

        let mut saved = 0;
        for (index, batch) in batches.iter().enumerate() {
            let persisted = result_persister::persist(
                &self.db,
                batch,
                run_id,
                &segments_by_id,
                &validated.calls,
            )
            .await;

            match persisted {
                Ok(count) => saved += count,
                Err(source) => {
                    if let Some(path) = &merged {
                        if let Err(e) = std::fs::remove_file(path) {
                            warn!(run_id, path = %path.display(), "Failed to remove merged features: {}", e);
                        }
                    }
                    return Err(RunError::Persist { index, source });
                }
            }

            tracker.advance(plan.persist_progress(index)).await?;
        }

        tracker.complete(merged.as_deref()).await?;

        info!(
            run_id,
            saved,
            features = merged.is_some(),
            "Classification results persisted"
        );

        Ok(format!(
            "Classification completed: {} of {} segments classified in {} batches",
            saved, plan.total, plan.num_batches
        ))
    }
}
