//! Prerequisite checks before any batch is dispatched

use batcall_common::db::{Call, Classifier, Recording, Segment};
use std::path::PathBuf;
use tracing::{debug, info};

use super::{RunError, RunOrchestrator};
use crate::db::catalog;
use crate::models::ClassificationRun;
use crate::services::batch_dispatcher::ClassifierTarget;

/// Everything a run needs once validation passed
#[derive(Debug, Clone)]
pub struct ValidatedRun {
    pub classifier: Classifier,
    pub recording: Recording,
    pub segments: Vec<Segment>,
    pub calls: Vec<Call>,
    pub mode: ClassifierMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierMode {
    /// Uniform in-process results
    Dummy,
    /// External classifier service
    Service {
        source_path: PathBuf,
        target: ClassifierTarget,
    },
}

impl RunOrchestrator {
    pub(super) async fn validate(&self, run: &ClassificationRun) -> Result<ValidatedRun, RunError> {
        let classifier = self.select_classifier(run.classifier_id).await?;
        debug!(run_id = run.id, classifier = %classifier.name, "Classifier selected");

        let (_segmentation, recording) = catalog::load_segmentation(&self.db, run.segmentation_id)
            .await?
            .ok_or(RunError::SegmentationNotFound(run.segmentation_id))?;

        if classifier.is_dummy() {
            info!(run_id = run.id, classifier = %classifier.name, "Using dummy classifier");
            let (segments, calls) = self.load_inventory(run, &recording).await?;
            return Ok(ValidatedRun {
                classifier,
                recording,
                segments,
                calls,
                mode: ClassifierMode::Dummy,
            });
        }

        let source_path = self.context.resolve_path(&recording.wav_path);
        if !source_path.is_file() {
            return Err(RunError::SourceMissing(source_path));
        }

        let service_url = classifier.service_url.clone().unwrap_or_default();
        self.client
            .ping(&service_url)
            .await
            .map_err(|e| RunError::ServiceUnreachable(e.to_string()))?;

        let (segments, calls) = self.load_inventory(run, &recording).await?;

        let model_file = classifier
            .model_file
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| RunError::NoModel(classifier.name.clone()))?;
        let local_model = self.context.resolve_path(model_file);
        if !local_model.is_file() {
            return Err(RunError::ModelMissing(local_model));
        }

        let endpoint_url = classifier
            .endpoint_url()
            .ok_or_else(|| RunError::ServiceUnreachable("no service URL".to_string()))?;
        let target = ClassifierTarget {
            endpoint_url,
            remote_model_path: self.context.path_mapping.to_remote(&local_model),
        };

        Ok(ValidatedRun {
            classifier,
            recording,
            segments,
            calls,
            mode: ClassifierMode::Service {
                source_path,
                target,
            },
        })
    }

    /// Explicit classifier, else the first configured default present
    pub(super) async fn select_classifier(
        &self,
        classifier_id: Option<i64>,
    ) -> Result<Classifier, RunError> {
        if let Some(id) = classifier_id {
            return catalog::load_classifier(&self.db, id)
                .await?
                .ok_or(RunError::ClassifierNotFound(id));
        }

        for name in &self.context.default_classifier_names {
            if let Some(classifier) = catalog::find_classifier_by_name(&self.db, name).await? {
                return Ok(classifier);
            }
        }
        Err(RunError::NoClassifier)
    }

    /// Segments of the run and calls of the recording's species, both non-empty
    async fn load_inventory(
        &self,
        run: &ClassificationRun,
        recording: &Recording,
    ) -> Result<(Vec<Segment>, Vec<Call>), RunError> {
        let segments = catalog::load_segments(&self.db, run.segmentation_id).await?;
        if segments.is_empty() {
            return Err(RunError::NoSegments(run.segmentation_id));
        }

        let calls = catalog::load_calls(&self.db, recording.species_id).await?;
        if calls.is_empty() {
            return Err(RunError::NoCalls(recording.species_id));
        }

        Ok((segments, calls))
    }
}
