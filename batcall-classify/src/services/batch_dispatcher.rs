//! Batch dispatcher
//!
//! One batch = one directory of clips + one request to the classifier
//! service. The directory lives at `<tmp>/batch_<i>_<run_id>/` and is owned by
//! a [`BatchDirectory`] guard, so it is gone after every exit path.

use batcall_common::db::{Recording, Segment};
use batcall_common::PathMapping;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::audio_slicer::{self, SliceError, SourceWaveform};
use super::classifier_client::{ClassifierClient, ClassifierError, ClassifyRequest};
use crate::models::FileRecord;

/// Dispatcher errors
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Audio(#[from] SliceError),

    #[error("Batch directory error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    /// Blocking clip writer panicked or was cancelled
    #[error("Clip writer failed: {0}")]
    Worker(String),
}

/// What the merger needs to know about a clip
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentMetadata {
    pub filename: String,
    pub segment_id: i64,
    pub task_id: Option<i64>,
    pub start_time: f64,
    pub end_time: f64,
    pub recording_name: String,
    pub source_filename: String,
}

impl SegmentMetadata {
    pub fn for_segment(segment: &Segment, recording: &Recording) -> Self {
        Self {
            filename: clip_filename(segment.id),
            segment_id: segment.id,
            task_id: segment.task_id,
            start_time: segment.onset_sec,
            end_time: segment.offset_sec,
            recording_name: recording.name.clone(),
            source_filename: recording.source_filename(),
        }
    }
}

/// One classified segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentResult {
    pub segment_id: i64,
    pub record: FileRecord,
    pub metadata: SegmentMetadata,
}

/// Output of one batch
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// In segment order
    pub results: Vec<SegmentResult>,
    /// Keyed by clip filename
    pub metadata: HashMap<String, SegmentMetadata>,
    pub feature_file: Option<PathBuf>,
}

/// Where and with which model a batch is classified
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierTarget {
    pub endpoint_url: String,
    /// Model path as the service sees it
    pub remote_model_path: PathBuf,
}

pub fn clip_filename(segment_id: i64) -> String {
    format!("segment_{}.wav", segment_id)
}

pub fn batch_dir_path(tmp_root: &Path, batch_index: usize, run_id: i64) -> PathBuf {
    tmp_root.join(format!("batch_{}_{}", batch_index, run_id))
}

pub fn batch_features_path(tmp_root: &Path, batch_index: usize, run_id: i64) -> PathBuf {
    tmp_root.join(format!("batch_{}_{}_features.csv", batch_index, run_id))
}

/// Scoped batch working directory, removed on drop
#[derive(Debug)]
pub struct BatchDirectory {
    path: PathBuf,
}

impl BatchDirectory {
    /// Create the directory, replacing a leftover from an earlier attempt
    pub fn create(path: PathBuf) -> io::Result<Self> {
        if path.exists() {
            warn!(path = %path.display(), "Removing stale batch directory");
            std::fs::remove_dir_all(&path)?;
        }
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BatchDirectory {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed batch directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), "Failed to remove batch directory: {}", e),
        }
    }
}

/// Slices, ships and collects batches
#[derive(Debug, Clone)]
pub struct BatchDispatcher {
    client: ClassifierClient,
    tmp_root: PathBuf,
    path_mapping: PathMapping,
}

impl BatchDispatcher {
    pub fn new(client: ClassifierClient, tmp_root: PathBuf, path_mapping: PathMapping) -> Self {
        Self {
            client,
            tmp_root,
            path_mapping,
        }
    }

    /// Classify one batch of segments
    pub async fn dispatch(
        &self,
        batch_index: usize,
        segments: &[Segment],
        run_id: i64,
        recording: &Recording,
        source: Arc<SourceWaveform>,
        target: &ClassifierTarget,
    ) -> Result<BatchOutcome, DispatchError> {
        let features_path = batch_features_path(&self.tmp_root, batch_index, run_id);

        let outcome = self
            .dispatch_inner(batch_index, segments, run_id, recording, source, target, &features_path)
            .await;

        if outcome.is_err() && features_path.exists() {
            if let Err(e) = std::fs::remove_file(&features_path) {
                warn!(path = %features_path.display(), "Failed to remove features of failed batch: {}", e);
            }
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_inner(
        &self,
        batch_index: usize,
        segments: &[Segment],
        run_id: i64,
        recording: &Recording,
        source: Arc<SourceWaveform>,
        target: &ClassifierTarget,
        features_path: &Path,
    ) -> Result<BatchOutcome, DispatchError> {
        let batch_dir = BatchDirectory::create(batch_dir_path(&self.tmp_root, batch_index, run_id))?;

        let metadata = write_clips(batch_dir.path(), segments, recording, source).await?;

        let request = ClassifyRequest {
            wav_folder: self.path_mapping.to_remote(batch_dir.path()).display().to_string(),
            model_path: target.remote_model_path.display().to_string(),
            export_features_path: self.path_mapping.to_remote(features_path).display().to_string(),
        };

        debug!(
            run_id,
            batch = batch_index,
            clips = metadata.len(),
            wav_folder = %request.wav_folder,
            "Submitting batch to classifier"
        );

        let mut records = self.client.classify(&target.endpoint_url, &request).await?;

        let mut results = Vec::with_capacity(segments.len());
        for segment in segments {
            let filename = clip_filename(segment.id);
            let Some(meta) = metadata.get(&filename) else {
                continue;
            };
            let Some(record) = records.remove(&filename) else {
                warn!(run_id, batch = batch_index, segment_id = segment.id, "No classifier result for clip");
                continue;
            };
            results.push(SegmentResult {
                segment_id: segment.id,
                record,
                metadata: meta.clone(),
            });
        }

        for filename in records.keys() {
            warn!(run_id, batch = batch_index, filename = %filename, "Dropping result for unknown clip");
        }

        let feature_file = features_path.exists().then(|| features_path.to_path_buf());

        debug!(
            run_id,
            batch = batch_index,
            results = results.len(),
            has_features = feature_file.is_some(),
            "Batch classified"
        );

        Ok(BatchOutcome {
            results,
            metadata,
            feature_file,
        })
    }
}

/// Write every segment's clip into `dir`; returns metadata by filename
async fn write_clips(
    dir: &Path,
    segments: &[Segment],
    recording: &Recording,
    source: Arc<SourceWaveform>,
) -> Result<HashMap<String, SegmentMetadata>, DispatchError> {
    let dir = dir.to_path_buf();
    let segments = segments.to_vec();
    let recording = recording.clone();

    tokio::task::spawn_blocking(move || {
        let mut metadata = HashMap::with_capacity(segments.len());
        for segment in &segments {
            let samples = source.slice(segment.onset_sec, segment.offset_sec)?;
            let meta = SegmentMetadata::for_segment(segment, &recording);
            audio_slicer::write(&samples, source.sample_rate(), &dir.join(&meta.filename))?;
            metadata.insert(meta.filename.clone(), meta);
        }
        Ok::<_, DispatchError>(metadata)
    })
    .await
    .map_err(|e| DispatchError::Worker(e.to_string()))?
}
