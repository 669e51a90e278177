//! Row models shared by the batcall crates
//!
//! These mirror the catalog tables the classification engine reads. Runs,
//! results and probabilities are owned by the classify crate.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Species owning a call inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Species {
    pub id: i64,
    pub name: String,
}

/// One call class of a species
///
/// `short_name` is the key the classifier service uses for probabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Call {
    pub id: i64,
    pub species_id: i64,
    pub short_name: String,
    pub long_name: Option<String>,
}

/// Source audio file bound to a species
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Recording {
    pub id: i64,
    /// Display name
    pub name: String,
    /// Path of the stored waveform on this host
    pub wav_path: String,
    /// Filename as uploaded by the user
    pub original_filename: Option<String>,
    pub species_id: i64,
}

impl Recording {
    /// Original filename, falling back to the stored file's name
    pub fn source_filename(&self) -> String {
        self.original_filename.clone().unwrap_or_else(|| {
            std::path::Path::new(&self.wav_path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.wav_path.clone())
        })
    }
}

/// Ordered set of segments over one recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Segmentation {
    pub id: i64,
    pub recording_id: i64,
    pub name: String,
}

/// Time interval `[onset_sec, offset_sec)` within a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Segment {
    pub id: i64,
    pub segmentation_id: i64,
    pub onset_sec: f64,
    pub offset_sec: f64,
    /// Annotation task this segment belongs to, if any
    pub task_id: Option<i64>,
}

impl Segment {
    pub fn duration_sec(&self) -> f64 {
        self.offset_sec - self.onset_sec
    }
}

/// Classifier configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Classifier {
    pub id: i64,
    pub name: String,
    /// Base URL of the external service; `None` selects the in-process dummy
    pub service_url: Option<String>,
    /// Path suffix appended to `service_url` for batch requests
    pub endpoint: Option<String>,
    /// Model file on this host, mapped to the service's view before sending
    pub model_file: Option<String>,
    pub response_format: String,
}

impl Classifier {
    /// Name reserved for the in-process uniform classifier
    pub const DUMMY_NAME: &'static str = "Dummy";

    /// True when runs must take the in-process uniform path
    pub fn is_dummy(&self) -> bool {
        let no_service = self
            .service_url
            .as_deref()
            .map(|url| url.trim().is_empty())
            .unwrap_or(true);
        no_service || self.name.eq_ignore_ascii_case(Self::DUMMY_NAME)
    }

    /// `service_url` + `endpoint`, without doubled slashes
    pub fn endpoint_url(&self) -> Option<String> {
        let base = self.service_url.as_deref()?.trim_end_matches('/');
        let endpoint = self.endpoint.as_deref().unwrap_or("");
        if endpoint.is_empty() {
            return Some(base.to_string());
        }
        Some(format!("{}/{}", base, endpoint.trim_start_matches('/')))
    }
}
