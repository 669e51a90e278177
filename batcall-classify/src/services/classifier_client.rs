//! Classifier service client
//!
//! Talks to the external analytics service over HTTP:
//! - `GET {service_url}{ping_path}` liveness probe
//! - `POST {service_url}{endpoint}` with a form-encoded batch request
//!
//! Response envelopes are normalized through [`crate::models::wire`].

use batcall_common::config::ClassifierServiceConfig;
use serde::Serialize;
use serde_json::Map;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::models::{FileRecord, ServiceEnvelope};

const USER_AGENT: &str = concat!("batcall-classify/", env!("CARGO_PKG_VERSION"));

/// Classifier service errors
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Network failure or timeout
    #[error("Failed to reach classifier service: {0}")]
    Transport(String),

    /// Service answered with a status other than 200
    #[error("Classifier service error (HTTP {status}): {body}")]
    HttpNon200 { status: u16, body: String },

    /// Envelope status was not "success"
    #[error("Classifier reported an error: {0}")]
    ClassifierReported(String),

    /// Body was not the expected JSON envelope
    #[error("Unexpected classifier response: {0}")]
    ProtocolShape(String),
}

/// Form body of a batch request; paths are in the service's view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifyRequest {
    pub wav_folder: String,
    pub model_path: String,
    pub export_features_path: String,
}

/// HTTP client for the classifier service
#[derive(Debug, Clone)]
pub struct ClassifierClient {
    http_client: reqwest::Client,
    ping_path: String,
    ping_timeout: Duration,
}

impl ClassifierClient {
    pub fn new(config: &ClassifierServiceConfig) -> Result<Self, ClassifierError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            ping_path: config.ping_path.clone(),
            ping_timeout: Duration::from_secs(config.ping_timeout_secs),
        })
    }

    /// Liveness probe; any 2xx answer is healthy
    pub async fn ping(&self, service_url: &str) -> Result<(), ClassifierError> {
        let url = format!(
            "{}/{}",
            service_url.trim_end_matches('/'),
            self.ping_path.trim_start_matches('/')
        );

        let response = self
            .http_client
            .get(&url)
            .timeout(self.ping_timeout)
            .send()
            .await
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::HttpNon200 {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(url = %url, "Classifier service is alive");
        Ok(())
    }

    /// Submit one batch and return its normalized per-file records
    pub async fn classify(
        &self,
        endpoint_url: &str,
        request: &ClassifyRequest,
    ) -> Result<BTreeMap<String, FileRecord>, ClassifierError> {
        let response = self
            .http_client
            .post(endpoint_url)
            .form(request)
            .send()
            .await
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;

        if status != reqwest::StatusCode::OK {
            return Err(ClassifierError::HttpNon200 {
                status: status.as_u16(),
                body,
            });
        }

        parse_envelope(&body)
    }
}

/// Parse and validate a batch response body
pub fn parse_envelope(body: &str) -> Result<BTreeMap<String, FileRecord>, ClassifierError> {
    let envelope: ServiceEnvelope = serde_json::from_str(body)
        .map_err(|e| ClassifierError::ProtocolShape(format!("invalid JSON: {}", e)))?;

    if !envelope.is_success() {
        return Err(ClassifierError::ClassifierReported(envelope.failure_message()));
    }

    let file_results: Map<_, _> = envelope
        .file_results()
        .ok_or_else(|| ClassifierError::ProtocolShape("missing file_results".to_string()))?;

    file_results
        .into_iter()
        .map(|(filename, value)| {
            FileRecord::from_wire(value)
                .map(|record| (filename.clone(), record))
                .ok_or_else(|| {
                    ClassifierError::ProtocolShape(format!(
                        "file result for '{}' is not an object",
                        filename
                    ))
                })
        })
        .collect()
}
