//! Run control API handlers
//!
//! POST /runs, POST /runs/:id/start, GET /runs/:id/status,
//! POST /runs/:id/cancel, DELETE /runs/:id

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{catalog, results, runs};
use crate::error::{ApiError, ApiResult};
use crate::models::{ClassificationRun, RunStatus};
use crate::AppState;

const CANCELLED_MESSAGE: &str = "Classification run cancelled";

/// POST /runs request
#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    /// Omitted → "Segmentation <id> classification"
    #[serde(default)]
    pub name: Option<String>,
    pub segmentation_id: i64,
    /// Omitted → configured default classifier
    #[serde(default)]
    pub classifier_id: Option<i64>,
}

/// POST /runs/:id/start response
#[derive(Debug, Serialize)]
pub struct StartRunResponse {
    pub run_id: i64,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// GET /runs/:id/status response
#[derive(Debug, Serialize)]
pub struct RunStatusResponse {
    pub run_id: i64,
    pub status: RunStatus,
    pub progress: f64,
    pub error_message: Option<String>,
    pub features_file: Option<String>,
    pub result_count: i64,
    /// Executing in this process right now
    pub active: bool,
}

/// POST /runs/:id/cancel response
#[derive(Debug, Serialize)]
pub struct CancelRunResponse {
    pub run_id: i64,
    /// True when a running task was signalled; it stops at the next batch
    pub signalled: bool,
    pub status: RunStatus,
}

/// POST /runs
pub async fn create_run(
    State(state): State<AppState>,
    Json(request): Json<CreateRunRequest>,
) -> ApiResult<(StatusCode, Json<ClassificationRun>)> {
    if request.segmentation_id <= 0 {
        return Err(ApiError::BadRequest(format!(
            "Invalid segmentation id: {}",
            request.segmentation_id
        )));
    }
    if matches!(&request.name, Some(name) if name.trim().is_empty()) {
        return Err(ApiError::BadRequest("Run name must not be blank".to_string()));
    }

    if catalog::load_segmentation(&state.db, request.segmentation_id)
        .await?
        .is_none()
    {
        return Err(ApiError::NotFound(format!(
            "Segmentation {}",
            request.segmentation_id
        )));
    }

    if let Some(classifier_id) = request.classifier_id {
        if catalog::load_classifier(&state.db, classifier_id).await?.is_none() {
            return Err(ApiError::NotFound(format!("Classifier {}", classifier_id)));
        }
    }

    let name = request
        .name
        .unwrap_or_else(|| format!("Segmentation {} classification", request.segmentation_id));

    let run = runs::create_run(
        &state.db,
        &runs::NewRun {
            name,
            segmentation_id: request.segmentation_id,
            classifier_id: request.classifier_id,
        },
    )
    .await?;

    tracing::info!(run_id = run.id, segmentation_id = run.segmentation_id, "Classification run created");

    Ok((StatusCode::CREATED, Json(run)))
}

/// POST /runs/:id/start
///
/// Spawns the run in the background; poll the status endpoint for progress.
pub async fn start_run(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> ApiResult<(StatusCode, Json<StartRunResponse>)> {
    crate::start_run(&state, run_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartRunResponse {
            run_id,
            started_at: chrono::Utc::now(),
        }),
    ))
}

/// GET /runs/:id/status
pub async fn get_run_status(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> ApiResult<Json<RunStatusResponse>> {
    let run = load_existing(&state, run_id).await?;
    let result_count = results::count_results(&state.db, run_id).await?;

    Ok(Json(RunStatusResponse {
        run_id,
        status: run.status,
        progress: run.progress,
        error_message: run.error_message,
        features_file: run.features_file,
        result_count,
        active: state.is_active(run_id).await,
    }))
}

/// POST /runs/:id/cancel
///
/// Running runs are signalled and fail at their next batch boundary; queued
/// runs fail immediately.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> ApiResult<Json<CancelRunResponse>> {
    if let Some(token) = state.active_runs.read().await.get(&run_id) {
        token.cancel();
        tracing::info!(run_id, "Cancellation requested");
        return Ok(Json(CancelRunResponse {
            run_id,
            signalled: true,
            status: RunStatus::InProgress,
        }));
    }

    let run = load_existing(&state, run_id).await?;
    if run.status.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Classification run {} is already {}",
            run_id, run.status
        )));
    }

    runs::mark_failed(&state.db, run_id, CANCELLED_MESSAGE).await?;
    tracing::info!(run_id, "Idle classification run cancelled");

    Ok(Json(CancelRunResponse {
        run_id,
        signalled: false,
        status: RunStatus::Failed,
    }))
}

/// DELETE /runs/:id
///
/// Removes the run, its results and its merged feature table.
pub async fn delete_run(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> ApiResult<StatusCode> {
    if state.is_active(run_id).await {
        return Err(ApiError::Conflict(format!(
            "Classification run {} is still running",
            run_id
        )));
    }

    let run = load_existing(&state, run_id).await?;
    if let Some(features_file) = &run.features_file {
        match std::fs::remove_file(features_file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(run_id, path = %features_file, "Failed to remove features file: {}", e),
        }
    }

    runs::delete_run(&state.db, run_id).await?;
    tracing::info!(run_id, "Classification run deleted");

    Ok(StatusCode::NO_CONTENT)
}

async fn load_existing(state: &AppState, run_id: i64) -> ApiResult<ClassificationRun> {
    runs::load_run(&state.db, run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Classification run {}", run_id)))
}

/// Build run control routes
pub fn run_routes() -> Router<AppState> {
    Router::new()
        .route("/runs", post(create_run))
        .route("/runs/:id", delete(delete_run))
        .route("/runs/:id/start", post(start_run))
        .route("/runs/:id/status", get(get_run_status))
        .route("/runs/:id/cancel", post(cancel_run))
}
