//! batcall-classify library interface
//!
//! Classification run engine plus its HTTP control surface. Exposed as a
//! library for integration testing.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::models::RunStatus;
use crate::services::{RunOrchestrator, RunOutcome};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub orchestrator: Arc<RunOrchestrator>,
    /// Cancellation tokens of runs executing in this process
    pub active_runs: Arc<RwLock<HashMap<i64, CancellationToken>>>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, orchestrator: RunOrchestrator) -> Self {
        Self {
            db,
            orchestrator: Arc::new(orchestrator),
            active_runs: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
        }
    }

    pub async fn is_active(&self, run_id: i64) -> bool {
        self.active_runs.read().await.contains_key(&run_id)
    }
}

/// Spawn the orchestrator for a queued run
///
/// The returned handle resolves to the run's outcome; the HTTP layer drops
/// it, tests await it.
pub async fn start_run(state: &AppState, run_id: i64) -> ApiResult<JoinHandle<RunOutcome>> {
    let run = db::runs::load_run(&state.db, run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Classification run {}", run_id)))?;

    if run.status != RunStatus::Queued {
        return Err(ApiError::Conflict(format!(
            "Classification run {} is {}",
            run_id, run.status
        )));
    }

    let cancel_token = CancellationToken::new();
    {
        let mut active = state.active_runs.write().await;
        if active.contains_key(&run_id) {
            return Err(ApiError::Conflict(format!(
                "Classification run {} is already running",
                run_id
            )));
        }
        active.insert(run_id, cancel_token.clone());
    }

    let orchestrator = Arc::clone(&state.orchestrator);
    let active_runs = Arc::clone(&state.active_runs);
    let handle = tokio::spawn(async move {
        tracing::info!(run_id, "Background classification task started");

        let outcome = orchestrator.execute(run_id, cancel_token).await;
        active_runs.write().await.remove(&run_id);

        match &outcome {
            RunOutcome::Success { message } => {
                tracing::info!(run_id, message = %message, "Background classification task completed")
            }
            RunOutcome::Error { message } => {
                tracing::warn!(run_id, message = %message, "Background classification task failed")
            }
        }
        outcome
    });

    Ok(handle)
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::run_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
