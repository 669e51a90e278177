//! Classification run persistence
//!
//! Every status write is guarded by the expected current status in SQL, so a
//! durable row can never move backwards even if two writers race.

use batcall_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::models::{ClassificationRun, RunStatus};

/// Parameters for a new queued run
#[derive(Debug, Clone, Default)]
pub struct NewRun {
    pub name: String,
    pub segmentation_id: i64,
    pub classifier_id: Option<i64>,
}

/// `get_status` answer
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatusReport {
    pub status: RunStatus,
    pub progress: f64,
    pub error_message: Option<String>,
}

const RUN_COLUMNS: &str = "id, name, segmentation_id, classifier_id, status, progress, \
                           error_message, features_file, created_at, updated_at";

/// Insert a queued run and return it
pub async fn create_run(pool: &SqlitePool, new_run: &NewRun) -> Result<ClassificationRun> {
    let now = Utc::now().to_rfc3339();

    let id = sqlx::query(
        r#"
        INSERT INTO classification_runs (
            name, segmentation_id, classifier_id, status, progress, created_at, updated_at
        ) VALUES (?, ?, ?, 'queued', 0.0, ?, ?)
        "#,
    )
    .bind(&new_run.name)
    .bind(new_run.segmentation_id)
    .bind(new_run.classifier_id)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    load_run(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Classification run {} vanished after insert", id)))
}

/// Load a run row
pub async fn load_run(pool: &SqlitePool, run_id: i64) -> Result<Option<ClassificationRun>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM classification_runs WHERE id = ?",
        RUN_COLUMNS
    ))
    .bind(run_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| run_from_row(&row)).transpose()
}

/// Status, progress and error of a run
pub async fn get_status(pool: &SqlitePool, run_id: i64) -> Result<Option<RunStatusReport>> {
    Ok(load_run(pool, run_id).await?.map(|run| RunStatusReport {
        status: run.status,
        progress: run.progress,
        error_message: run.error_message,
    }))
}

/// QUEUED → IN_PROGRESS; false when the run was not queued
pub async fn mark_in_progress(pool: &SqlitePool, run_id: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE classification_runs
        SET status = 'in_progress', progress = 0.0, error_message = NULL, updated_at = ?
        WHERE id = ? AND status = 'queued'
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(run_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Raise progress of an in-progress run; lower values are ignored
pub async fn update_progress(pool: &SqlitePool, run_id: i64, progress: f64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE classification_runs
        SET progress = MAX(progress, ?), updated_at = ?
        WHERE id = ? AND status = 'in_progress'
        "#,
    )
    .bind(progress.clamp(0.0, 100.0))
    .bind(Utc::now().to_rfc3339())
    .bind(run_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// IN_PROGRESS → COMPLETED at 100%, attaching the merged feature table
pub async fn mark_completed(
    pool: &SqlitePool,
    run_id: i64,
    features_file: Option<&Path>,
) -> Result<bool> {
    let features_file = features_file.map(|p| p.display().to_string());

    let result = sqlx::query(
        r#"
        UPDATE classification_runs
        SET status = 'completed', progress = 100.0, error_message = NULL,
            features_file = ?, updated_at = ?
        WHERE id = ? AND status = 'in_progress'
        "#,
    )
    .bind(features_file)
    .bind(Utc::now().to_rfc3339())
    .bind(run_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// QUEUED | IN_PROGRESS → FAILED with a message
pub async fn mark_failed(pool: &SqlitePool, run_id: i64, message: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE classification_runs
        SET status = 'failed', error_message = ?, updated_at = ?
        WHERE id = ? AND status IN ('queued', 'in_progress')
        "#,
    )
    .bind(message)
    .bind(Utc::now().to_rfc3339())
    .bind(run_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Delete a run; results and probabilities cascade
pub async fn delete_run(pool: &SqlitePool, run_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM classification_runs WHERE id = ?")
        .bind(run_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Fail runs left in progress by a previous process
///
/// The worker task of such a run died with its process, so the run can
/// never progress.
pub async fn fail_stale_runs(pool: &SqlitePool) -> Result<usize> {
    let result = sqlx::query(
        r#"
        UPDATE classification_runs
        SET status = 'failed',
            error_message = 'Classification run interrupted by service restart',
            updated_at = ?
        WHERE status = 'in_progress'
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

fn run_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ClassificationRun> {
    let status: String = row.get("status");
    let status = RunStatus::parse(&status)
        .ok_or_else(|| Error::InvalidData(format!("Unknown run status '{}'", status)))?;

    Ok(ClassificationRun {
        id: row.get("id"),
        name: row.get("name"),
        segmentation_id: row.get("segmentation_id"),
        classifier_id: row.get("classifier_id"),
        status,
        progress: row.get("progress"),
        error_message: row.get("error_message"),
        features_file: row.get("features_file"),
        created_at: parse_timestamp(row.get("created_at"))?,
        updated_at: parse_timestamp(row.get("updated_at"))?,
    })
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidData(format!("Failed to parse timestamp '{}': {}", value, e)))
}
