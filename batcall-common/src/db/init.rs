//! Database initialization
//!
//! Opens (or creates) the shared SQLite database and idempotently creates
//! every table the classification engine reads or writes.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Open the database file, creating it and its schema when missing
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pragmas are per connection, so they go on the connect options
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the full schema
///
/// The connection is never recycled; dropping it would drop the database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_species_table(pool).await?;
    create_calls_table(pool).await?;
    create_recordings_table(pool).await?;
    create_segmentations_table(pool).await?;
    create_segments_table(pool).await?;
    create_classifiers_table(pool).await?;
    create_classification_runs_table(pool).await?;
    create_classification_results_table(pool).await?;
    create_call_probabilities_table(pool).await?;

    Ok(())
}

async fn create_species_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS species (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_calls_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS calls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            species_id INTEGER NOT NULL REFERENCES species(id) ON DELETE CASCADE,
            short_name TEXT NOT NULL,
            long_name TEXT,
            UNIQUE (species_id, short_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_recordings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recordings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            wav_path TEXT NOT NULL,
            original_filename TEXT,
            species_id INTEGER NOT NULL REFERENCES species(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_segmentations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS segmentations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recording_id INTEGER NOT NULL REFERENCES recordings(id) ON DELETE CASCADE,
            name TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_segments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS segments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            segmentation_id INTEGER NOT NULL REFERENCES segmentations(id) ON DELETE CASCADE,
            onset_sec REAL NOT NULL,
            offset_sec REAL NOT NULL,
            task_id INTEGER,
            CHECK (onset_sec < offset_sec)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_segments_segmentation ON segments(segmentation_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_classifiers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classifiers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            service_url TEXT,
            endpoint TEXT,
            model_file TEXT,
            response_format TEXT NOT NULL DEFAULT 'full_probability'
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_classification_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classification_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL DEFAULT '',
            segmentation_id INTEGER NOT NULL REFERENCES segmentations(id) ON DELETE CASCADE,
            classifier_id INTEGER REFERENCES classifiers(id) ON DELETE SET NULL,
            status TEXT NOT NULL DEFAULT 'queued'
                CHECK (status IN ('queued', 'in_progress', 'completed', 'failed')),
            progress REAL NOT NULL DEFAULT 0.0,
            error_message TEXT,
            features_file TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_classification_results_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classification_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL REFERENCES classification_runs(id) ON DELETE CASCADE,
            segment_id INTEGER NOT NULL REFERENCES segments(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            UNIQUE (run_id, segment_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_results_run ON classification_results(run_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_call_probabilities_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS call_probabilities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            result_id INTEGER NOT NULL REFERENCES classification_results(id) ON DELETE CASCADE,
            call_id INTEGER NOT NULL REFERENCES calls(id) ON DELETE CASCADE,
            probability REAL NOT NULL CHECK (probability >= 0.0 AND probability <= 1.0),
            UNIQUE (result_id, call_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
