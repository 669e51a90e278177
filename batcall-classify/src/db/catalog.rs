//! Catalog queries: species, calls, recordings, segmentations, segments,
//! classifiers
//!
//! The engine only reads the catalog; the insert helpers exist for seeding
//! (fixtures, demo data).

use batcall_common::db::{Call, Classifier, Recording, Segment, Segmentation};
use batcall_common::Result;
use sqlx::SqlitePool;

/// Segmentation together with the recording it covers
pub async fn load_segmentation(
    pool: &SqlitePool,
    segmentation_id: i64,
) -> Result<Option<(Segmentation, Recording)>> {
    let segmentation = sqlx::query_as::<_, Segmentation>(
        "SELECT id, recording_id, name FROM segmentations WHERE id = ?",
    )
    .bind(segmentation_id)
    .fetch_optional(pool)
    .await?;

    let Some(segmentation) = segmentation else {
        return Ok(None);
    };

    let recording = sqlx::query_as::<_, Recording>(
        "SELECT id, name, wav_path, original_filename, species_id FROM recordings WHERE id = ?",
    )
    .bind(segmentation.recording_id)
    .fetch_optional(pool)
    .await?;

    Ok(recording.map(|recording| (segmentation, recording)))
}

/// Segments of a segmentation in time order
pub async fn load_segments(pool: &SqlitePool, segmentation_id: i64) -> Result<Vec<Segment>> {
    let segments = sqlx::query_as::<_, Segment>(
        r#"
        SELECT id, segmentation_id, onset_sec, offset_sec, task_id
        FROM segments
        WHERE segmentation_id = ?
        ORDER BY onset_sec, id
        "#,
    )
    .bind(segmentation_id)
    .fetch_all(pool)
    .await?;

    Ok(segments)
}

/// Call inventory of a species in definition order
pub async fn load_calls(pool: &SqlitePool, species_id: i64) -> Result<Vec<Call>> {
    let calls = sqlx::query_as::<_, Call>(
        "SELECT id, species_id, short_name, long_name FROM calls WHERE species_id = ? ORDER BY id",
    )
    .bind(species_id)
    .fetch_all(pool)
    .await?;

    Ok(calls)
}

pub async fn load_classifier(pool: &SqlitePool, classifier_id: i64) -> Result<Option<Classifier>> {
    let classifier = sqlx::query_as::<_, Classifier>(
        r#"
        SELECT id, name, service_url, endpoint, model_file, response_format
        FROM classifiers WHERE id = ?
        "#,
    )
    .bind(classifier_id)
    .fetch_optional(pool)
    .await?;

    Ok(classifier)
}

pub async fn find_classifier_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Classifier>> {
    let classifier = sqlx::query_as::<_, Classifier>(
        r#"
        SELECT id, name, service_url, endpoint, model_file, response_format
        FROM classifiers WHERE name = ?
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(classifier)
}

pub async fn insert_species(pool: &SqlitePool, name: &str) -> Result<i64> {
    let id = sqlx::query("INSERT INTO species (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await?
        .last_insert_rowid();
    Ok(id)
}

pub async fn insert_call(pool: &SqlitePool, species_id: i64, short_name: &str) -> Result<i64> {
    let id = sqlx::query("INSERT INTO calls (species_id, short_name) VALUES (?, ?)")
        .bind(species_id)
        .bind(short_name)
        .execute(pool)
        .await?
        .last_insert_rowid();
    Ok(id)
}

pub async fn insert_recording(
    pool: &SqlitePool,
    name: &str,
    wav_path: &str,
    original_filename: Option<&str>,
    species_id: i64,
) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO recordings (name, wav_path, original_filename, species_id) VALUES (?, ?, ?, ?)",
    )
    .bind(name)
    .bind(wav_path)
    .bind(original_filename)
    .bind(species_id)
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn insert_segmentation(pool: &SqlitePool, recording_id: i64, name: &str) -> Result<i64> {
    let id = sqlx::query("INSERT INTO segmentations (recording_id, name) VALUES (?, ?)")
        .bind(recording_id)
        .bind(name)
        .execute(pool)
        .await?
        .last_insert_rowid();
    Ok(id)
}

pub async fn insert_segment(
    pool: &SqlitePool,
    segmentation_id: i64,
    onset_sec: f64,
    offset_sec: f64,
    task_id: Option<i64>,
) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO segments (segmentation_id, onset_sec, offset_sec, task_id) VALUES (?, ?, ?, ?)",
    )
    .bind(segmentation_id)
    .bind(onset_sec)
    .bind(offset_sec)
    .bind(task_id)
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Classifier definition for `insert_classifier`
#[derive(Debug, Clone, Default)]
pub struct NewClassifier<'a> {
    pub name: &'a str,
    pub service_url: Option<&'a str>,
    pub endpoint: Option<&'a str>,
    pub model_file: Option<&'a str>,
}

pub async fn insert_classifier(pool: &SqlitePool, classifier: &NewClassifier<'_>) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO classifiers (name, service_url, endpoint, model_file) VALUES (?, ?, ?, ?)",
    )
    .bind(classifier.name)
    .bind(classifier.service_url)
    .bind(classifier.endpoint)
    .bind(classifier.model_file)
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(id)
}
