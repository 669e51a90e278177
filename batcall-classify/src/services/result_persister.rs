//! Result persister
//!
//! Writes one batch of classified segments inside a single transaction: a
//! result row per segment and a probability row per call of the species.
//! Wire values are percent; stored values are fractions in `[0, 1]`.

use batcall_common::db::{Call, Segment};
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

use super::batch_dispatcher::SegmentResult;
use crate::db::results;
use crate::models::unwrap_singleton;

/// Persistence errors; the batch transaction is rolled back
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Percent wire value → stored fraction
///
/// Missing or non-numeric values count as 0; numeric strings are accepted.
pub fn probability_fraction(value: Option<&Value>) -> f64 {
    let percent = match value.cloned().map(unwrap_singleton) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };

    let fraction = percent / 100.0;
    if fraction.is_nan() {
        return 0.0;
    }
    fraction.clamp(0.0, 1.0)
}

/// Persist one batch; returns the number of results created
pub async fn persist(
    pool: &SqlitePool,
    batch_results: &[SegmentResult],
    run_id: i64,
    segments: &HashMap<i64, Segment>,
    calls: &[Call],
) -> Result<usize, PersistError> {
    let mut tx = pool.begin().await?;
    let mut saved = 0;

    for item in batch_results {
        let Some(segment) = segments.get(&item.segment_id) else {
            warn!(run_id, segment_id = item.segment_id, "Result for unknown segment skipped");
            continue;
        };

        let result_id = results::insert_result(&mut *tx, run_id, segment.id).await?;
        for call in calls {
            let probability =
                probability_fraction(item.record.class_probabilities.get(&call.short_name));
            results::insert_probability(&mut *tx, result_id, call.id, probability).await?;
        }
        saved += 1;
    }

    tx.commit().await?;

    debug!(run_id, saved, calls = calls.len(), "Persisted batch results");
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{catalog, runs};
    use crate::models::FileRecord;
    use crate::services::batch_dispatcher::SegmentMetadata;
    use batcall_common::db::init_memory_database;
    use serde_json::json;

    struct Seeded {
        run_id: i64,
        segments: Vec<Segment>,
        calls: Vec<Call>,
    }

    async fn seed(db: &SqlitePool) -> Seeded {
        let species = catalog::insert_species(db, "Nyctalus noctula").await.unwrap();
        catalog::insert_call(db, species, "a").await.unwrap();
        catalog::insert_call(db, species, "b").await.unwrap();
        let recording = catalog::insert_recording(db, "r", "/r.wav", None, species).await.unwrap();
        let segmentation = catalog::insert_segmentation(db, recording, "auto").await.unwrap();
        catalog::insert_segment(db, segmentation, 0.1, 0.2, None).await.unwrap();
        catalog::insert_segment(db, segmentation, 0.3, 0.4, None).await.unwrap();

        let run = runs::create_run(
            db,
            &runs::NewRun {
                name: "run".to_string(),
                segmentation_id: segmentation,
                classifier_id: None,
            },
        )
        .await
        .unwrap();

        Seeded {
            run_id: run.id,
            segments: catalog::load_segments(db, segmentation).await.unwrap(),
            calls: catalog::load_calls(db, species).await.unwrap(),
        }
    }

    fn result_for(segment: &Segment, a: f64, b: f64) -> SegmentResult {
        SegmentResult {
            segment_id: segment.id,
            record: FileRecord {
                class_probabilities: json!({"a": a, "b": b}).as_object().cloned().unwrap(),
                fields: Default::default(),
            },
            metadata: SegmentMetadata {
                filename: format!("segment_{}.wav", segment.id),
                segment_id: segment.id,
                task_id: segment.task_id,
                start_time: segment.onset_sec,
                end_time: segment.offset_sec,
                recording_name: "r".to_string(),
                source_filename: "r.wav".to_string(),
            },
        }
    }

    fn by_id(segments: &[Segment]) -> HashMap<i64, Segment> {
        segments.iter().map(|s| (s.id, s.clone())).collect()
    }

    #[tokio::test]
    async fn test_persist_batch() {
        let db = init_memory_database().await.unwrap();
        let seeded = seed(&db).await;
        let batch = vec![
            result_for(&seeded.segments[0], 80.0, 20.0),
            result_for(&seeded.segments[1], 30.0, 70.0),
        ];

        let saved = persist(&db, &batch, seeded.run_id, &by_id(&seeded.segments), &seeded.calls)
            .await
            .unwrap();

        assert_eq!(saved, 2);
        assert_eq!(results::count_results(&db, seeded.run_id).await.unwrap(), 2);
        assert_eq!(results::count_probabilities(&db, seeded.run_id).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_persist_rolls_back_whole_batch_on_store_error() {
        let db = init_memory_database().await.unwrap();
        let seeded = seed(&db).await;

        // Known to the run but absent from the segments table
        let orphan = Segment {
            id: 9_999,
            ..seeded.segments[1].clone()
        };
        let mut segments = by_id(&seeded.segments);
        segments.insert(orphan.id, orphan.clone());

        let batch = vec![
            result_for(&seeded.segments[0], 80.0, 20.0),
            result_for(&orphan, 30.0, 70.0),
        ];

        let persisted = persist(&db, &batch, seeded.run_id, &segments, &seeded.calls).await;

        assert!(matches!(persisted, Err(PersistError::Database(_))));
        assert_eq!(results::count_results(&db, seeded.run_id).await.unwrap(), 0);
        assert_eq!(results::count_probabilities(&db, seeded.run_id).await.unwrap(), 0);
    }

    #[test]
    fn test_probability_fraction() {
        assert_eq!(probability_fraction(Some(&json!(80))), 0.8);
        assert_eq!(probability_fraction(Some(&json!(100))), 1.0);
        assert_eq!(probability_fraction(Some(&json!(200))), 1.0);
        assert_eq!(probability_fraction(Some(&json!(-5))), 0.0);
        assert_eq!(probability_fraction(None), 0.0);
    }

    #[test]
    fn test_probability_fraction_shapes() {
        assert_eq!(probability_fraction(Some(&json!([80]))), probability_fraction(Some(&json!(80))));
        assert_eq!(probability_fraction(Some(&json!("25"))), 0.25);
        assert_eq!(probability_fraction(Some(&json!("n/a"))), 0.0);
        assert_eq!(probability_fraction(Some(&json!([1, 2]))), 0.0);
        assert_eq!(probability_fraction(Some(&json!(null))), 0.0);
    }
}
