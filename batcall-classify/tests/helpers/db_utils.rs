//! Database test utilities

use batcall_classify::db::{catalog, runs};
use batcall_classify::services::EngineContext;
use batcall_common::config::ClassifierServiceConfig;
use batcall_common::PathMapping;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};

/// Create a file-backed test database inside `dir`
pub async fn create_test_db(dir: &Path) -> SqlitePool {
    batcall_common::db::init_database(&dir.join("test.db"))
        .await
        .expect("Failed to create test database")
}

/// Engine context rooted at `root` with an identity path mapping
pub fn test_context(root: &Path) -> EngineContext {
    let tmp_root = root.join("tmp");
    std::fs::create_dir_all(&tmp_root).expect("Failed to create tmp root");

    EngineContext {
        root_folder: root.to_path_buf(),
        tmp_root: tmp_root.clone(),
        path_mapping: PathMapping::identity(tmp_root),
        classifier: ClassifierServiceConfig {
            request_timeout_secs: 10,
            ping_path: "/ping".to_string(),
            ping_timeout_secs: 5,
        },
        default_classifier_names: vec!["BatClassifier".to_string(), "Dummy".to_string()],
    }
}

/// What to seed
#[derive(Debug, Clone)]
pub struct FixtureSpec<'a> {
    pub wav_path: &'a Path,
    pub calls: &'a [&'a str],
    pub segments: &'a [(f64, f64)],
    /// `None` seeds a dummy classifier
    pub service_url: Option<&'a str>,
    pub model_file: Option<&'a str>,
}

/// Ids of the seeded rows
#[derive(Debug, Clone)]
pub struct Fixture {
    pub species_id: i64,
    pub call_ids: Vec<i64>,
    pub recording_id: i64,
    pub segmentation_id: i64,
    pub segment_ids: Vec<i64>,
    pub classifier_id: i64,
    pub run_id: i64,
}

/// Seed species, calls, recording, segments, classifier and a queued run
///
/// Repeated seeding in one database suffixes the unique names.
pub async fn seed_fixture(db: &SqlitePool, spec: &FixtureSpec<'_>) -> Fixture {
    let seeded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM species")
        .fetch_one(db)
        .await
        .unwrap();
    let suffix = |base: &str| {
        if seeded == 0 {
            base.to_string()
        } else {
            format!("{} {}", base, seeded + 1)
        }
    };

    let species_id = catalog::insert_species(db, &suffix("Myotis myotis")).await.unwrap();

    let mut call_ids = Vec::new();
    for name in spec.calls {
        call_ids.push(catalog::insert_call(db, species_id, name).await.unwrap());
    }

    let recording_id = catalog::insert_recording(
        db,
        "Night survey",
        &spec.wav_path.display().to_string(),
        Some("survey_2023-06-01.wav"),
        species_id,
    )
    .await
    .unwrap();

    let segmentation_id = catalog::insert_segmentation(db, recording_id, "auto").await.unwrap();

    let mut segment_ids = Vec::new();
    for (i, (onset, offset)) in spec.segments.iter().enumerate() {
        let id = catalog::insert_segment(db, segmentation_id, *onset, *offset, Some(100 + i as i64))
            .await
            .unwrap();
        segment_ids.push(id);
    }

    let name = suffix(if spec.service_url.is_some() { "BatClassifier" } else { "Dummy" });
    let classifier_id = catalog::insert_classifier(
        db,
        &catalog::NewClassifier {
            name: &name,
            service_url: spec.service_url,
            endpoint: spec.service_url.map(|_| "/classify"),
            model_file: spec.model_file,
        },
    )
    .await
    .unwrap();

    let run = runs::create_run(
        db,
        &runs::NewRun {
            name: "test run".to_string(),
            segmentation_id,
            classifier_id: Some(classifier_id),
        },
    )
    .await
    .unwrap();

    Fixture {
        species_id,
        call_ids,
        recording_id,
        segmentation_id,
        segment_ids,
        classifier_id,
        run_id: run.id,
    }
}

/// Write a placeholder model file and return its path
pub fn create_model_file(root: &Path) -> PathBuf {
    let dir = root.join("models");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("bat.model");
    std::fs::write(&path, b"model").unwrap();
    path
}
