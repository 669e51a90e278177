//! Feature merger
//!
//! Concatenates the per-batch feature tables the classifier service exports,
//! splices in an enrichment block joined from segment metadata by
//! `sound.files`, and writes one table per run.
//!
//! Merging never fails a run: problems are logged and the run completes
//! without (or with a partial) feature artifact.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::batch_dispatcher::SegmentMetadata;

/// Column naming each row's clip
pub const SOUND_FILES_COLUMN: &str = "sound.files";
/// Selection number column written by the service
pub const SELEC_COLUMN: &str = "selec";

/// Columns spliced into the merged table, in order
pub const ENRICHMENT_COLUMNS: [&str; 6] = [
    "task_id",
    "call_start_time",
    "call_end_time",
    "call_duration",
    "recording_name",
    "original_wav_file",
];

const UNKNOWN: &str = "Unknown";
const FALLBACK_POSITION: usize = 2;

pub fn merged_features_path(tmp_root: &Path, run_id: i64) -> PathBuf {
    tmp_root.join(format!("classification_run_{}_features.csv", run_id))
}

/// In-memory feature table
#[derive(Debug, Clone, Default, PartialEq)]
struct FeatureTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl FeatureTable {
    fn read(path: &Path) -> Result<Self, csv::Error> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;

        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let rows = reader
            .records()
            .map(|record| record.map(|r| r.iter().map(str::to_string).collect()))
            .collect::<Result<_, _>>()?;

        Ok(Self { headers, rows })
    }

    /// Append `other`, aligning its cells by column name
    fn append(&mut self, other: FeatureTable) {
        for header in &other.headers {
            if !self.headers.contains(header) {
                self.headers.push(header.clone());
                for row in &mut self.rows {
                    row.push(String::new());
                }
            }
        }

        let positions: Vec<usize> = other
            .headers
            .iter()
            .filter_map(|h| self.headers.iter().position(|own| own == h))
            .collect();

        for row in other.rows {
            let mut aligned = vec![String::new(); self.headers.len()];
            for (cell, &position) in row.into_iter().zip(&positions) {
                aligned[position] = cell;
            }
            self.rows.push(aligned);
        }
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// Position of the enrichment block within `headers`
pub fn enrichment_position(headers: &[String]) -> usize {
    let after = |name: &str| headers.iter().position(|h| h == name).map(|i| i + 1);
    after(SELEC_COLUMN)
        .or_else(|| after(SOUND_FILES_COLUMN))
        .unwrap_or(FALLBACK_POSITION.min(headers.len()))
}

/// Enrichment cells for one clip filename
fn enrichment_cells(filename: Option<&str>, metadata: &HashMap<String, SegmentMetadata>) -> [String; 6] {
    match filename.and_then(|name| metadata.get(name)) {
        Some(meta) => [
            meta.task_id.map(|id| id.to_string()).unwrap_or_default(),
            meta.start_time.to_string(),
            meta.end_time.to_string(),
            (meta.end_time - meta.start_time).to_string(),
            meta.recording_name.clone(),
            meta.source_filename.clone(),
        ],
        None => [
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            UNKNOWN.to_string(),
            UNKNOWN.to_string(),
        ],
    }
}

/// Merge per-batch feature tables into `classification_run_<run_id>_features.csv`
///
/// Returns the merged path, or `None` when there is nothing to merge or the
/// output cannot be written. Per-batch inputs are always deleted.
pub fn merge(
    feature_paths: &[PathBuf],
    metadata: &HashMap<String, SegmentMetadata>,
    run_id: i64,
    tmp_root: &Path,
) -> Option<PathBuf> {
    if feature_paths.is_empty() {
        return None;
    }

    let mut merged: Option<FeatureTable> = None;
    for path in feature_paths {
        match FeatureTable::read(path) {
            Ok(table) => {
                debug!(run_id, path = %path.display(), rows = table.rows.len(), "Read batch features");
                match merged.as_mut() {
                    Some(acc) => acc.append(table),
                    None => merged = Some(table),
                }
            }
            Err(e) => warn!(run_id, path = %path.display(), "Skipping unreadable features file: {}", e),
        }
    }

    let Some(table) = merged else {
        warn!(run_id, "No readable feature files; skipping merge");
        remove_inputs(feature_paths);
        return None;
    };

    let output = merged_features_path(tmp_root, run_id);
    match write_enriched(&table, metadata, &output) {
        Ok(()) => {
            info!(run_id, path = %output.display(), rows = table.rows.len(), "Merged feature tables");
            remove_inputs(feature_paths);
            Some(output)
        }
        Err(e) => {
            warn!(run_id, path = %output.display(), "Failed to write merged features: {}", e);
            remove_inputs(feature_paths);
            None
        }
    }
}

fn write_enriched(
    table: &FeatureTable,
    metadata: &HashMap<String, SegmentMetadata>,
    output: &Path,
) -> Result<(), csv::Error> {
    let position = enrichment_position(&table.headers);
    let sound_files = table.column(SOUND_FILES_COLUMN);

    let mut writer = csv::Writer::from_path(output)?;

    let mut headers: Vec<&str> = table.headers.iter().map(String::as_str).collect();
    headers.splice(position..position, ENRICHMENT_COLUMNS);
    writer.write_record(&headers)?;

    for row in &table.rows {
        let filename = sound_files.and_then(|i| row.get(i)).map(String::as_str);
        if let Some(name) = filename {
            if !metadata.contains_key(name) {
                warn!(filename = %name, "No segment metadata for feature row");
            }
        }

        let mut cells: Vec<String> = row.clone();
        cells.resize(table.headers.len(), String::new());
        cells.splice(position..position, enrichment_cells(filename, metadata));
        writer.write_record(&cells)?;
    }

    writer.flush()?;
    Ok(())
}

fn remove_inputs(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), "Failed to remove batch features file: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn meta(segment_id: i64, start: f64, end: f64) -> SegmentMetadata {
        SegmentMetadata {
            filename: format!("segment_{}.wav", segment_id),
            segment_id,
            task_id: None,
            start_time: start,
            end_time: end,
            recording_name: "Night 1".to_string(),
            source_filename: "N1.wav".to_string(),
        }
    }

    fn read_back(path: &Path) -> FeatureTable {
        FeatureTable::read(path).unwrap()
    }

    #[test]
    fn test_enrichment_position() {
        assert_eq!(enrichment_position(&headers(&["sound.files", "selec", "f1"])), 2);
        assert_eq!(enrichment_position(&headers(&["f0", "sound.files", "f1"])), 2);
        assert_eq!(enrichment_position(&headers(&["selec", "f1", "sound.files"])), 1);
        assert_eq!(enrichment_position(&headers(&["a", "b", "c", "d"])), 2);
        assert_eq!(enrichment_position(&headers(&["a"])), 1);
    }

    #[test]
    fn test_merge_empty_input() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(merge(&[], &HashMap::new(), 1, tmp.path()), None);
    }

    #[test]
    fn test_merge_unknown_filename_enrichment() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("batch_0_1_features.csv");
        std::fs::write(&input, "sound.files,selec,f1\nsegment_9.wav,1,0.5\n").unwrap();

        let merged = merge(&[input.clone()], &HashMap::new(), 1, tmp.path()).unwrap();
        let table = read_back(&merged);

        let row = &table.rows[0];
        assert_eq!(&row[2..6], ["", "", "", ""]);
        assert_eq!(row[6], "Unknown");
        assert_eq!(row[7], "Unknown");
        assert_eq!(row[8], "0.5");
        assert!(!input.exists());
    }

    #[test]
    fn test_merge_skips_unreadable_input() {
        let tmp = TempDir::new().unwrap();
        let good = tmp.path().join("batch_0_1_features.csv");
        std::fs::write(&good, "sound.files,selec\nsegment_1.wav,1\n").unwrap();
        let missing = tmp.path().join("batch_1_1_features.csv");

        let mut metadata = HashMap::new();
        metadata.insert("segment_1.wav".to_string(), meta(1, 0.5, 0.75));

        let merged = merge(&[good, missing], &metadata, 1, tmp.path()).unwrap();
        let table = read_back(&merged);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][3], "0.5");
        assert_eq!(table.rows[0][5], "0.25");
    }

    #[test]
    fn test_merge_aligns_differing_columns() {
        let tmp = TempDir::new().unwrap();
        let first = tmp.path().join("batch_0_1_features.csv");
        let second = tmp.path().join("batch_1_1_features.csv");
        std::fs::write(&first, "sound.files,selec,f1\nsegment_1.wav,1,0.1\n").unwrap();
        std::fs::write(&second, "sound.files,selec,f2\nsegment_2.wav,1,0.2\n").unwrap();

        let merged = merge(&[first, second], &HashMap::new(), 1, tmp.path()).unwrap();
        let table = read_back(&merged);

        assert_eq!(table.headers[8], "f1");
        assert_eq!(table.headers[9], "f2");
        assert_eq!(table.rows[0][9], "");
        assert_eq!(table.rows[1][8], "");
        assert_eq!(table.rows[1][9], "0.2");
    }

    #[test]
    fn test_merge_unwritable_output_removes_inputs() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("batch_0_7_features.csv");
        std::fs::write(&input, "sound.files,selec\nsegment_1.wav,1\n").unwrap();

        // A directory where the merged file would go
        std::fs::create_dir(merged_features_path(tmp.path(), 7)).unwrap();

        assert_eq!(merge(&[input.clone()], &HashMap::new(), 7, tmp.path()), None);
        assert!(!input.exists());
    }

    #[test]
    fn test_merge_all_unreadable() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("batch_0_1_features.csv");
        assert_eq!(merge(&[missing], &HashMap::new(), 1, tmp.path()), None);
        assert!(!merged_features_path(tmp.path(), 1).exists());
    }
}
