//! In-process uniform classifier
//!
//! Stands in for the external service when a classifier has no service URL:
//! every segment gets `100 / K` percent for each of the K calls. Results flow
//! through the same persister as real batches.

use batcall_common::db::{Call, Recording, Segment};

use super::batch_dispatcher::{SegmentMetadata, SegmentResult};
use crate::models::FileRecord;

/// Uniform results for `segments`, in segment order
pub fn classify(segments: &[Segment], calls: &[Call], recording: &Recording) -> Vec<SegmentResult> {
    let percent = if calls.is_empty() {
        0.0
    } else {
        100.0 / calls.len() as f64
    };

    segments
        .iter()
        .map(|segment| SegmentResult {
            segment_id: segment.id,
            record: FileRecord::uniform(calls.iter().map(|c| c.short_name.as_str()), percent),
            metadata: SegmentMetadata::for_segment(segment, recording),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::result_persister::probability_fraction;

    #[test]
    fn test_uniform_distribution() {
        let calls: Vec<Call> = ["a", "b", "c"]
            .iter()
            .enumerate()
            .map(|(i, name)| Call {
                id: i as i64 + 1,
                species_id: 1,
                short_name: name.to_string(),
                long_name: None,
            })
            .collect();
        let segments = vec![Segment {
            id: 4,
            segmentation_id: 1,
            onset_sec: 0.0,
            offset_sec: 0.1,
            task_id: None,
        }];
        let recording = Recording {
            id: 1,
            name: "r".to_string(),
            wav_path: "/r.wav".to_string(),
            original_filename: None,
            species_id: 1,
        };

        let results = classify(&segments, &calls, &recording);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.filename, "segment_4.wav");
        for call in &calls {
            let fraction =
                probability_fraction(results[0].record.class_probabilities.get(&call.short_name));
            assert!((fraction - 1.0 / 3.0).abs() < 1e-12);
        }
    }
}
