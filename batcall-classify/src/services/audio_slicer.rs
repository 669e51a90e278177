//! Audio slicing
//!
//! Cuts half-open `[onset, offset)` intervals out of a source recording as
//! mono f32 PCM and writes clips as mono 16-bit WAV files with hound.
//!
//! WAV sources are read on demand: each slice seeks to its first frame and
//! reads only the frames it needs, so long recordings are never held in
//! memory. Other formats are decoded once with symphonia.

use std::path::{Path, PathBuf};
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

/// Audio slicing errors
#[derive(Debug, Error)]
pub enum SliceError {
    /// Source could not be opened or decoded
    #[error("Audio source unavailable: {path}: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },

    /// Interval empty, reversed or outside the source
    #[error("Invalid interval [{onset_sec}, {offset_sec}) for source of {duration_sec:.3}s")]
    InvalidInterval {
        onset_sec: f64,
        offset_sec: f64,
        duration_sec: f64,
    },

    /// Clip file could not be written
    #[error("Failed to write clip {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },
}

#[derive(Debug, Clone)]
enum SourceData {
    /// PCM WAV, read frame ranges from disk
    Wav(hound::WavSpec),
    /// Mono samples decoded up front
    Decoded(Vec<f32>),
}

/// Source recording that can be sliced repeatedly
#[derive(Debug, Clone)]
pub struct SourceWaveform {
    path: PathBuf,
    sample_rate: u32,
    frame_count: usize,
    data: SourceData,
}

impl SourceWaveform {
    /// Open a recording; multichannel audio is averaged to mono when read
    ///
    /// WAV files only have their header read here. Anything hound cannot
    /// parse is decoded in full with symphonia.
    pub fn open(path: &Path) -> Result<Self, SliceError> {
        match hound::WavReader::open(path) {
            Ok(reader) => {
                let spec = reader.spec();
                let frame_count = reader.duration() as usize;
                tracing::debug!(
                    path = %path.display(),
                    sample_rate = spec.sample_rate,
                    channels = spec.channels,
                    frames = frame_count,
                    "Opened WAV source"
                );
                Ok(Self {
                    path: path.to_path_buf(),
                    sample_rate: spec.sample_rate,
                    frame_count,
                    data: SourceData::Wav(spec),
                })
            }
            Err(hound::Error::IoError(e)) => Err(SliceError::SourceUnavailable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
            Err(e) => {
                tracing::debug!(path = %path.display(), "Not a PCM WAV ({}), decoding with symphonia", e);
                Self::decode(path)
            }
        }
    }

    fn decode(path: &Path) -> Result<Self, SliceError> {
        let unavailable = |reason: String| SliceError::SourceUnavailable {
            path: path.to_path_buf(),
            reason,
        };

        let file = std::fs::File::open(path).map_err(|e| unavailable(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| unavailable(format!("unrecognized format: {}", e)))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| unavailable("no audio track".to_string()))?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| unavailable("sample rate unknown".to_string()))?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| unavailable(format!("no decoder: {}", e)))?;

        let mut samples: Vec<f32> = Vec::new();
        let mut interleaved: Option<(SampleBuffer<f32>, SignalSpec, usize)> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(unavailable(format!("error reading packet: {}", e))),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                // Corrupt frame; skip it like players do
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::warn!(path = %path.display(), "Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(unavailable(format!("decode failed: {}", e))),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count().max(1);
            let frames = decoded.capacity();
            let reusable = matches!(
                &interleaved,
                Some((_, buffer_spec, buffer_frames)) if *buffer_spec == spec && *buffer_frames >= frames
            );
            if !reusable {
                interleaved = Some((SampleBuffer::new(frames as u64, spec), spec, frames));
            }
            let Some((buffer, _, _)) = interleaved.as_mut() else {
                continue;
            };
            buffer.copy_interleaved_ref(decoded);

            samples.extend(downmix(buffer.samples(), channels));
        }

        tracing::debug!(
            path = %path.display(),
            sample_rate,
            frames = samples.len(),
            "Decoded source recording"
        );

        Ok(Self::from_samples(path, samples, sample_rate))
    }

    /// Waveform from already-decoded mono samples
    pub fn from_samples(path: impl Into<PathBuf>, samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            path: path.into(),
            sample_rate,
            frame_count: samples.len(),
            data: SourceData::Decoded(samples),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn duration_sec(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count as f64 / self.sample_rate as f64
    }

    /// Mono frames `[start, end)`; `None` when the range leaves the source
    pub fn read_frames(&self, start: usize, end: usize) -> Result<Option<Vec<f32>>, SliceError> {
        if start > end || end > self.frame_count {
            return Ok(None);
        }
        match &self.data {
            SourceData::Decoded(samples) => Ok(samples.get(start..end).map(<[f32]>::to_vec)),
            SourceData::Wav(spec) => self.read_wav_frames(spec, start, end).map(Some),
        }
    }

    fn read_wav_frames(
        &self,
        spec: &hound::WavSpec,
        start: usize,
        end: usize,
    ) -> Result<Vec<f32>, SliceError> {
        let unavailable = |reason: String| SliceError::SourceUnavailable {
            path: self.path.clone(),
            reason,
        };

        let mut reader = hound::WavReader::open(&self.path).map_err(|e| unavailable(e.to_string()))?;
        let first_frame =
            u32::try_from(start).map_err(|_| unavailable(format!("frame {} beyond WAV range", start)))?;
        reader.seek(first_frame).map_err(|e| unavailable(e.to_string()))?;

        let channels = usize::from(spec.channels.max(1));
        let wanted = (end - start) * channels;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .take(wanted)
                .collect::<Result<Vec<f32>, _>>(),
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1_i64 << spec.bits_per_sample.saturating_sub(1)) as f32;
                reader
                    .samples::<i32>()
                    .take(wanted)
                    .map(|sample| sample.map(|value| value as f32 * scale))
                    .collect::<Result<Vec<f32>, _>>()
            }
        }
        .map_err(|e| unavailable(e.to_string()))?;

        Ok(downmix(&interleaved, channels).collect())
    }

    /// Samples of `[onset_sec, offset_sec)`
    pub fn slice(&self, onset_sec: f64, offset_sec: f64) -> Result<Vec<f32>, SliceError> {
        let invalid = || SliceError::InvalidInterval {
            onset_sec,
            offset_sec,
            duration_sec: self.duration_sec(),
        };

        if !onset_sec.is_finite() || !offset_sec.is_finite() || onset_sec < 0.0 {
            return Err(invalid());
        }
        if offset_sec <= onset_sec {
            return Err(invalid());
        }

        let rate = self.sample_rate as f64;
        let start = (onset_sec * rate).round() as usize;
        let end = (offset_sec * rate).round() as usize;

        if end <= start {
            return Err(invalid());
        }
        self.read_frames(start, end)?.ok_or_else(invalid)
    }
}

/// Average interleaved frames to mono
fn downmix(interleaved: &[f32], channels: usize) -> impl Iterator<Item = f32> + '_ {
    interleaved
        .chunks(channels)
        .map(move |frame| frame.iter().sum::<f32>() / channels as f32)
}

/// Open `source_path` and return the samples of `[onset_sec, offset_sec)`
/// with the source's native sample rate
pub fn slice(source_path: &Path, onset_sec: f64, offset_sec: f64) -> Result<(Vec<f32>, u32), SliceError> {
    let source = SourceWaveform::open(source_path)?;
    let samples = source.slice(onset_sec, offset_sec)?;
    Ok((samples, source.sample_rate()))
}

/// Write mono samples as a 16-bit PCM WAV file
pub fn write(samples: &[f32], sample_rate: u32, destination: &Path) -> Result<(), SliceError> {
    let failed = |reason: String| SliceError::WriteFailed {
        path: destination.to_path_buf(),
        reason,
    };

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer =
        hound::WavWriter::create(destination, spec).map_err(|e| failed(e.to_string()))?;
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(value).map_err(|e| failed(e.to_string()))?;
    }
    writer.finalize().map_err(|e| failed(e.to_string()))?;

    Ok(())
}
