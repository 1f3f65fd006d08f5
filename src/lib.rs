//! Mastering-readiness audio metrics: True Peak (oversampled), LUFS/LRA per
//! ITU-R BS.1770-4 / EBU R128, 7-band spectral balance, dynamics, and a
//! target-comparison engine producing a consistent table/issues/score triple.
//!
//! The library consumes an already-decoded stereo buffer ([`DecodedAudio`]);
//! the CLI binary wraps it with a symphonia decoder.

pub mod analysis;
pub mod comparison;
pub mod error;
pub mod output;
pub mod targets;

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use analysis::AnalysisConfig;
use error::{AnalysisError, SegmentationError};
use output::AnalysisReport;
use targets::PlaybackMode;

/// One decoded, normalized stereo buffer. Immutable for the duration of an
/// analysis; nothing derived from it outlives the analysis.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub sample_rate: u32,
    pub duration: f64,
}

impl DecodedAudio {
    pub fn new(left: Vec<f32>, right: Vec<f32>, sample_rate: u32) -> Result<Self, SegmentationError> {
        if sample_rate == 0 {
            return Err(SegmentationError::InvalidSampleRate(sample_rate));
        }
        if left.len() != right.len() {
            return Err(SegmentationError::ChannelLengthMismatch {
                left: left.len(),
                right: right.len(),
            });
        }
        let duration = left.len() as f64 / sample_rate as f64;
        Ok(Self { left, right, sample_rate, duration })
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    pub job_id: Option<String>,
    pub file_name: Option<String>,
    /// Raw target spec in any supported shape; resolved by
    /// [`targets::resolve`].
    pub target_spec: Option<serde_json::Value>,
    pub playback_mode: Option<PlaybackMode>,
    pub config: AnalysisConfig,
}

/// Full pipeline over one decoded buffer: core metrics, target resolution,
/// comparison, report. Segmentation and target-resolution failures are
/// fatal; individual metric failures degrade to null fields with warnings.
pub fn analyze(audio: &DecodedAudio, options: &AnalysisOptions) -> Result<AnalysisReport, AnalysisError> {
    let metrics = analysis::analyze_core(audio, &options.config)?;
    let targets = targets::resolve(options.target_spec.as_ref(), options.playback_mode)?;
    let snapshot = comparison::MeasuredSnapshot::from_core(&metrics);
    let comparison = comparison::compare(&snapshot, &targets);
    Ok(output::build_report(&metrics, comparison, options))
}

/// Same as [`analyze`], bounded by a caller-supplied deadline. The analysis
/// runs on a worker thread; on timeout the caller gets the error while the
/// worker finishes (and is discarded) in the background.
pub fn analyze_with_timeout(
    audio: DecodedAudio,
    options: AnalysisOptions,
    timeout: Duration,
) -> Result<AnalysisReport, AnalysisError> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(analyze(&audio, &options));
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(AnalysisError::Timeout(timeout.as_millis() as u64)),
    }
}
