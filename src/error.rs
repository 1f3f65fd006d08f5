use serde::Serialize;
use thiserror::Error;

/// Pipeline stage an error originated from. Serialized with the error so the
/// job system can classify retryable vs. fatal failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Decode,
    Segmentation,
    CoreMetrics,
    OutputScoring,
}

#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("channel length mismatch: left={left} right={right}")]
    ChannelLengthMismatch { left: usize, right: usize },

    #[error("non-positive sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("empty audio buffer")]
    EmptyBuffer,
}

/// Per-metric computation failure. The orchestrator converts these into null
/// result fields unless strict mode is enabled.
#[derive(Debug, Error)]
#[error("{metric}: {message}")]
pub struct MetricComputationError {
    pub metric: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum TargetsResolutionError {
    #[error("no usable target source supplied (no spec and no playback mode)")]
    NoSource,

    #[error("unrecognized target spec shape")]
    UnrecognizedShape,

    #[error("invalid targets for {metric}: min={min} target={target} max={max}")]
    InvalidRange {
        metric: String,
        min: f64,
        target: f64,
        max: f64,
    },

    #[error("true peak {field} is positive ({value} dBTP)")]
    PositiveTruePeak { field: &'static str, value: f64 },

    #[error("unknown playback mode: {0}")]
    UnknownMode(String),
}

/// A computed result contradicts a physical invariant. Always logged; fatal
/// only in strict (audit) mode.
#[derive(Debug, Error)]
#[error("invariant violated: {0}")]
pub struct InvariantViolation(pub String);

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("decode failed: {0}")]
    Decode(String),

    #[error(transparent)]
    Segmentation(#[from] SegmentationError),

    #[error(transparent)]
    Metric(#[from] MetricComputationError),

    #[error(transparent)]
    Targets(#[from] TargetsResolutionError),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    #[error("analysis timed out after {0} ms")]
    Timeout(u64),
}

impl AnalysisError {
    pub fn stage(&self) -> Stage {
        match self {
            AnalysisError::Decode(_) => Stage::Decode,
            AnalysisError::Segmentation(_) => Stage::Segmentation,
            AnalysisError::Metric(_) | AnalysisError::Invariant(_) | AnalysisError::Timeout(_) => {
                Stage::CoreMetrics
            }
            AnalysisError::Targets(_) => Stage::OutputScoring,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::Decode(_) => "DECODE_FAILED",
            AnalysisError::Segmentation(SegmentationError::ChannelLengthMismatch { .. }) => {
                "CHANNEL_LENGTH_MISMATCH"
            }
            AnalysisError::Segmentation(SegmentationError::InvalidSampleRate(_)) => {
                "INVALID_SAMPLE_RATE"
            }
            AnalysisError::Segmentation(SegmentationError::EmptyBuffer) => "EMPTY_BUFFER",
            AnalysisError::Metric(_) => "METRIC_COMPUTATION_FAILED",
            AnalysisError::Targets(TargetsResolutionError::NoSource) => "NO_TARGET_SOURCE",
            AnalysisError::Targets(_) => "TARGETS_INVALID",
            AnalysisError::Invariant(_) => "INVARIANT_VIOLATION",
            AnalysisError::Timeout(_) => "ANALYSIS_TIMEOUT",
        }
    }

    /// The `{stage, code, message}` object surfaced to the job system.
    pub fn to_report(&self) -> ErrorReport {
        ErrorReport {
            stage: self.stage(),
            code: self.code(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub stage: Stage,
    pub code: &'static str,
    pub message: String,
}
