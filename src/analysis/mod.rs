//! Core metrics orchestration: a stateless task graph over one immutable
//! decoded buffer. True Peak (per channel), loudness, per-frame spectral
//! analysis, dynamics and stereo image run as parallel tasks; each writes
//! only its own result. Individual metric failures degrade that metric to
//! null with a recorded warning; segmentation failures are fatal.

pub mod dynamics;
pub mod loudness;
pub mod segment;
pub mod spectral;
pub mod stereo;
pub mod true_peak;

use std::panic::{catch_unwind, AssertUnwindSafe};

use rayon::prelude::*;

use crate::error::AnalysisError;
use crate::DecodedAudio;
use dynamics::{DynamicsResult, RmsSummary};
use loudness::LoudnessResult;
use segment::{SegmentConfig, SegmentedAudio};
use spectral::{AggregatedBands, SpectralBandAnalyzer};
use stereo::StereoResult;
use true_peak::{OversamplingMode, TruePeakDetector, TruePeakResult};

#[derive(Debug, Clone, Copy)]
pub struct AnalysisConfig {
    pub oversampling: OversamplingMode,
    /// Audit mode: invariant violations abort the analysis instead of
    /// degrading to a logged warning.
    pub strict: bool,
    pub segment: SegmentConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            oversampling: OversamplingMode::Legacy4x,
            strict: false,
            segment: SegmentConfig::default(),
        }
    }
}

/// A metric that could not be computed; the corresponding field is null in
/// the merged metrics.
#[derive(Debug, Clone)]
pub struct MetricWarning {
    pub metric: &'static str,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct CoreMetrics {
    /// Loudest channel's detector result, clipping counts summed over both.
    pub true_peak: Option<TruePeakResult>,
    pub loudness: LoudnessResult,
    pub bands: AggregatedBands,
    pub dynamics: DynamicsResult,
    pub stereo: StereoResult,
    pub rms: RmsSummary,
    pub sample_rate: u32,
    pub duration: f64,
    pub warnings: Vec<MetricWarning>,
}

fn merge_channel_peaks(left: TruePeakResult, right: TruePeakResult) -> TruePeakResult {
    let clipping = left.clipping_samples + right.clipping_samples;
    let mut merged = if right.peak_linear > left.peak_linear { right } else { left };
    merged.clipping_samples = clipping;
    merged
}

fn run_true_peak(
    audio: &DecodedAudio,
    config: &AnalysisConfig,
) -> Result<TruePeakResult, AnalysisError> {
    // One detector per channel: delay lines must never be shared.
    let (left, right) = rayon::join(
        || TruePeakDetector::new(config.oversampling, config.strict).detect(&audio.left),
        || TruePeakDetector::new(config.oversampling, config.strict).detect(&audio.right),
    );
    Ok(merge_channel_peaks(left?, right?))
}

fn run_spectral(segmented: &SegmentedAudio) -> AggregatedBands {
    let analyzer = SpectralBandAnalyzer::new(segmented.sample_rate, segmented.frames_fft.window_size);
    let fft = &segmented.frames_fft;
    let frames: Vec<spectral::FrameBands> = (0..fft.count)
        .into_par_iter()
        .map(|i| {
            let left_mag = spectral::magnitude_spectrum(&fft.left.frames[i]);
            let right_mag = spectral::magnitude_spectrum(&fft.right.frames[i]);
            analyzer.analyze_frame(&left_mag, &right_mag)
        })
        .collect();
    analyzer.aggregate(&frames)
}

/// Runs every metric over the decoded buffer and merges the results. All
/// detector/filter state is constructed inside this call, so repeated
/// analyses of the same buffer are bit-identical.
pub fn analyze_core(
    audio: &DecodedAudio,
    config: &AnalysisConfig,
) -> Result<CoreMetrics, AnalysisError> {
    let segmented = segment::segment(audio, &config.segment)?;

    let mut warnings: Vec<MetricWarning> = Vec::new();

    let (true_peak_outcome, (loudness_outcome, (bands_outcome, (dynamics_outcome, stereo_outcome)))) =
        rayon::join(
            || catch_unwind(AssertUnwindSafe(|| run_true_peak(audio, config))),
            || {
                rayon::join(
                    || {
                        catch_unwind(AssertUnwindSafe(|| {
                            loudness::measure(&audio.left, &audio.right, audio.sample_rate)
                        }))
                    },
                    || {
                        rayon::join(
                            || catch_unwind(AssertUnwindSafe(|| run_spectral(&segmented))),
                            || {
                                rayon::join(
                                    || {
                                        catch_unwind(AssertUnwindSafe(|| {
                                            (
                                                dynamics::dynamic_range(
                                                    &audio.left,
                                                    &audio.right,
                                                    audio.sample_rate,
                                                ),
                                                dynamics::rms_summary(
                                                    &audio.left,
                                                    &audio.right,
                                                    audio.sample_rate,
                                                ),
                                            )
                                        }))
                                    },
                                    || {
                                        catch_unwind(AssertUnwindSafe(|| {
                                            stereo::analyze(&audio.left, &audio.right)
                                        }))
                                    },
                                )
                            },
                        )
                    },
                )
            },
        );

    let true_peak = match true_peak_outcome {
        Ok(Ok(result)) => Some(result),
        Ok(Err(err)) => {
            if config.strict {
                return Err(err);
            }
            warnings.push(MetricWarning { metric: "truePeak", message: err.to_string() });
            None
        }
        Err(_) => {
            warnings.push(MetricWarning {
                metric: "truePeak",
                message: "true peak task panicked".into(),
            });
            None
        }
    };

    let loudness = match loudness_outcome {
        Ok(result) => result,
        Err(_) => {
            warnings.push(MetricWarning {
                metric: "lufs",
                message: "loudness task panicked".into(),
            });
            LoudnessResult::invalid()
        }
    };
    if loudness.integrated.is_none() {
        warnings.push(MetricWarning {
            metric: "lufs",
            message: "no blocks above the absolute gate; track silent or too short".into(),
        });
    }
    if loudness.suspicious {
        warnings.push(MetricWarning {
            metric: "lufs",
            message: format!("integrated loudness {:?} outside plausible range", loudness.integrated),
        });
    }

    let bands = match bands_outcome {
        Ok(result) => result,
        Err(_) => {
            warnings.push(MetricWarning {
                metric: "spectralBands",
                message: "spectral task panicked".into(),
            });
            AggregatedBands::not_calculated()
        }
    };
    if bands.frames_used == 0 {
        warnings.push(MetricWarning {
            metric: "spectralBands",
            message: "no frames above the energy floor".into(),
        });
    }

    let (dynamic_range_db, rms) = match dynamics_outcome {
        Ok((dr, rms)) => (dr, rms),
        Err(_) => {
            warnings.push(MetricWarning {
                metric: "dynamics",
                message: "dynamics task panicked".into(),
            });
            (None, RmsSummary { average_db: None, peak_db: None, left_db: None, right_db: None })
        }
    };
    if dynamic_range_db.is_none() {
        warnings.push(MetricWarning {
            metric: "dynamics",
            message: "fewer than 10 valid RMS windows for dynamic range".into(),
        });
    }

    // Crest factor wants the oversampled peak; it falls back to the sample
    // peak internally when the detector failed.
    let crest_factor_db = dynamics::crest_factor(
        &audio.left,
        &audio.right,
        true_peak.as_ref().map(|tp| tp.peak_dbtp),
    );
    if crest_factor_db.is_none() {
        warnings.push(MetricWarning {
            metric: "dynamics",
            message: "crest factor outside plausible range or inputs insufficient".into(),
        });
    }

    let stereo = match stereo_outcome {
        Ok(result) => result,
        Err(_) => {
            warnings.push(MetricWarning {
                metric: "stereo",
                message: "stereo task panicked".into(),
            });
            StereoResult { correlation: 0.0, width: 0.0, balance: 0.0 }
        }
    };

    for warning in &warnings {
        log::warn!("{}: {}", warning.metric, warning.message);
    }

    Ok(CoreMetrics {
        true_peak,
        loudness,
        bands,
        dynamics: DynamicsResult { dynamic_range_db, crest_factor_db },
        stereo,
        rms,
        sample_rate: audio.sample_rate,
        duration: audio.duration,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_audio(freq: f64, amplitude: f64, seconds: f64) -> DecodedAudio {
        let sr = 48_000u32;
        let len = (sr as f64 * seconds) as usize;
        let samples: Vec<f32> = (0..len)
            .map(|i| {
                let t = i as f64 / sr as f64;
                (amplitude * (2.0 * std::f64::consts::PI * freq * t).sin()) as f32
            })
            .collect();
        DecodedAudio::new(samples.clone(), samples, sr).unwrap()
    }

    #[test]
    fn analyze_core_fills_every_metric_for_normal_audio() {
        let audio = sine_audio(1000.0, 0.5, 4.0);
        let metrics = analyze_core(&audio, &AnalysisConfig::default()).unwrap();
        assert!(metrics.true_peak.is_some());
        assert!(metrics.loudness.integrated.is_some());
        assert!(metrics.bands.frames_used > 0);
        assert!(metrics.rms.average_db.is_some());
        // a pure sine's crest factor sits at the plausibility floor; DR of a
        // constant tone is near zero, both are legitimately present
        assert!(metrics.dynamics.dynamic_range_db.is_some());
    }

    #[test]
    fn silence_degrades_gracefully() {
        let audio = DecodedAudio::new(vec![0.0; 96_000], vec![0.0; 96_000], 48_000).unwrap();
        let metrics = analyze_core(&audio, &AnalysisConfig::default()).unwrap();
        let tp = metrics.true_peak.unwrap();
        assert_eq!(tp.peak_dbtp, f64::NEG_INFINITY);
        assert_eq!(metrics.loudness.integrated, None);
        assert_eq!(metrics.bands.frames_used, 0);
        assert_eq!(metrics.dynamics.dynamic_range_db, None);
        assert!(!metrics.warnings.is_empty());
    }

    #[test]
    fn repeated_analysis_is_bit_identical() {
        let a = sine_audio(440.0, 0.6, 2.0);
        let b = sine_audio(5000.0, 0.2, 2.0);
        let config = AnalysisConfig::default();

        let first = analyze_core(&a, &config).unwrap();
        analyze_core(&b, &config).unwrap();
        let again = analyze_core(&a, &config).unwrap();

        assert_eq!(first.true_peak, again.true_peak);
        assert_eq!(first.loudness, again.loudness);
        assert_eq!(first.dynamics, again.dynamics);
        assert_eq!(first.bands.bands, again.bands.bands);
    }

    #[test]
    fn segmentation_failure_is_fatal() {
        let audio = DecodedAudio {
            left: vec![0.1; 100],
            right: vec![0.1; 99],
            sample_rate: 48_000,
            duration: 0.0,
        };
        assert!(analyze_core(&audio, &AnalysisConfig::default()).is_err());
    }
}
