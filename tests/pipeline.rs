//! End-to-end pipeline scenarios over synthesized buffers.

use approx::assert_abs_diff_eq;
use serde_json::json;

use mastercheck::analysis::{analyze_core, AnalysisConfig};
use mastercheck::comparison::Severity;
use mastercheck::targets::PlaybackMode;
use mastercheck::{analyze, analyze_with_timeout, AnalysisOptions, DecodedAudio};

const SR: u32 = 48_000;

fn sine(freq: f64, amplitude: f64, seconds: f64) -> Vec<f32> {
    let len = (SR as f64 * seconds) as usize;
    (0..len)
        .map(|i| {
            let t = i as f64 / SR as f64;
            (amplitude * (2.0 * std::f64::consts::PI * freq * t).sin()) as f32
        })
        .collect()
}

fn stereo(samples: Vec<f32>) -> DecodedAudio {
    DecodedAudio::new(samples.clone(), samples, SR).unwrap()
}

/// Broadband test signal: log-spaced partials from 25 Hz to 18 kHz with
/// deterministic phases. Per-partial amplitude rises as f^0.25 to offset the
/// logarithmic spacing, leaving a gentle f^-0.5 energy density: every band
/// carries energy, none dominates.
fn broadband(seconds: f64, level: f64) -> Vec<f32> {
    let len = (SR as f64 * seconds) as usize;
    let partials: Vec<(f64, f64, f64)> = (0..60)
        .map(|k| {
            let freq = 25.0 * 2f64.powf(k as f64 / 6.0);
            let amplitude = freq.powf(0.25);
            let phase = k as f64 * 2.399963; // golden-angle increments
            (freq, amplitude, phase)
        })
        .filter(|(f, _, _)| *f < 18_000.0)
        .collect();
    let norm: f64 = partials.iter().map(|(_, a, _)| a).sum();

    (0..len)
        .map(|i| {
            let t = i as f64 / SR as f64;
            let sum: f64 = partials
                .iter()
                .map(|(f, a, p)| a * (2.0 * std::f64::consts::PI * f * t + p).sin())
                .sum();
            (level * sum / norm) as f32
        })
        .collect()
}

fn reference_options() -> AnalysisOptions {
    AnalysisOptions {
        playback_mode: Some(PlaybackMode::Reference),
        ..AnalysisOptions::default()
    }
}

#[test]
fn short_sine_true_peak_and_loudness() {
    let audio = stereo(sine(1000.0, 0.5, 0.1));
    let report = analyze(&audio, &reference_options()).unwrap();

    let tp = report.true_peak.max_dbtp.unwrap();
    assert!((tp - (-6.02)).abs() < 0.5, "true peak {tp} dBTP");
    assert_eq!(report.true_peak.oversampling_factor, 4);

    let lufs = report.lufs.integrated.unwrap();
    assert!((-10.0..=-3.0).contains(&lufs), "integrated {lufs} LUFS");
}

#[test]
fn digital_silence_produces_null_peaks_without_error() {
    let audio = stereo(vec![0.0f32; 2 * SR as usize]);
    let report = analyze(&audio, &reference_options()).unwrap();

    assert_eq!(report.true_peak.max_dbtp, None);
    assert_eq!(report.true_peak.max_linear, None);
    assert_eq!(report.true_peak.clipping_samples, 0);
    assert_eq!(report.lufs.integrated, None);
    assert!(!report.warnings.is_empty());
}

#[test]
fn hard_clipped_signal_flags_true_peak_critical() {
    // full-scale square wave: sample peak exactly 0 dBFS
    let samples: Vec<f32> = (0..2 * SR as usize)
        .map(|i| if (i / 24) % 2 == 0 { 1.0 } else { -1.0 })
        .collect();
    let audio = stereo(samples);

    let metrics = analyze_core(&audio, &AnalysisConfig::default()).unwrap();
    let tp = metrics.true_peak.as_ref().unwrap();
    assert_abs_diff_eq!(tp.sample_peak_dbfs, 0.0, epsilon = 1e-9);
    assert!(tp.peak_dbtp >= 0.0);

    let report = analyze(&audio, &reference_options()).unwrap();
    let tp_row = report.comparison.rows.iter().find(|r| r.key == "truePeak").unwrap();
    assert_eq!(tp_row.severity, Severity::Critical);
    assert!(report.comparison.issues.iter().any(|r| r.key == "truePeak"));
    assert!(report.comparison.score.total < 100.0);
}

#[test]
fn broadband_mix_covers_all_bands() {
    let audio = stereo(broadband(3.0, 0.5));
    let report = analyze(&audio, &reference_options()).unwrap();

    let bands = &report.spectral_bands.bands;
    let sections = [
        &bands.sub,
        &bands.bass,
        &bands.low_mid,
        &bands.mid,
        &bands.high_mid,
        &bands.presence,
        &bands.air,
    ];

    let mut total = 0.0;
    let mut dbs = Vec::new();
    for section in sections {
        let pct = section.percentage.unwrap();
        assert!(pct > 0.0, "a band lost all energy");
        assert!(pct < 50.0, "one band dominates with {pct}%");
        total += pct;
        dbs.push(section.energy_db.unwrap());
    }
    assert_abs_diff_eq!(total, 100.0, epsilon = 0.1);
    assert_abs_diff_eq!(report.spectral_bands.total_percentage.unwrap(), 100.0, epsilon = 0.1);

    let max_db = dbs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min_db = dbs.iter().copied().fold(f64::INFINITY, f64::min);
    assert!(max_db <= 0.0);
    assert!(max_db - min_db <= 25.0, "band spread {} dB", max_db - min_db);
}

#[test]
fn analysis_is_idempotent_across_interleaved_buffers() {
    let a = stereo(broadband(2.0, 0.4));
    let b = stereo(sine(60.0, 0.9, 2.0));
    let options = reference_options();

    let first = serde_json::to_string(&analyze(&a, &options).unwrap()).unwrap();
    analyze(&b, &options).unwrap();
    let again = serde_json::to_string(&analyze(&a, &options).unwrap()).unwrap();
    assert_eq!(first, again);
}

#[test]
fn custom_targets_file_shapes_flow_through() {
    let audio = stereo(sine(1000.0, 0.5, 1.0));
    let options = AnalysisOptions {
        target_spec: Some(json!({
            "lufs": { "target": -7.0, "min": -9.0, "max": -5.0 },
            "truePeak": { "target": -1.0, "min": -4.0, "max": 2.0 }
        })),
        ..AnalysisOptions::default()
    };
    let report = analyze(&audio, &options).unwrap();
    let tp_row = report.comparison.rows.iter().find(|r| r.key == "truePeak").unwrap();
    // a raw max of +2 dBTP must have been clamped to the physical ceiling
    assert_eq!(tp_row.max, 0.0);
}

#[test]
fn missing_target_source_fails_scoring_stage() {
    let audio = stereo(sine(1000.0, 0.5, 1.0));
    let err = analyze(&audio, &AnalysisOptions::default()).unwrap_err();
    let report = err.to_report();
    assert_eq!(report.code, "NO_TARGET_SOURCE");
}

#[test]
fn mismatched_channels_fail_segmentation_stage() {
    let audio = DecodedAudio {
        left: vec![0.1; 1000],
        right: vec![0.1; 999],
        sample_rate: SR,
        duration: 0.0,
    };
    let err = analyze(&audio, &reference_options()).unwrap_err();
    assert_eq!(err.to_report().code, "CHANNEL_LENGTH_MISMATCH");
}

#[test]
fn timeout_is_enforced() {
    let audio = stereo(broadband(5.0, 0.4));
    let err = analyze_with_timeout(audio, reference_options(), std::time::Duration::from_nanos(1))
        .unwrap_err();
    assert_eq!(err.to_report().code, "ANALYSIS_TIMEOUT");
}

#[test]
fn report_serializes_expected_shape() {
    let audio = stereo(sine(1000.0, 0.5, 1.0));
    let options = AnalysisOptions {
        job_id: Some("job-42".into()),
        file_name: Some("test.wav".into()),
        ..reference_options()
    };
    let value = serde_json::to_value(analyze(&audio, &options).unwrap()).unwrap();

    assert_eq!(value["jobId"], "job-42");
    assert!(value["truePeak"]["maxDbtp"].is_number());
    assert!(value["lufs"]["integrated"].is_number());
    assert!(value["rms"]["average"].is_number());
    assert!(value["dynamics"].get("crestFactorDb").is_some());
    assert!(value["stereo"]["correlation"].is_number());
    assert!(value["spectralBands"]["bands"]["lowMid"].is_object());
    assert!(value["comparison"]["rows"].is_array());
    assert!(value["comparison"]["score"]["total"].is_number());
    assert!(value["comparison"]["score"]["classification"].is_string());
}
