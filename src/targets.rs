//! Target specification resolution.
//!
//! Target specs arrive in several shapes (an already-canonical structure,
//! legacy nested `{target, tolerance}` objects, or flat keyed fields). Each
//! shape has its own converter into the canonical schema; a single guardrail
//! validates the result. The True Peak ceiling is clamped to 0.0 dBTP no
//! matter what the source says.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analysis::spectral::BANDS;
use crate::error::TargetsResolutionError;

/// Physical ceiling for any True Peak target range, dBTP.
pub const TRUE_PEAK_HARD_CAP_DBTP: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricRange {
    pub target: f64,
    pub min: f64,
    pub max: f64,
}

impl MetricRange {
    pub const fn new(target: f64, min: f64, max: f64) -> Self {
        Self { target, min, max }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TruePeakTargets {
    pub target: f64,
    pub min: f64,
    pub max: f64,
    /// Values above this (but at or below the hard cap) are flagged HIGH.
    pub warn_from: f64,
    /// Always 0.0 dBTP; above it is always CRITICAL.
    pub hard_cap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Targets {
    pub lufs: MetricRange,
    pub true_peak: TruePeakTargets,
    pub dr: MetricRange,
    pub lra: MetricRange,
    pub stereo: Option<MetricRange>,
    /// Keyed by the canonical band keys (sub, bass, lowMid, ...).
    pub bands: BTreeMap<String, MetricRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    Streaming,
    Club,
    Reference,
}

impl PlaybackMode {
    pub fn from_name(name: &str) -> Result<Self, TargetsResolutionError> {
        match name.to_ascii_lowercase().as_str() {
            "streaming" | "digital" => Ok(PlaybackMode::Streaming),
            "club" | "pista" => Ok(PlaybackMode::Club),
            "reference" | "mastering" => Ok(PlaybackMode::Reference),
            other => Err(TargetsResolutionError::UnknownMode(other.to_string())),
        }
    }
}

// Mode presets. Band dB values are in the calibrated band-RMS scale used by
// the spectral analyzer.
fn mode_preset(mode: PlaybackMode) -> Targets {
    let (lufs, true_peak, dr, lra, stereo) = match mode {
        PlaybackMode::Streaming => (
            MetricRange::new(-14.0, -16.0, -12.0),
            (-1.0, -3.0, -1.0),
            MetricRange::new(8.0, 5.0, 14.0),
            MetricRange::new(7.0, 4.0, 12.0),
            MetricRange::new(0.45, 0.05, 0.9),
        ),
        PlaybackMode::Club => (
            MetricRange::new(-9.0, -12.0, -6.0),
            (-0.3, -1.5, 0.0),
            MetricRange::new(6.0, 4.0, 10.0),
            MetricRange::new(5.0, 3.0, 8.0),
            MetricRange::new(0.55, 0.2, 0.95),
        ),
        PlaybackMode::Reference => (
            MetricRange::new(-14.0, -18.0, -8.0),
            (-1.0, -3.0, 0.0),
            MetricRange::new(10.0, 6.0, 16.0),
            MetricRange::new(8.0, 5.0, 14.0),
            MetricRange::new(0.5, 0.1, 0.9),
        ),
    };

    let band_defaults: [(&str, MetricRange); 7] = [
        ("sub", MetricRange::new(-14.0, -20.0, -8.0)),
        ("bass", MetricRange::new(-12.0, -18.0, -6.0)),
        ("lowMid", MetricRange::new(-14.0, -20.0, -8.0)),
        ("mid", MetricRange::new(-16.0, -22.0, -10.0)),
        ("highMid", MetricRange::new(-20.0, -26.0, -14.0)),
        ("presence", MetricRange::new(-24.0, -32.0, -16.0)),
        ("air", MetricRange::new(-30.0, -40.0, -20.0)),
    ];

    Targets {
        lufs,
        true_peak: TruePeakTargets {
            target: true_peak.0,
            min: true_peak.1,
            max: true_peak.2,
            warn_from: true_peak.2,
            hard_cap: TRUE_PEAK_HARD_CAP_DBTP,
        },
        dr,
        lra,
        stereo: Some(stereo),
        bands: band_defaults.iter().map(|(k, r)| (k.to_string(), *r)).collect(),
    }
}

// ---------------------------------------------------------------------------
// shape converters
// ---------------------------------------------------------------------------

/// Partially specified targets produced by a shape converter, merged over a
/// mode preset before validation.
#[derive(Debug, Default)]
struct PartialTargets {
    lufs: Option<MetricRange>,
    true_peak: Option<(MetricRange, Option<f64>)>, // range + optional warn_from
    dr: Option<MetricRange>,
    lra: Option<MetricRange>,
    stereo: Option<MetricRange>,
    bands: BTreeMap<String, MetricRange>,
}

#[derive(Deserialize)]
struct CanonicalMetric {
    target: f64,
    min: f64,
    max: f64,
    #[serde(rename = "warnFrom", alias = "warn_from")]
    warn_from: Option<f64>,
}

#[derive(Deserialize)]
struct CanonicalSpec {
    lufs: Option<CanonicalMetric>,
    #[serde(rename = "truePeak", alias = "true_peak")]
    true_peak: Option<CanonicalMetric>,
    dr: Option<CanonicalMetric>,
    lra: Option<CanonicalMetric>,
    stereo: Option<CanonicalMetric>,
    bands: Option<BTreeMap<String, CanonicalMetric>>,
}

#[derive(Deserialize)]
struct ToleranceMetric {
    target: f64,
    tolerance: f64,
}

#[derive(Deserialize)]
struct ToleranceBand {
    target_db: f64,
    target_range: Option<ToleranceBandRange>,
    tol_db: Option<f64>,
}

#[derive(Deserialize)]
struct ToleranceBandRange {
    min: f64,
    max: f64,
}

#[derive(Deserialize)]
struct ToleranceSpec {
    lufs: Option<ToleranceMetric>,
    #[serde(rename = "truePeak", alias = "true_peak")]
    true_peak: Option<ToleranceMetric>,
    dr: Option<ToleranceMetric>,
    lra: Option<ToleranceMetric>,
    stereo: Option<ToleranceMetric>,
    bands: Option<BTreeMap<String, ToleranceBand>>,
}

fn canonical_range(m: &CanonicalMetric) -> MetricRange {
    MetricRange::new(m.target, m.min, m.max)
}

fn tolerance_range(m: &ToleranceMetric) -> MetricRange {
    MetricRange::new(m.target, m.target - m.tolerance, m.target + m.tolerance)
}

fn band_key_alias(key: &str) -> Option<&'static str> {
    // Legacy sources use snake_case and a couple of older band names.
    match key {
        "sub" | "subBass" | "sub_bass" => Some("sub"),
        "bass" => Some("bass"),
        "lowMid" | "low_mid" => Some("lowMid"),
        "mid" => Some("mid"),
        "highMid" | "high_mid" | "upperMid" | "upper_mid" => Some("highMid"),
        "presence" => Some("presence"),
        "air" | "brilliance" => Some("air"),
        _ => None,
    }
}

fn from_canonical(value: &Value) -> Result<PartialTargets, TargetsResolutionError> {
    let spec: CanonicalSpec =
        serde_json::from_value(value.clone()).map_err(|_| TargetsResolutionError::UnrecognizedShape)?;
    let mut partial = PartialTargets::default();
    partial.lufs = spec.lufs.as_ref().map(canonical_range);
    partial.true_peak = spec
        .true_peak
        .as_ref()
        .map(|m| (canonical_range(m), m.warn_from));
    partial.dr = spec.dr.as_ref().map(canonical_range);
    partial.lra = spec.lra.as_ref().map(canonical_range);
    partial.stereo = spec.stereo.as_ref().map(canonical_range);
    if let Some(bands) = &spec.bands {
        for (key, m) in bands {
            if let Some(canonical) = band_key_alias(key) {
                partial.bands.insert(canonical.to_string(), canonical_range(m));
            }
        }
    }
    Ok(partial)
}

fn from_tolerance(value: &Value) -> Result<PartialTargets, TargetsResolutionError> {
    let spec: ToleranceSpec =
        serde_json::from_value(value.clone()).map_err(|_| TargetsResolutionError::UnrecognizedShape)?;
    let mut partial = PartialTargets::default();
    partial.lufs = spec.lufs.as_ref().map(tolerance_range);
    partial.true_peak = spec.true_peak.as_ref().map(|m| (tolerance_range(m), None));
    partial.dr = spec.dr.as_ref().map(tolerance_range);
    partial.lra = spec.lra.as_ref().map(tolerance_range);
    partial.stereo = spec.stereo.as_ref().map(tolerance_range);
    if let Some(bands) = &spec.bands {
        for (key, band) in bands {
            let Some(canonical) = band_key_alias(key) else { continue };
            let range = match (&band.target_range, band.tol_db) {
                (Some(r), _) => MetricRange::new(band.target_db, r.min, r.max),
                (None, Some(tol)) => {
                    MetricRange::new(band.target_db, band.target_db - tol, band.target_db + tol)
                }
                (None, None) => {
                    MetricRange::new(band.target_db, band.target_db - 3.0, band.target_db + 3.0)
                }
            };
            partial.bands.insert(canonical.to_string(), range);
        }
    }
    Ok(partial)
}

fn from_flat(value: &Value) -> Result<PartialTargets, TargetsResolutionError> {
    let obj = value.as_object().ok_or(TargetsResolutionError::UnrecognizedShape)?;
    let num = |key: &str| obj.get(key).and_then(Value::as_f64);

    let range_from = |target_keys: &[&str], prefix: &str, default_tol: f64| -> Option<MetricRange> {
        let target = target_keys.iter().find_map(|k| num(k))?;
        let tol = num(&format!("{prefix}_tol")).unwrap_or(default_tol);
        let min = num(&format!("{prefix}_min")).unwrap_or(target - tol);
        let max = num(&format!("{prefix}_max")).unwrap_or(target + tol);
        Some(MetricRange::new(target, min, max))
    };

    let mut partial = PartialTargets::default();
    partial.lufs = range_from(&["lufs_target", "lufs_integrated"], "lufs", 2.0);
    partial.true_peak = range_from(&["true_peak_target", "true_peak_dbtp"], "true_peak", 1.0)
        .map(|r| (r, num("true_peak_warn_from")));
    partial.dr = range_from(&["dr_target"], "dr", 3.0);
    partial.lra = range_from(&["lra_target", "lra"], "lra", 3.0);
    partial.stereo = range_from(&["stereo_target", "stereo_correlation"], "stereo", 0.3);

    for band in BANDS {
        // e.g. band_sub_target_db / band_sub_min_db / band_sub_max_db
        let snake = match band.key {
            "lowMid" => "low_mid",
            "highMid" => "high_mid",
            other => other,
        };
        let target = num(&format!("band_{snake}_target_db"));
        if let Some(target) = target {
            let min = num(&format!("band_{snake}_min_db")).unwrap_or(target - 3.0);
            let max = num(&format!("band_{snake}_max_db")).unwrap_or(target + 3.0);
            partial.bands.insert(band.key.to_string(), MetricRange::new(target, min, max));
        }
    }

    if partial.lufs.is_none()
        && partial.true_peak.is_none()
        && partial.dr.is_none()
        && partial.lra.is_none()
        && partial.stereo.is_none()
        && partial.bands.is_empty()
    {
        return Err(TargetsResolutionError::UnrecognizedShape);
    }
    Ok(partial)
}

fn looks_canonical(value: &Value) -> bool {
    let metric_range = ["lufs", "truePeak", "true_peak", "dr", "lra", "stereo"].iter().any(|key| {
        value
            .get(key)
            .and_then(Value::as_object)
            .map(|m| m.contains_key("min") && m.contains_key("max"))
            .unwrap_or(false)
    });
    let band_range = value
        .get("bands")
        .and_then(Value::as_object)
        .map(|bands| {
            bands.values().any(|b| {
                b.get("min").is_some() && b.get("max").is_some() && b.get("target").is_some()
            })
        })
        .unwrap_or(false);
    metric_range || band_range
}

fn looks_tolerance(value: &Value) -> bool {
    let metric_tol = ["lufs", "truePeak", "true_peak", "dr", "lra", "stereo"].iter().any(|key| {
        value
            .get(key)
            .and_then(Value::as_object)
            .map(|m| m.contains_key("tolerance"))
            .unwrap_or(false)
    });
    let band_tol = value
        .get("bands")
        .and_then(Value::as_object)
        .map(|bands| {
            bands
                .values()
                .any(|b| b.get("target_db").is_some() || b.get("target_range").is_some())
        })
        .unwrap_or(false);
    metric_tol || band_tol
}

fn convert(value: &Value) -> Result<PartialTargets, TargetsResolutionError> {
    if looks_canonical(value) {
        from_canonical(value)
    } else if looks_tolerance(value) {
        from_tolerance(value)
    } else {
        from_flat(value)
    }
}

// ---------------------------------------------------------------------------
// resolution
// ---------------------------------------------------------------------------

/// Normalizes any supported spec shape into canonical `Targets`, merged over
/// the playback-mode preset, with the True Peak hard cap enforced and the
/// whole result validated.
pub fn resolve(
    spec: Option<&Value>,
    mode: Option<PlaybackMode>,
) -> Result<Targets, TargetsResolutionError> {
    if spec.is_none() && mode.is_none() {
        return Err(TargetsResolutionError::NoSource);
    }

    let base_mode = mode.unwrap_or(PlaybackMode::Reference);
    let mut targets = mode_preset(base_mode);

    if let Some(value) = spec {
        let partial = convert(value)?;
        if let Some(r) = partial.lufs {
            targets.lufs = r;
        }
        if let Some((r, warn_from)) = partial.true_peak {
            targets.true_peak = TruePeakTargets {
                target: r.target,
                min: r.min,
                max: r.max,
                warn_from: warn_from.unwrap_or(r.max),
                hard_cap: TRUE_PEAK_HARD_CAP_DBTP,
            };
        }
        if let Some(r) = partial.dr {
            targets.dr = r;
        }
        if let Some(r) = partial.lra {
            targets.lra = r;
        }
        if let Some(r) = partial.stereo {
            targets.stereo = Some(r);
        }
        for (key, range) in partial.bands {
            targets.bands.insert(key, range);
        }
    }

    // An explicit streaming mode tightens the ceilings even over a custom
    // spec, pulling the targets inside the tightened windows.
    if mode == Some(PlaybackMode::Streaming) {
        targets.true_peak.max = targets.true_peak.max.min(-1.0);
        targets.true_peak.target = targets.true_peak.target.min(targets.true_peak.max);
        targets.lufs.min = targets.lufs.min.max(-16.0);
        targets.lufs.max = targets.lufs.max.min(-12.0);
        if targets.lufs.min <= targets.lufs.max {
            targets.lufs.target = targets.lufs.target.clamp(targets.lufs.min, targets.lufs.max);
        }
    }

    // Physical invariant, not a tunable: nothing may target above 0 dBTP.
    targets.true_peak.hard_cap = TRUE_PEAK_HARD_CAP_DBTP;
    targets.true_peak.max = targets.true_peak.max.min(TRUE_PEAK_HARD_CAP_DBTP);
    targets.true_peak.warn_from = targets.true_peak.warn_from.min(targets.true_peak.max);

    validate_targets(&targets)?;
    Ok(targets)
}

/// Guardrail applied to every resolved target set.
pub fn validate_targets(targets: &Targets) -> Result<(), TargetsResolutionError> {
    let check = |metric: &str, r: &MetricRange| {
        if r.min <= r.target && r.target <= r.max {
            Ok(())
        } else {
            Err(TargetsResolutionError::InvalidRange {
                metric: metric.to_string(),
                min: r.min,
                target: r.target,
                max: r.max,
            })
        }
    };

    check("lufs", &targets.lufs)?;
    let tp = &targets.true_peak;
    check("truePeak", &MetricRange::new(tp.target, tp.min, tp.max))?;
    if tp.target > 0.0 {
        return Err(TargetsResolutionError::PositiveTruePeak { field: "target", value: tp.target });
    }
    if tp.max > 0.0 {
        return Err(TargetsResolutionError::PositiveTruePeak { field: "max", value: tp.max });
    }
    check("dr", &targets.dr)?;
    check("lra", &targets.lra)?;
    if let Some(stereo) = &targets.stereo {
        check("stereo", stereo)?;
    }
    for (key, range) in &targets.bands {
        check(key, range)?;
    }
    Ok(())
}
