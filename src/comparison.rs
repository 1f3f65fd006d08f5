//! Target comparison: one evaluation pass producing the comparison table,
//! the issue list and the score. All three views are derived from a single
//! severity decision per metric, so they cannot drift apart.

use serde::Serialize;

use crate::analysis::spectral::BANDS;
use crate::analysis::CoreMetrics;
use crate::targets::{MetricRange, Targets, TruePeakTargets};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Ok,
    Attention,
    High,
    Critical,
}

impl Severity {
    /// Normalized per-metric score. The score is a pure function of the
    /// severity so the table, the issues and the score always agree.
    pub fn score(self) -> f64 {
        match self {
            Severity::Ok => 1.0,
            Severity::Attention => 0.75,
            Severity::High => 0.4,
            Severity::Critical => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub key: String,
    pub label: String,
    pub unit: &'static str,
    pub measured: Option<f64>,
    pub target: f64,
    pub min: f64,
    pub max: f64,
    /// Always measured - target, also when the hard-cap rule fires, so the
    /// displayed delta matches the suggested correction amount.
    pub difference: Option<f64>,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownEntry {
    pub key: String,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub total: f64,
    pub breakdown: Vec<BreakdownEntry>,
    pub classification: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonOutput {
    pub rows: Vec<Row>,
    pub issues: Vec<Row>,
    pub score: Score,
}

/// The measured values the comparator consumes, extracted from the merged
/// core metrics. Non-finite values count as unmeasured.
#[derive(Debug, Clone, Default)]
pub struct MeasuredSnapshot {
    pub true_peak_dbtp: Option<f64>,
    pub lufs_integrated: Option<f64>,
    pub dynamic_range_db: Option<f64>,
    pub lra: Option<f64>,
    pub stereo_correlation: Option<f64>,
    pub band_db: [Option<f64>; 7],
}

impl MeasuredSnapshot {
    pub fn from_core(metrics: &CoreMetrics) -> Self {
        let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
        Self {
            true_peak_dbtp: finite(metrics.true_peak.as_ref().map(|tp| tp.peak_dbtp)),
            lufs_integrated: finite(metrics.loudness.integrated),
            dynamic_range_db: finite(metrics.dynamics.dynamic_range_db),
            lra: finite(metrics.loudness.lra),
            stereo_correlation: finite(Some(metrics.stereo.correlation)),
            band_db: std::array::from_fn(|i| finite(metrics.bands.bands[i].energy_db)),
        }
    }
}

fn severity_true_peak(value: f64, tp: &TruePeakTargets) -> Severity {
    if value > tp.hard_cap {
        // Above the physical ceiling: always critical, regardless of how
        // close the target is.
        Severity::Critical
    } else if value > tp.warn_from {
        Severity::High
    } else if value >= tp.min {
        Severity::Ok
    } else {
        // Extra headroom is not a defect.
        Severity::Attention
    }
}

fn severity_range(value: f64, range: &MetricRange) -> Severity {
    if (range.min..=range.max).contains(&value) {
        return Severity::Ok;
    }
    let half_width = (range.max - range.min) / 2.0;
    let excess = if value > range.max { value - range.max } else { range.min - value };
    if half_width <= 0.0 {
        return Severity::Critical;
    }
    let ratio = excess / half_width;
    if ratio >= 1.0 {
        Severity::Critical
    } else if ratio >= 0.5 {
        Severity::High
    } else {
        Severity::Attention
    }
}

fn severity_band(value: f64, range: &MetricRange) -> Severity {
    if (range.min..=range.max).contains(&value) {
        return Severity::Ok;
    }
    let excess = if value > range.max { value - range.max } else { range.min - value };
    if excess >= 2.0 {
        Severity::Critical
    } else {
        Severity::Attention
    }
}

fn make_row(
    key: &str,
    label: &str,
    unit: &'static str,
    measured: Option<f64>,
    range: MetricRange,
    severity: impl Fn(f64) -> Severity,
) -> Row {
    let severity = measured.map(&severity).unwrap_or(Severity::Ok);
    Row {
        key: key.to_string(),
        label: label.to_string(),
        unit,
        measured,
        target: range.target,
        min: range.min,
        max: range.max,
        difference: measured.map(|v| v - range.target),
        severity,
    }
}

fn classification(total: f64) -> &'static str {
    if total >= 90.0 {
        "Reference"
    } else if total >= 75.0 {
        "Advanced"
    } else if total >= 50.0 {
        "Intermediate"
    } else {
        "Basic"
    }
}

pub fn compare(snapshot: &MeasuredSnapshot, targets: &Targets) -> ComparisonOutput {
    let mut rows = Vec::with_capacity(12);

    let tp = targets.true_peak;
    rows.push(make_row(
        "truePeak",
        "True Peak",
        "dBTP",
        snapshot.true_peak_dbtp,
        MetricRange::new(tp.target, tp.min, tp.max),
        |v| severity_true_peak(v, &tp),
    ));
    rows.push(make_row(
        "lufs",
        "Integrated Loudness",
        "LUFS",
        snapshot.lufs_integrated,
        targets.lufs,
        |v| severity_range(v, &targets.lufs),
    ));
    rows.push(make_row(
        "dr",
        "Dynamic Range",
        "dB",
        snapshot.dynamic_range_db,
        targets.dr,
        |v| severity_range(v, &targets.dr),
    ));
    rows.push(make_row("lra", "Loudness Range", "LU", snapshot.lra, targets.lra, |v| {
        severity_range(v, &targets.lra)
    }));
    if let Some(stereo) = targets.stereo {
        rows.push(make_row(
            "stereo",
            "Stereo Correlation",
            "",
            snapshot.stereo_correlation,
            stereo,
            |v| severity_range(v, &stereo),
        ));
    }
    for (i, band) in BANDS.iter().enumerate() {
        if let Some(range) = targets.bands.get(band.key) {
            rows.push(make_row(
                band.key,
                band.label,
                "dB",
                snapshot.band_db[i],
                *range,
                |v| severity_band(v, range),
            ));
        }
    }

    let issues: Vec<Row> = rows
        .iter()
        .filter(|r| r.measured.is_some() && r.severity != Severity::Ok)
        .cloned()
        .collect();

    let breakdown: Vec<BreakdownEntry> = rows
        .iter()
        .map(|r| BreakdownEntry {
            key: r.key.clone(),
            score: r.measured.map(|_| r.severity.score()),
        })
        .collect();
    let measured_scores: Vec<f64> = breakdown.iter().filter_map(|b| b.score).collect();
    let total = if measured_scores.is_empty() {
        0.0
    } else {
        measured_scores.iter().sum::<f64>() / measured_scores.len() as f64 * 100.0
    };

    ComparisonOutput {
        rows,
        issues,
        score: Score { total, breakdown, classification: classification(total) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::{resolve, PlaybackMode};
    use approx::assert_abs_diff_eq;

    fn reference_targets() -> Targets {
        resolve(None, Some(PlaybackMode::Reference)).unwrap()
    }

    fn snapshot_at_targets(targets: &Targets) -> MeasuredSnapshot {
        MeasuredSnapshot {
            true_peak_dbtp: Some(targets.true_peak.target),
            lufs_integrated: Some(targets.lufs.target),
            dynamic_range_db: Some(targets.dr.target),
            lra: Some(targets.lra.target),
            stereo_correlation: targets.stereo.map(|s| s.target),
            band_db: std::array::from_fn(|i| Some(targets.bands[BANDS[i].key].target)),
        }
    }

    #[test]
    fn everything_on_target_scores_hundred() {
        let targets = reference_targets();
        let output = compare(&snapshot_at_targets(&targets), &targets);
        assert!(output.rows.iter().all(|r| r.severity == Severity::Ok));
        assert!(output.issues.is_empty());
        assert_abs_diff_eq!(output.score.total, 100.0);
        assert_eq!(output.score.classification, "Reference");
    }

    #[test]
    fn true_peak_above_hard_cap_is_always_critical() {
        let targets = reference_targets();
        let mut snapshot = snapshot_at_targets(&targets);
        snapshot.true_peak_dbtp = Some(0.2);
        let output = compare(&snapshot, &targets);
        let row = &output.rows[0];
        assert_eq!(row.key, "truePeak");
        assert_eq!(row.severity, Severity::Critical);
        // difference stays relative to the target, not the cap
        assert_abs_diff_eq!(row.difference.unwrap(), 0.2 - targets.true_peak.target);
        assert_eq!(output.issues.len(), 1);
    }

    #[test]
    fn true_peak_between_warn_and_cap_is_high() {
        let mut targets = reference_targets();
        targets.true_peak.warn_from = -0.5;
        let mut snapshot = snapshot_at_targets(&targets);
        snapshot.true_peak_dbtp = Some(-0.2);
        let output = compare(&snapshot, &targets);
        assert_eq!(output.rows[0].severity, Severity::High);
    }

    #[test]
    fn true_peak_below_min_is_mild_attention() {
        let targets = reference_targets();
        let mut snapshot = snapshot_at_targets(&targets);
        snapshot.true_peak_dbtp = Some(targets.true_peak.min - 4.0);
        let output = compare(&snapshot, &targets);
        assert_eq!(output.rows[0].severity, Severity::Attention);
    }

    #[test]
    fn range_metric_graduates_with_distance() {
        let targets = reference_targets();
        let half = (targets.lufs.max - targets.lufs.min) / 2.0;

        let mut snapshot = snapshot_at_targets(&targets);
        snapshot.lufs_integrated = Some(targets.lufs.max + 0.2 * half);
        assert_eq!(compare(&snapshot, &targets).rows[1].severity, Severity::Attention);

        snapshot.lufs_integrated = Some(targets.lufs.max + 0.7 * half);
        assert_eq!(compare(&snapshot, &targets).rows[1].severity, Severity::High);

        snapshot.lufs_integrated = Some(targets.lufs.max + 1.5 * half);
        assert_eq!(compare(&snapshot, &targets).rows[1].severity, Severity::Critical);
    }

    #[test]
    fn band_two_db_outside_is_critical() {
        let targets = reference_targets();
        let sub_range = targets.bands["sub"];

        let mut snapshot = snapshot_at_targets(&targets);
        snapshot.band_db[0] = Some(sub_range.max + 1.0);
        let output = compare(&snapshot, &targets);
        let sub_row = output.rows.iter().find(|r| r.key == "sub").unwrap();
        assert_eq!(sub_row.severity, Severity::Attention);

        snapshot.band_db[0] = Some(sub_range.max + 2.5);
        let output = compare(&snapshot, &targets);
        let sub_row = output.rows.iter().find(|r| r.key == "sub").unwrap();
        assert_eq!(sub_row.severity, Severity::Critical);
    }

    #[test]
    fn unmeasured_metrics_are_excluded_from_issues_and_score() {
        let targets = reference_targets();
        let mut snapshot = snapshot_at_targets(&targets);
        snapshot.lufs_integrated = None;
        snapshot.dynamic_range_db = None;
        let output = compare(&snapshot, &targets);
        assert!(output.issues.is_empty());
        assert_abs_diff_eq!(output.score.total, 100.0);
        let lufs_entry = output.score.breakdown.iter().find(|b| b.key == "lufs").unwrap();
        assert_eq!(lufs_entry.score, None);
    }

    #[test]
    fn issues_are_exactly_the_non_ok_rows() {
        let targets = reference_targets();
        let mut snapshot = snapshot_at_targets(&targets);
        snapshot.true_peak_dbtp = Some(1.0);
        snapshot.lra = Some(targets.lra.max + 20.0);
        let output = compare(&snapshot, &targets);
        let non_ok: Vec<&Row> =
            output.rows.iter().filter(|r| r.severity != Severity::Ok).collect();
        assert_eq!(output.issues.len(), non_ok.len());
        assert_eq!(output.issues.len(), 2);
    }

    #[test]
    fn score_buckets_classify() {
        assert_eq!(classification(95.0), "Reference");
        assert_eq!(classification(80.0), "Advanced");
        assert_eq!(classification(60.0), "Intermediate");
        assert_eq!(classification(20.0), "Basic");
    }
}
