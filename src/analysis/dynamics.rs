//! Windowed dynamic range, crest factor and the RMS level summary.

pub const DR_WINDOW_MS: u32 = 300;
pub const DR_HOP_MS: u32 = 100;
/// Fewer valid windows than this and the DR measurement is meaningless.
pub const DR_MIN_WINDOWS: usize = 10;
/// Crest factors outside this band indicate a broken measurement, not audio.
pub const CREST_PLAUSIBLE_DB: (f64, f64) = (3.0, 20.0);

const SILENCE_RMS: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq)]
pub struct DynamicsResult {
    pub dynamic_range_db: Option<f64>,
    pub crest_factor_db: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RmsSummary {
    /// Mean of the windowed RMS values over the mono sum, in dB.
    pub average_db: Option<f64>,
    /// Loudest 300 ms window, in dB.
    pub peak_db: Option<f64>,
    pub left_db: Option<f64>,
    pub right_db: Option<f64>,
}

fn to_db(linear: f64) -> Option<f64> {
    (linear > 0.0).then(|| 20.0 * linear.log10())
}

fn mono_sum(left: &[f32], right: &[f32]) -> Vec<f64> {
    left.iter()
        .zip(right)
        .map(|(&l, &r)| (l as f64 + r as f64) / 2.0)
        .collect()
}

fn channel_rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

/// Windowed RMS values in dB over a mono signal; silent windows are dropped.
fn windowed_rms_db(mono: &[f64], sample_rate: u32, window_ms: u32, hop_ms: u32) -> Vec<f64> {
    let window = (window_ms as usize * sample_rate as usize) / 1000;
    let hop = (hop_ms as usize * sample_rate as usize) / 1000;
    if window == 0 || hop == 0 || mono.len() < window {
        return Vec::new();
    }

    let mut values = Vec::new();
    let mut start = 0;
    while start + window <= mono.len() {
        let sum: f64 = mono[start..start + window].iter().map(|x| x * x).sum();
        let rms = (sum / window as f64).sqrt();
        if rms > SILENCE_RMS {
            values.push(20.0 * rms.log10());
        }
        start += hop;
    }
    values
}

/// Dynamic Range: loudest windowed RMS minus average windowed RMS over the
/// mono sum. Requires at least `DR_MIN_WINDOWS` non-silent windows.
pub fn dynamic_range(left: &[f32], right: &[f32], sample_rate: u32) -> Option<f64> {
    let mono = mono_sum(left, right);
    let values = windowed_rms_db(&mono, sample_rate, DR_WINDOW_MS, DR_HOP_MS);
    if values.len() < DR_MIN_WINDOWS {
        return None;
    }
    let peak = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let dr = peak - mean;
    (dr.is_finite() && dr >= 0.0).then_some(dr)
}

/// Crest factor: peak dBFS minus whole-buffer RMS dBFS of the mono sum. The
/// caller supplies the oversampled true peak when available; otherwise the
/// mono sample peak stands in. Implausible results become None.
pub fn crest_factor(left: &[f32], right: &[f32], true_peak_dbfs: Option<f64>) -> Option<f64> {
    let mono = mono_sum(left, right);
    if mono.is_empty() {
        return None;
    }

    let peak_db = match true_peak_dbfs.filter(|p| p.is_finite()) {
        Some(p) => p,
        None => {
            let sample_peak = mono.iter().map(|x| x.abs()).fold(0.0f64, f64::max);
            to_db(sample_peak)?
        }
    };
    let sum: f64 = mono.iter().map(|x| x * x).sum();
    let rms_db = to_db((sum / mono.len() as f64).sqrt())?;

    let crest = peak_db - rms_db;
    (CREST_PLAUSIBLE_DB.0..=CREST_PLAUSIBLE_DB.1)
        .contains(&crest)
        .then_some(crest)
}

pub fn rms_summary(left: &[f32], right: &[f32], sample_rate: u32) -> RmsSummary {
    let mono = mono_sum(left, right);
    let windows = windowed_rms_db(&mono, sample_rate, DR_WINDOW_MS, DR_HOP_MS);
    let (average_db, peak_db) = if windows.is_empty() {
        (None, None)
    } else {
        (
            Some(windows.iter().sum::<f64>() / windows.len() as f64),
            Some(windows.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        )
    };
    RmsSummary {
        average_db,
        peak_db,
        left_db: to_db(channel_rms(left)),
        right_db: to_db(channel_rms(right)),
    }
}
