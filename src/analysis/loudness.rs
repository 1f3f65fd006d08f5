//! K-weighted loudness per ITU-R BS.1770-4, gating and loudness range per
//! EBU R128 / Tech 3342.

pub const ABSOLUTE_GATE_LUFS: f64 = -70.0;
pub const RELATIVE_GATE_LU: f64 = -10.0;
/// LRA uses a wider relative gate than integrated loudness.
pub const LRA_RELATIVE_GATE_LU: f64 = -20.0;
pub const BLOCK_SECONDS: f64 = 0.4;
pub const SHORT_TERM_SECONDS: f64 = 3.0;
const BLOCK_OVERLAP: f64 = 0.75;
const LUFS_OFFSET: f64 = -0.691;
const MIN_LRA_WINDOWS: usize = 10;
/// Loudness outside this range is flagged suspicious rather than clamped.
const PLAUSIBLE_LUFS: (f64, f64) = (-70.0, 10.0);

#[derive(Debug, Clone, Copy)]
struct BiquadCoeffs {
    a1: f64,
    a2: f64,
    b0: f64,
    b1: f64,
    b2: f64,
}

// ITU-R BS.1770-4 reference coefficients, defined at 48 kHz. Stage one is the
// high-frequency shelf, stage two the high-pass.
const REFERENCE_SAMPLE_RATE: u32 = 48_000;
const SHELF_48K: BiquadCoeffs = BiquadCoeffs {
    a1: -1.69065929318241,
    a2: 0.73248077421585,
    b0: 1.53512485958697,
    b1: -2.69169618940638,
    b2: 1.19839281085285,
};
const HIGHPASS_48K: BiquadCoeffs = BiquadCoeffs {
    a1: -1.99004745483398,
    a2: 0.99007225036621,
    b0: 1.0,
    b1: -2.0,
    b2: 1.0,
};

impl BiquadCoeffs {
    /// Recomputes the coefficients for a different sample rate while keeping
    /// the same analog characteristics (K-Meter requantization method).
    fn requantize(&self, target_sample_rate: u32) -> Self {
        if target_sample_rate == REFERENCE_SAMPLE_RATE {
            return *self;
        }

        let x11 = self.a1 - 2.0;
        let x12 = self.a1;
        let x1 = -self.a1 - 2.0;
        let x21 = self.a2 - 1.0;
        let x22 = self.a2 + 1.0;
        let x2 = -self.a2 + 1.0;

        let dx = x22 * x11 - x12 * x21;
        let k_sq = (x22 * x1 - x12 * x2) / dx;
        let k_by_q = (x11 * x2 - x21 * x1) / dx;
        let a0 = 1.0 + k_by_q + k_sq;

        let k = k_sq.sqrt();
        let q = k / k_by_q;
        let vb = 0.5 * a0 * (self.b0 - self.b2) / k_by_q;
        let vl = 0.25 * a0 * (self.b0 + self.b1 + self.b2) / k_sq;
        let vh = 0.25 * a0 * (self.b0 - self.b1 + self.b2);

        let k = ((REFERENCE_SAMPLE_RATE as f64 / target_sample_rate as f64) * k.atan()).tan();
        let k_sq = k * k;
        let k_by_q = k / q;
        let a0 = 1.0 + k_by_q + k_sq;

        BiquadCoeffs {
            a1: (2.0 * (k_sq - 1.0)) / a0,
            a2: (1.0 - k_by_q + k_sq) / a0,
            b0: (vh + vb * k_by_q + vl * k_sq) / a0,
            b1: (2.0 * (vl * k_sq - vh)) / a0,
            b2: (vh - vb * k_by_q + vl * k_sq) / a0,
        }
    }
}

/// Direct form I biquad with internal state. One instance per channel per
/// analysis; state starts zeroed.
struct Biquad {
    c: BiquadCoeffs,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    fn new(c: BiquadCoeffs) -> Self {
        Self { c, x1: 0.0, x2: 0.0, y1: 0.0, y2: 0.0 }
    }

    fn process(&mut self, x0: f64) -> f64 {
        let y0 = self.c.b0 * x0 + self.c.b1 * self.x1 + self.c.b2 * self.x2
            - self.c.a1 * self.y1
            - self.c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x0;
        self.y2 = self.y1;
        self.y1 = y0;
        y0
    }
}

/// Two-stage K-weighting chain (shelf, then high-pass).
struct KWeighting {
    shelf: Biquad,
    highpass: Biquad,
}

impl KWeighting {
    fn new(sample_rate: u32) -> Self {
        Self {
            shelf: Biquad::new(SHELF_48K.requantize(sample_rate)),
            highpass: Biquad::new(HIGHPASS_48K.requantize(sample_rate)),
        }
    }

    fn process_channel(&mut self, samples: &[f32]) -> Vec<f64> {
        samples
            .iter()
            .map(|&s| self.highpass.process(self.shelf.process(s as f64)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatingInfo {
    pub absolute_threshold: f64,
    pub relative_threshold: Option<f64>,
    pub gated_blocks: usize,
    pub total_blocks: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoudnessResult {
    pub integrated: Option<f64>,
    /// 3 s short-term loudness series, 100 ms hop.
    pub short_term: Vec<f64>,
    /// Median of the gating-active short-term windows. The last window alone
    /// can land in a fade-out and report an unrepresentative value.
    pub short_term_representative: Option<f64>,
    /// Maximum 400 ms momentary block loudness.
    pub momentary: Option<f64>,
    pub lra: Option<f64>,
    pub gating: GatingInfo,
    pub suspicious: bool,
}

impl LoudnessResult {
    pub(crate) fn invalid() -> Self {
        Self {
            integrated: None,
            short_term: Vec::new(),
            short_term_representative: None,
            momentary: None,
            lra: None,
            gating: GatingInfo {
                absolute_threshold: ABSOLUTE_GATE_LUFS,
                relative_threshold: None,
                gated_blocks: 0,
                total_blocks: 0,
            },
            suspicious: false,
        }
    }
}

fn energy_to_lufs(energy: f64) -> f64 {
    if energy > 0.0 {
        LUFS_OFFSET + 10.0 * energy.log10()
    } else {
        f64::NEG_INFINITY
    }
}

/// Mean-square energy (both channels summed, weights 1.0) per 400 ms block at
/// 75% overlap. A buffer shorter than one block yields a single partial block
/// so very short material still measures at its actual level.
fn block_energies(left: &[f64], right: &[f64], sample_rate: u32) -> Vec<f64> {
    let block = (BLOCK_SECONDS * sample_rate as f64).round() as usize;
    let hop = ((1.0 - BLOCK_OVERLAP) * block as f64).round() as usize;
    let len = left.len().min(right.len());

    if len == 0 {
        return Vec::new();
    }
    if len < block {
        let ms_l = left[..len].iter().map(|x| x * x).sum::<f64>() / len as f64;
        let ms_r = right[..len].iter().map(|x| x * x).sum::<f64>() / len as f64;
        return vec![ms_l + ms_r];
    }

    let count = (len - block) / hop + 1;
    let mut energies = Vec::with_capacity(count);
    for idx in 0..count {
        let start = idx * hop;
        let end = start + block;
        let mut sum_l = 0.0;
        let mut sum_r = 0.0;
        for i in start..end {
            sum_l += left[i] * left[i];
            sum_r += right[i] * right[i];
        }
        energies.push((sum_l + sum_r) / block as f64);
    }
    energies
}

/// Short-term (3 s) loudness from consecutive block energies at 100 ms hop.
fn short_term_series(block_energies: &[f64]) -> Vec<f64> {
    // (3.0 - 0.4) / 0.1 + 1 blocks cover one 3 s window
    let per_window = ((SHORT_TERM_SECONDS - BLOCK_SECONDS) / (BLOCK_SECONDS * (1.0 - BLOCK_OVERLAP)))
        .round() as usize
        + 1;
    if block_energies.len() < per_window {
        return Vec::new();
    }
    (0..=block_energies.len() - per_window)
        .map(|i| {
            let mean = block_energies[i..i + per_window].iter().sum::<f64>() / per_window as f64;
            energy_to_lufs(mean)
        })
        .collect()
}

fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    let idx = ((sorted.len() as f64 * q) as usize).min(sorted.len() - 1);
    sorted[idx]
}

/// Measures LUFS-family metrics over one stereo buffer. Returns null fields
/// rather than erroring when the material is too short for a given metric.
pub fn measure(left: &[f32], right: &[f32], sample_rate: u32) -> LoudnessResult {
    if left.is_empty() || right.is_empty() || sample_rate == 0 {
        return LoudnessResult::invalid();
    }

    let filtered_left = KWeighting::new(sample_rate).process_channel(left);
    let filtered_right = KWeighting::new(sample_rate).process_channel(right);

    let energies = block_energies(&filtered_left, &filtered_right, sample_rate);
    if energies.is_empty() {
        return LoudnessResult::invalid();
    }
    let total_blocks = energies.len();
    let block_loudness: Vec<f64> = energies.iter().map(|&e| energy_to_lufs(e)).collect();

    let momentary = block_loudness
        .iter()
        .copied()
        .filter(|l| l.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    let momentary = momentary.is_finite().then_some(momentary);

    // Absolute gate, then relative gate off the abs-gated mean.
    let abs_gated: Vec<f64> = energies
        .iter()
        .zip(&block_loudness)
        .filter(|(_, &l)| l >= ABSOLUTE_GATE_LUFS)
        .map(|(&e, _)| e)
        .collect();

    let (integrated, relative_threshold, gated_blocks) = if abs_gated.is_empty() {
        (None, None, 0)
    } else {
        let prelim = energy_to_lufs(abs_gated.iter().sum::<f64>() / abs_gated.len() as f64);
        let threshold = prelim + RELATIVE_GATE_LU;
        let rel_gated: Vec<f64> = energies
            .iter()
            .zip(&block_loudness)
            .filter(|(_, &l)| l >= ABSOLUTE_GATE_LUFS && l >= threshold)
            .map(|(&e, _)| e)
            .collect();
        if rel_gated.is_empty() {
            (Some(prelim), Some(threshold), abs_gated.len())
        } else {
            let lufs = energy_to_lufs(rel_gated.iter().sum::<f64>() / rel_gated.len() as f64);
            (Some(lufs), Some(threshold), rel_gated.len())
        }
    };

    let short_term = short_term_series(&energies);

    let short_term_representative = integrated.and_then(|integ| {
        let mut active: Vec<f64> = short_term
            .iter()
            .copied()
            .filter(|&v| v.is_finite() && v >= ABSOLUTE_GATE_LUFS && v >= integ + RELATIVE_GATE_LU)
            .collect();
        if active.is_empty() {
            return short_term.last().copied().filter(|v| v.is_finite());
        }
        active.sort_by(|a, b| a.partial_cmp(b).unwrap());
        Some(median(&active))
    });

    // EBU Tech 3342: absolute gate, then integrated - 20 LU, then p95 - p10.
    let lra = integrated.and_then(|integ| {
        let mut gated: Vec<f64> = short_term
            .iter()
            .copied()
            .filter(|&v| {
                v.is_finite() && v >= ABSOLUTE_GATE_LUFS && v >= integ + LRA_RELATIVE_GATE_LU
            })
            .collect();
        if gated.len() < MIN_LRA_WINDOWS {
            return None;
        }
        gated.sort_by(|a, b| a.partial_cmp(b).unwrap());
        Some(percentile(&gated, 0.95) - percentile(&gated, 0.10))
    });

    let suspicious = integrated
        .map(|v| v < PLAUSIBLE_LUFS.0 || v > PLAUSIBLE_LUFS.1)
        .unwrap_or(false);
    if suspicious {
        log::warn!(
            "integrated loudness {:?} LUFS outside plausible range [{}, {}]",
            integrated,
            PLAUSIBLE_LUFS.0,
            PLAUSIBLE_LUFS.1
        );
    }

    LoudnessResult {
        integrated,
        short_term,
        short_term_representative,
        momentary,
        lra,
        gating: GatingInfo {
            absolute_threshold: ABSOLUTE_GATE_LUFS,
            relative_threshold,
            gated_blocks,
            total_blocks,
        },
        suspicious,
    }
}
