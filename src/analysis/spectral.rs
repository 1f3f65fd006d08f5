//! 7-band spectral balance analysis over FFT magnitude frames.
//!
//! Percentages are energy-density normalized: each band's energy is divided
//! by its bandwidth in Hz before taking proportions, so a 1500 Hz wide band
//! does not dominate a 40 Hz wide band merely by spanning more bins.

use rustfft::{num_complex::Complex, FftPlanner};
use serde::Serialize;

/// Calibrated mapping from band RMS amplitude to the reported dB figure:
/// `energy_db = ENERGY_DB_CALIBRATION_OFFSET + 10*log10(rms)`, clamped at 0.
/// This is an empirically tuned calibration inherited from the production
/// reference tables, not a first-principles dBFS conversion; changing it
/// shifts every absolute band dB output.
pub const ENERGY_DB_CALIBRATION_OFFSET: f64 = -40.0;

const MIN_TOTAL_ENERGY: f64 = 1e-12;
const MIN_BAND_ENERGY: f64 = 1e-12;

#[derive(Debug, Clone, Copy)]
pub struct BandDef {
    pub key: &'static str,
    pub label: &'static str,
    pub low_hz: f64,
    pub high_hz: f64,
}

pub const BANDS: [BandDef; 7] = [
    BandDef { key: "sub", label: "Sub", low_hz: 20.0, high_hz: 60.0 },
    BandDef { key: "bass", label: "Bass", low_hz: 60.0, high_hz: 150.0 },
    BandDef { key: "lowMid", label: "Low-Mid", low_hz: 150.0, high_hz: 500.0 },
    BandDef { key: "mid", label: "Mid", low_hz: 500.0, high_hz: 2000.0 },
    BandDef { key: "highMid", label: "High-Mid", low_hz: 2000.0, high_hz: 5000.0 },
    BandDef { key: "presence", label: "Presence", low_hz: 5000.0, high_hz: 10000.0 },
    BandDef { key: "air", label: "Air", low_hz: 10000.0, high_hz: 20000.0 },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BandStatus {
    Calculated,
    NotCalculated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BandResult {
    pub energy: Option<f64>,
    pub energy_db: Option<f64>,
    pub percentage: Option<f64>,
    pub status: BandStatus,
}

impl BandResult {
    fn not_calculated() -> Self {
        Self { energy: None, energy_db: None, percentage: None, status: BandStatus::NotCalculated }
    }
}

#[derive(Debug, Clone)]
pub struct FrameBands {
    pub bands: [BandResult; 7],
    pub valid: bool,
}

#[derive(Debug, Clone)]
pub struct AggregatedBands {
    pub bands: [BandResult; 7],
    pub total_percentage: Option<f64>,
    pub frames_used: usize,
}

impl AggregatedBands {
    pub fn not_calculated() -> Self {
        Self {
            bands: std::array::from_fn(|_| BandResult::not_calculated()),
            total_percentage: None,
            frames_used: 0,
        }
    }
}

/// Magnitude spectrum (first N/2 bins) of one pre-windowed frame.
pub fn magnitude_spectrum(frame: &[f32]) -> Vec<f32> {
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(frame.len());
    let mut buffer: Vec<Complex<f32>> = frame.iter().map(|&s| Complex::new(s, 0.0)).collect();
    fft.process(&mut buffer);
    buffer[..frame.len() / 2].iter().map(|c| c.norm()).collect()
}

pub struct SpectralBandAnalyzer {
    // inclusive bin range and bin count per band
    band_bins: [(usize, usize, usize); 7],
    /// Bandwidth actually covered by each band's bins, in Hz. Density
    /// normalization uses this, not the nominal band edges, so edge-bin
    /// rounding cannot bias narrow bands.
    band_widths_hz: [f64; 7],
}

impl SpectralBandAnalyzer {
    pub fn new(sample_rate: u32, fft_size: usize) -> Self {
        let resolution = sample_rate as f64 / fft_size as f64;
        let half = fft_size / 2;
        let band_bins: [(usize, usize, usize); 7] = std::array::from_fn(|i| {
            let band = &BANDS[i];
            let min_bin = ((band.low_hz / resolution).floor() as usize).max(1);
            let max_bin = ((band.high_hz / resolution).ceil() as usize).min(half.saturating_sub(1));
            let count = max_bin.saturating_sub(min_bin) + 1;
            (min_bin, max_bin, count)
        });
        let band_widths_hz = std::array::from_fn(|i| band_bins[i].2 as f64 * resolution);
        Self { band_bins, band_widths_hz }
    }

    /// Combines the stereo spectra per bin as sqrt((L^2 + R^2) / 2), sums
    /// squared magnitude per band, and derives density-normalized
    /// percentages plus the calibrated band dB figure.
    pub fn analyze_frame(&self, left_mag: &[f32], right_mag: &[f32]) -> FrameBands {
        let len = left_mag.len().min(right_mag.len());

        let mut energies = [0.0f64; 7];
        let mut total = 0.0f64;
        for (band, &(min_bin, max_bin, _)) in self.band_bins.iter().enumerate() {
            let mut sum = 0.0f64;
            for bin in min_bin..=max_bin.min(len.saturating_sub(1)) {
                let l = left_mag[bin] as f64;
                let r = right_mag[bin] as f64;
                // per-bin stereo RMS, squared: (L^2 + R^2) / 2
                sum += (l * l + r * r) / 2.0;
            }
            energies[band] = sum;
            total += sum;
        }

        if total < MIN_TOTAL_ENERGY {
            return FrameBands {
                bands: std::array::from_fn(|_| BandResult::not_calculated()),
                valid: false,
            };
        }

        let percentages = density_percentages(&energies, &self.band_widths_hz);

        let bands = std::array::from_fn(|i| {
            let energy = energies[i];
            let (_, _, bin_count) = self.band_bins[i];
            let energy_db = if energy > MIN_BAND_ENERGY {
                let rms = (energy / bin_count as f64).sqrt();
                Some((ENERGY_DB_CALIBRATION_OFFSET + 10.0 * rms.log10()).min(0.0))
            } else {
                None
            };
            BandResult {
                energy: Some(energy),
                energy_db,
                percentage: Some(percentages[i]),
                status: BandStatus::Calculated,
            }
        });

        FrameBands { bands, valid: true }
    }
}

/// Energy-density proportions rescaled so the seven values sum to exactly
/// 100, with the rounding residual distributed proportionally.
fn density_percentages(energies: &[f64; 7], widths_hz: &[f64; 7]) -> [f64; 7] {
    let mut densities = [0.0f64; 7];
    let mut total_density = 0.0f64;
    for i in 0..7 {
        densities[i] = energies[i] / widths_hz[i];
        total_density += densities[i];
    }

    let mut pct = [0.0f64; 7];
    if total_density <= 0.0 {
        return pct;
    }
    let mut sum = 0.0f64;
    for i in 0..7 {
        pct[i] = densities[i] / total_density * 100.0;
        sum += pct[i];
    }
    if sum > 0.0 && (sum - 100.0).abs() > 1e-9 {
        let scale = 100.0 / sum;
        for p in pct.iter_mut() {
            *p *= scale;
        }
    }
    pct
}

fn median_of(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

impl SpectralBandAnalyzer {
    /// Aggregates per-frame band results over a whole track. Median (not
    /// mean) of per-frame energy and dB suppresses transient outlier frames;
    /// aggregate percentages are recomputed from the aggregated energies so
    /// the 100% sum invariant survives aggregation.
    pub fn aggregate(&self, frames: &[FrameBands]) -> AggregatedBands {
        let valid: Vec<&FrameBands> = frames.iter().filter(|f| f.valid).collect();
        if valid.is_empty() {
            return AggregatedBands::not_calculated();
        }

        let mut median_energy = [0.0f64; 7];
        let mut median_db: [Option<f64>; 7] = [None; 7];
        for i in 0..7 {
            let energies: Vec<f64> = valid.iter().filter_map(|f| f.bands[i].energy).collect();
            median_energy[i] = median_of(energies).unwrap_or(0.0);
            let dbs: Vec<f64> = valid.iter().filter_map(|f| f.bands[i].energy_db).collect();
            median_db[i] = median_of(dbs);
        }

        let percentages = density_percentages(&median_energy, &self.band_widths_hz);
        let mut total_percentage = 0.0f64;
        let bands = std::array::from_fn(|i| {
            total_percentage += percentages[i];
            BandResult {
                energy: Some(median_energy[i]),
                energy_db: median_db[i],
                percentage: Some(percentages[i]),
                status: BandStatus::Calculated,
            }
        });

        AggregatedBands { bands, total_percentage: Some(total_percentage), frames_used: valid.len() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SR: u32 = 48_000;
    const FFT: usize = 4096;

    fn flat_spectrum(mag: f32) -> Vec<f32> {
        vec![mag; FFT / 2]
    }

    #[test]
    fn percentages_sum_to_hundred() {
        let analyzer = SpectralBandAnalyzer::new(SR, FFT);
        let spectrum = flat_spectrum(0.1);
        let frame = analyzer.analyze_frame(&spectrum, &spectrum);
        assert!(frame.valid);
        let sum: f64 = frame.bands.iter().filter_map(|b| b.percentage).sum();
        assert_abs_diff_eq!(sum, 100.0, epsilon = 0.1);
    }

    #[test]
    fn flat_spectrum_splits_evenly_by_density() {
        // Equal magnitude everywhere means equal energy density, so each of
        // the 7 bands takes 1/7th despite wildly different bandwidths.
        let analyzer = SpectralBandAnalyzer::new(SR, FFT);
        let spectrum = flat_spectrum(0.1);
        let frame = analyzer.analyze_frame(&spectrum, &spectrum);
        for band in &frame.bands {
            assert_abs_diff_eq!(band.percentage.unwrap(), 100.0 / 7.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn energy_db_never_positive() {
        let analyzer = SpectralBandAnalyzer::new(SR, FFT);
        for mag in [0.001f32, 0.5, 10.0, 1000.0] {
            let spectrum = flat_spectrum(mag);
            let frame = analyzer.analyze_frame(&spectrum, &spectrum);
            for band in &frame.bands {
                if let Some(db) = band.energy_db {
                    assert!(db <= 0.0, "mag {mag} produced {db} dB");
                }
            }
        }
    }

    #[test]
    fn silent_frame_is_not_calculated() {
        let analyzer = SpectralBandAnalyzer::new(SR, FFT);
        let spectrum = flat_spectrum(0.0);
        let frame = analyzer.analyze_frame(&spectrum, &spectrum);
        assert!(!frame.valid);
        for band in &frame.bands {
            assert_eq!(band.status, BandStatus::NotCalculated);
            assert_eq!(band.energy_db, None);
        }
    }

    #[test]
    fn aggregate_median_resists_outlier_frames() {
        let analyzer = SpectralBandAnalyzer::new(SR, FFT);
        let quiet = flat_spectrum(0.1);
        let loud = flat_spectrum(100.0);
        let mut frames: Vec<FrameBands> =
            (0..9).map(|_| analyzer.analyze_frame(&quiet, &quiet)).collect();
        frames.push(analyzer.analyze_frame(&loud, &loud));

        let agg = analyzer.aggregate(&frames);
        assert_eq!(agg.frames_used, 10);
        let quiet_db = analyzer.analyze_frame(&quiet, &quiet).bands[0].energy_db.unwrap();
        assert_abs_diff_eq!(agg.bands[0].energy_db.unwrap(), quiet_db, epsilon = 1e-9);
    }

    #[test]
    fn aggregate_percentages_recomputed_sum_to_hundred() {
        let analyzer = SpectralBandAnalyzer::new(SR, FFT);
        // Different tilt per frame so averaging percentages naively would drift.
        let rising: Vec<f32> = (0..FFT / 2).map(|i| 0.001 + i as f32 * 1e-5).collect();
        let falling: Vec<f32> = rising.iter().rev().copied().collect();
        let frames = vec![
            analyzer.analyze_frame(&rising, &rising),
            analyzer.analyze_frame(&falling, &falling),
        ];
        let agg = analyzer.aggregate(&frames);
        assert_abs_diff_eq!(agg.total_percentage.unwrap(), 100.0, epsilon = 0.1);
    }

    #[test]
    fn no_valid_frames_yields_null_set() {
        let agg = SpectralBandAnalyzer::new(SR, FFT).aggregate(&[]);
        assert_eq!(agg.frames_used, 0);
        assert_eq!(agg.total_percentage, None);
        assert!(agg.bands.iter().all(|b| b.status == BandStatus::NotCalculated));
    }

    #[test]
    fn magnitude_spectrum_peaks_at_tone_bin() {
        // 1 kHz tone at 48 kHz / 4096 bins lands near bin 85
        let frame: Vec<f32> = (0..FFT)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / SR as f32).sin())
            .collect();
        let mags = magnitude_spectrum(&frame);
        let peak_bin = mags
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        let expected = (1000.0 * FFT as f32 / SR as f32).round() as usize;
        assert!((peak_bin as isize - expected as isize).abs() <= 1);
    }
}
