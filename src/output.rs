//! Final report object consumed by the external JSON/scoring layer.

use serde::Serialize;

use crate::analysis::spectral::BandStatus;
use crate::analysis::CoreMetrics;
use crate::comparison::ComparisonOutput;
use crate::AnalysisOptions;

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TruePeakSection {
    /// Null for digital silence (negative-infinity sentinel) or a failed
    /// detector.
    pub max_dbtp: Option<f64>,
    pub max_linear: Option<f64>,
    pub clipping_samples: usize,
    pub oversampling_factor: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LufsSection {
    pub integrated: Option<f64>,
    pub short_term: Option<f64>,
    pub momentary: Option<f64>,
    pub lra: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RmsSection {
    pub average: Option<f64>,
    pub peak: Option<f64>,
    pub left: Option<f64>,
    pub right: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicsSection {
    pub dynamic_range_db: Option<f64>,
    pub crest_factor_db: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StereoSection {
    pub correlation: f64,
    pub width: f64,
    pub balance: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BandSection {
    pub energy_db: Option<f64>,
    pub percentage: Option<f64>,
    pub status: BandStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BandsSection {
    pub sub: BandSection,
    pub bass: BandSection,
    pub low_mid: BandSection,
    pub mid: BandSection,
    pub high_mid: BandSection,
    pub presence: BandSection,
    pub air: BandSection,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectralBandsSection {
    pub bands: BandsSection,
    pub total_percentage: Option<f64>,
    pub frames_used: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarningSection {
    pub metric: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub true_peak: TruePeakSection,
    pub lufs: LufsSection,
    pub rms: RmsSection,
    pub dynamics: DynamicsSection,
    pub stereo: StereoSection,
    pub spectral_bands: SpectralBandsSection,
    pub comparison: ComparisonOutput,
    /// Non-empty when the report is partial: each entry names a metric that
    /// degraded to null and why.
    pub warnings: Vec<WarningSection>,
}

pub fn build_report(
    metrics: &CoreMetrics,
    comparison: ComparisonOutput,
    options: &AnalysisOptions,
) -> AnalysisReport {
    let band = |i: usize| {
        let b = &metrics.bands.bands[i];
        BandSection {
            energy_db: finite(b.energy_db),
            percentage: finite(b.percentage),
            status: b.status,
        }
    };

    AnalysisReport {
        job_id: options.job_id.clone(),
        file_name: options.file_name.clone(),
        true_peak: TruePeakSection {
            max_dbtp: finite(metrics.true_peak.as_ref().map(|tp| tp.peak_dbtp)),
            max_linear: metrics
                .true_peak
                .as_ref()
                .map(|tp| tp.peak_linear)
                .filter(|v| *v > 0.0),
            clipping_samples: metrics.true_peak.as_ref().map_or(0, |tp| tp.clipping_samples),
            oversampling_factor: metrics
                .true_peak
                .as_ref()
                .map_or(options.config.oversampling.factor() as u32, |tp| tp.oversampling),
        },
        lufs: LufsSection {
            integrated: finite(metrics.loudness.integrated),
            short_term: finite(metrics.loudness.short_term_representative),
            momentary: finite(metrics.loudness.momentary),
            lra: finite(metrics.loudness.lra),
        },
        rms: RmsSection {
            average: finite(metrics.rms.average_db),
            peak: finite(metrics.rms.peak_db),
            left: finite(metrics.rms.left_db),
            right: finite(metrics.rms.right_db),
        },
        dynamics: DynamicsSection {
            dynamic_range_db: finite(metrics.dynamics.dynamic_range_db),
            crest_factor_db: finite(metrics.dynamics.crest_factor_db),
        },
        stereo: StereoSection {
            correlation: metrics.stereo.correlation,
            width: metrics.stereo.width,
            balance: metrics.stereo.balance,
        },
        spectral_bands: SpectralBandsSection {
            bands: BandsSection {
                sub: band(0),
                bass: band(1),
                low_mid: band(2),
                mid: band(3),
                high_mid: band(4),
                presence: band(5),
                air: band(6),
            },
            total_percentage: finite(metrics.bands.total_percentage),
            frames_used: metrics.bands.frames_used,
        },
        comparison,
        warnings: metrics
            .warnings
            .iter()
            .map(|w| WarningSection { metric: w.metric, message: w.message.clone() })
            .collect(),
    }
}
