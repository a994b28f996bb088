//! EMUsort quality scores
//!
//! Four sub-scores per unit, each in `[0, 1]` with problematic units scoring
//! low. The composite is their product so a single failing criterion
//! dominates; the job score is the NaN-ignoring mean of the composites.

use crate::metrics::{MetricParams, QualityMetrics};
use crate::models::ResultsSection;
use crate::stats;
use crate::waveforms::Waveforms;

/// Firing rate (Hz) at which the validity sigmoid crosses one half
pub const FIRING_RATE_LIMIT_HZ: f64 = 200.0;

/// SNR at which the SNR score crosses one half
pub const SNR_MIDPOINT: f64 = 4.0;

const RULE: &str = "------------------------------------------------------------";

/// `1 / (1 + exp(x - 200))`
pub fn sigmoid_dropoff(x: f64) -> f64 {
    1.0 / (1.0 + ((x + 1e-8) - FIRING_RATE_LIMIT_HZ).exp())
}

/// `clip(1 - 1 / (1 + exp(snr - 4)), 0, 1)`
pub fn snr_score(snr: f64) -> f64 {
    let score = 1.0 - 1.0 / (1.0 + (snr - SNR_MIDPOINT).exp());
    score.clamp(0.0, 1.0)
}

pub fn firing_rate_validity(rate: f64, range: f64) -> f64 {
    sigmoid_dropoff(rate) * sigmoid_dropoff(range)
}

pub fn type_i_score(contamination: f64) -> f64 {
    1.0 - contamination
}

/// An undefined amplitude cutoff scores zero
pub fn type_ii_score(amplitude_cutoff: f64, presence_ratio: f64) -> f64 {
    let gaussianity = 1.0 - amplitude_cutoff;
    let gaussianity = if gaussianity.is_nan() { 0.0 } else { gaussianity };
    gaussianity * presence_ratio
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityScoreSet {
    pub unit_ids: Vec<u32>,
    pub snr_scores: Vec<f64>,
    pub firing_rate_validity_scores: Vec<f64>,
    pub type_i_scores: Vec<f64>,
    pub type_ii_scores: Vec<f64>,
    pub emusort_scores: Vec<f64>,
    /// NaN when no unit has a defined composite
    pub emusort_score: f64,
}

impl QualityScoreSet {
    pub fn from_metrics(metrics: &QualityMetrics) -> Self {
        let snr_scores: Vec<f64> = metrics.snrs.iter().map(|&s| snr_score(s)).collect();
        let firing_rate_validity_scores: Vec<f64> = metrics
            .firing_rates
            .iter()
            .zip(&metrics.firing_ranges)
            .map(|(&rate, &range)| firing_rate_validity(rate, range))
            .collect();
        let type_i_scores: Vec<f64> = metrics
            .rp_contaminations
            .iter()
            .map(|&c| type_i_score(c))
            .collect();
        let type_ii_scores: Vec<f64> = metrics
            .amplitude_cutoffs
            .iter()
            .zip(&metrics.presence_ratios)
            .map(|(&cutoff, &presence)| type_ii_score(cutoff, presence))
            .collect();

        let emusort_scores: Vec<f64> = (0..metrics.unit_ids.len())
            .map(|i| {
                snr_scores[i] * firing_rate_validity_scores[i] * type_i_scores[i] * type_ii_scores[i]
            })
            .collect();
        let emusort_score = stats::nanmean(&emusort_scores);

        Self {
            unit_ids: metrics.unit_ids.clone(),
            snr_scores,
            firing_rate_validity_scores,
            type_i_scores,
            type_ii_scores,
            emusort_scores,
            emusort_score,
        }
    }

    /// Job score, `None` when undefined
    pub fn job_score(&self) -> Option<f64> {
        Some(self.emusort_score).filter(|s| !s.is_nan())
    }

    /// Operator-facing report for one worker
    pub fn report(&self, worker: usize) -> String {
        format!(
            "{RULE}\n Worker {worker} Quality Scores Report:\n SNR scores:\n{}\n Firing rate validity:\n{}\n Type I error scores:\n{}\n Type II error scores:\n{}\n EMUsort scores:\n{}\n{RULE}\n Worker {worker} Overall EMUsort score: {:.3}\n{RULE}\n",
            format_scores(&self.snr_scores),
            format_scores(&self.firing_rate_validity_scores),
            format_scores(&self.type_i_scores),
            format_scores(&self.type_ii_scores),
            format_scores(&self.emusort_scores),
            self.emusort_score,
        )
    }

    pub fn to_results(&self) -> ResultsSection {
        ResultsSection {
            unit_ids: self.unit_ids.clone(),
            snr_scores: self.snr_scores.clone(),
            firing_rate_validity_scores: self.firing_rate_validity_scores.clone(),
            type_i_scores: self.type_i_scores.clone(),
            type_ii_scores: self.type_ii_scores.clone(),
            emusort_scores: self.emusort_scores.clone(),
            emusort_score: self.emusort_score,
        }
    }
}

/// `[0.981 0.500 nan]`
pub fn format_scores(scores: &[f64]) -> String {
    let items: Vec<String> = scores
        .iter()
        .map(|s| if s.is_nan() { "nan".to_string() } else { format!("{s:.3}") })
        .collect();
    format!("[{}]", items.join(" "))
}

/// Computes metrics from extracted waveforms and folds them into scores
#[derive(Debug, Clone, Default)]
pub struct QualityScoringEngine {
    params: MetricParams,
}

impl QualityScoringEngine {
    pub fn new(params: MetricParams) -> Self {
        Self { params }
    }

    pub fn score(&self, waveforms: &Waveforms) -> QualityScoreSet {
        let metrics = QualityMetrics::compute(waveforms, &self.params);
        QualityScoreSet::from_metrics(&metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(snrs: Vec<f64>) -> QualityMetrics {
        let n = snrs.len();
        QualityMetrics {
            unit_ids: (0..n as u32).collect(),
            firing_rates: vec![20.0; n],
            firing_ranges: vec![5.0; n],
            presence_ratios: vec![1.0; n],
            rp_contaminations: vec![0.0; n],
            amplitude_cutoffs: vec![0.0; n],
            snrs,
        }
    }

    #[test]
    fn test_snr_score_midpoint_and_range() {
        assert!((snr_score(4.0) - 0.5).abs() < 1e-12);
        for snr in [-1e6, -10.0, 0.0, 3.9, 4.0, 12.0, 1e6] {
            let s = snr_score(snr);
            assert!((0.0..=1.0).contains(&s), "snr {snr} scored {s}");
        }
        assert_eq!(snr_score(f64::INFINITY), 1.0);
    }

    #[test]
    fn test_snr_score_monotonic_above_midpoint() {
        let mut previous = snr_score(4.0);
        let mut snr = 4.0;
        while snr < 40.0 {
            snr += 0.25;
            let s = snr_score(snr);
            assert!(s >= previous, "score fell at snr {snr}");
            previous = s;
        }
    }

    #[test]
    fn test_firing_rate_validity_drops_past_limit() {
        assert!(firing_rate_validity(20.0, 5.0) > 0.999);
        assert!((sigmoid_dropoff(200.0) - 0.5).abs() < 1e-6);
        assert!(firing_rate_validity(400.0, 5.0) < 1e-50);
    }

    #[test]
    fn test_undefined_cutoff_scores_zero() {
        assert_eq!(type_ii_score(f64::NAN, 1.0), 0.0);
        assert_eq!(type_ii_score(0.25, 0.5), 0.375);
        assert_eq!(type_i_score(0.1), 0.9);
    }

    #[test]
    fn test_composite_is_product_and_job_score_ignores_nan() {
        let mut m = metrics(vec![100.0, 100.0, 100.0]);
        m.rp_contaminations = vec![0.0, 0.5, f64::NAN];
        let scores = QualityScoreSet::from_metrics(&m);

        assert!((scores.emusort_scores[0] - 1.0).abs() < 1e-6);
        assert!((scores.emusort_scores[1] - 0.5).abs() < 1e-6);
        assert!(scores.emusort_scores[2].is_nan());
        assert!((scores.emusort_score - 0.75).abs() < 1e-6);
        assert!(scores.job_score().is_some());

        let all_nan = QualityScoreSet::from_metrics(&metrics(vec![f64::NAN]));
        assert_eq!(all_nan.job_score(), None);
    }

    #[test]
    fn test_report_layout() {
        let scores = QualityScoreSet::from_metrics(&metrics(vec![4.0]));
        let report = scores.report(3);
        assert!(report.contains(" Worker 3 Quality Scores Report:"));
        assert!(report.contains(" SNR scores:\n[0.500]"));
        assert!(report.contains(" Worker 3 Overall EMUsort score: 0.500"));
        assert_eq!(format_scores(&[0.1234, f64::NAN]), "[0.123 nan]");
    }
}
