//! Per-unit quality metrics
//!
//! Each metric maps a unit to one value, NaN when it is undefined for that
//! unit (too few spikes, recording shorter than one bin). Units follow the
//! order of [`Waveforms::units`].

use crate::stats;
use crate::waveforms::Waveforms;

/// Metric parameters
#[derive(Debug, Clone, PartialEq)]
pub struct MetricParams {
    pub refractory_period_ms: f64,
    pub censored_period_ms: f64,
    pub presence_bin_s: f64,
    pub presence_rate_ratio: f64,
    pub firing_range_bin_s: f64,
    pub firing_range_percentiles: (f64, f64),
    pub cutoff_bins: usize,
    pub cutoff_min_per_bin: usize,
    pub cutoff_smoothing: f64,
}

impl Default for MetricParams {
    fn default() -> Self {
        Self {
            refractory_period_ms: 1.0,
            censored_period_ms: 0.0,
            presence_bin_s: 20.0,
            presence_rate_ratio: 0.5,
            firing_range_bin_s: 0.5,
            firing_range_percentiles: (5.0, 95.0),
            cutoff_bins: 32,
            cutoff_min_per_bin: 4,
            cutoff_smoothing: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityMetrics {
    pub unit_ids: Vec<u32>,
    pub firing_rates: Vec<f64>,
    pub firing_ranges: Vec<f64>,
    pub presence_ratios: Vec<f64>,
    pub rp_contaminations: Vec<f64>,
    pub amplitude_cutoffs: Vec<f64>,
    pub snrs: Vec<f64>,
}

impl QualityMetrics {
    pub fn compute(waveforms: &Waveforms, params: &MetricParams) -> Self {
        let duration = waveforms.duration();
        let fs = waveforms.sampling_frequency;
        let n = waveforms.num_samples;

        let mut metrics = QualityMetrics {
            unit_ids: waveforms.unit_ids(),
            firing_rates: Vec::new(),
            firing_ranges: Vec::new(),
            presence_ratios: Vec::new(),
            rp_contaminations: Vec::new(),
            amplitude_cutoffs: Vec::new(),
            snrs: Vec::new(),
        };
        for unit in &waveforms.units {
            let train = &unit.spike_train;
            metrics.firing_rates.push(firing_rate(train.len(), duration));
            metrics.firing_ranges.push(firing_range(
                train,
                n,
                fs,
                params.firing_range_bin_s,
                params.firing_range_percentiles,
            ));
            metrics.presence_ratios.push(presence_ratio(
                train,
                n,
                fs,
                params.presence_bin_s,
                params.presence_rate_ratio,
            ));
            metrics.rp_contaminations.push(rp_contamination(
                train,
                n,
                fs,
                params.refractory_period_ms,
                params.censored_period_ms,
            ));
            metrics.amplitude_cutoffs.push(amplitude_cutoff(
                &unit.amplitudes,
                params.cutoff_bins,
                params.cutoff_min_per_bin,
                params.cutoff_smoothing,
            ));
            let noise = waveforms
                .noise_levels
                .get(unit.extremum_channel)
                .copied()
                .unwrap_or(f64::NAN);
            metrics.snrs.push(unit.peak_amplitude() / noise);
        }
        metrics
    }
}

pub fn firing_rate(num_spikes: usize, duration_s: f64) -> f64 {
    num_spikes as f64 / duration_s
}

/// Spike counts in consecutive bins of `bin_samples`; the final edge is inclusive
fn binned_counts(train: &[i64], num_samples: usize, bin_samples: usize) -> Vec<usize> {
    let num_bins = num_samples / bin_samples;
    let mut counts = vec![0usize; num_bins];
    for &t in train {
        if t < 0 {
            continue;
        }
        let mut bin = t as usize / bin_samples;
        if bin == num_bins && t as usize == num_bins * bin_samples {
            bin -= 1;
        }
        if let Some(count) = counts.get_mut(bin) {
            *count += 1;
        }
    }
    counts
}

/// Spread between the high and low percentile of binned firing rates
pub fn firing_range(
    train: &[i64],
    num_samples: usize,
    fs: f64,
    bin_s: f64,
    (low, high): (f64, f64),
) -> f64 {
    let bin_samples = (bin_s * fs) as usize;
    if bin_samples == 0 || num_samples < bin_samples {
        return f64::NAN;
    }
    let rates: Vec<f64> = binned_counts(train, num_samples, bin_samples)
        .into_iter()
        .map(|c| c as f64 / bin_s)
        .collect();
    stats::percentile(&rates, high) - stats::percentile(&rates, low)
}

/// Fraction of bins holding more than `ratio` of the unit's mean spike count per bin
pub fn presence_ratio(
    train: &[i64],
    num_samples: usize,
    fs: f64,
    bin_s: f64,
    ratio: f64,
) -> f64 {
    let bin_samples = (bin_s * fs) as usize;
    if bin_samples == 0 || num_samples < bin_samples {
        return f64::NAN;
    }
    let unit_rate = train.len() as f64 / (num_samples as f64 / fs);
    let threshold = (unit_rate * bin_s * ratio).floor() as usize;
    let counts = binned_counts(train, num_samples, bin_samples);
    let present = counts.iter().filter(|&&c| c > threshold).count();
    present as f64 / counts.len() as f64
}

/// Refractory-period contamination estimate (Llobet et al.)
///
/// Counts spike pairs closer than the refractory period but further apart
/// than the censored period, then solves for the contaminating rate.
pub fn rp_contamination(
    train: &[i64],
    num_samples: usize,
    fs: f64,
    refractory_ms: f64,
    censored_ms: f64,
) -> f64 {
    let n = train.len();
    if n == 0 {
        return f64::NAN;
    }
    let t_r = (refractory_ms * fs * 1e-3).round() as i64;
    let t_c = (censored_ms * fs * 1e-3).round() as i64;

    let mut violations = 0u64;
    for (i, &ti) in train.iter().enumerate() {
        for &tj in &train[i + 1..] {
            let gap = tj - ti;
            if gap > t_r {
                break;
            }
            if gap > t_c {
                violations += 1;
            }
        }
    }

    let t = num_samples as f64;
    let n = n as f64;
    let window = (t_r - t_c) as f64;
    if window <= 0.0 {
        return f64::NAN;
    }
    let d = 1.0 - violations as f64 * (t - 2.0 * n * t_c as f64) / (n * n * window);
    if d < 0.0 {
        1.0
    } else {
        1.0 - d.sqrt()
    }
}

/// Estimated fraction of spikes missed below the detection threshold
///
/// The amplitude histogram is smoothed and the tail beyond the point where
/// the upper flank falls back to the level of the lowest bin is integrated.
/// NaN with fewer than `min_per_bin` spikes per bin on average; capped at 0.5.
pub fn amplitude_cutoff(amplitudes: &[f64], bins: usize, min_per_bin: usize, smoothing: f64) -> f64 {
    let values: Vec<f64> = amplitudes.iter().copied().filter(|v| v.is_finite()).collect();
    if bins == 0 || values.len() < bins * min_per_bin {
        return f64::NAN;
    }
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let (lo, hi) = if hi > lo { (lo, hi) } else { (lo - 0.5, hi + 0.5) };
    let width = (hi - lo) / bins as f64;

    let mut counts = vec![0usize; bins];
    for v in &values {
        let bin = (((v - lo) / width) as usize).min(bins - 1);
        counts[bin] += 1;
    }
    let density: Vec<f64> = counts
        .iter()
        .map(|&c| c as f64 / (values.len() as f64 * width))
        .collect();
    let pdf = gaussian_smooth(&density, smoothing);

    let peak = pdf
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
        .0;
    let floor = pdf[0];
    let g = pdf[peak..]
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, &p)| {
            let distance = (p - floor).abs();
            if distance < best.1 {
                (i, distance)
            } else {
                best
            }
        })
        .0
        + peak;

    let missing = pdf[g..].iter().sum::<f64>() * width;
    missing.min(0.5)
}

/// Gaussian smoothing with mirrored edges and a kernel truncated at four sigma
pub fn gaussian_smooth(values: &[f64], sigma: f64) -> Vec<f64> {
    if values.is_empty() || sigma <= 0.0 {
        return values.to_vec();
    }
    let radius = (4.0 * sigma + 0.5) as i64;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x as f64 / sigma).powi(2)).exp())
        .collect();
    let total: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= total);

    let n = values.len() as i64;
    let reflect = |mut i: i64| -> usize {
        let period = 2 * n;
        i = i.rem_euclid(period);
        if i >= n {
            i = period - 1 - i;
        }
        i as usize
    };

    (0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * values[reflect(i + k as i64 - radius)])
                .sum()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firing_rate() {
        assert_eq!(firing_rate(50, 10.0), 5.0);
    }

    #[test]
    fn test_regular_train_is_uncontaminated() {
        // 10 Hz at 1 kHz for 100 s
        let train: Vec<i64> = (0..1000).map(|i| i * 100).collect();
        assert_eq!(rp_contamination(&train, 100_000, 1000.0, 1.0, 0.0), 0.0);
    }

    #[test]
    fn test_violations_raise_contamination() {
        let mut train: Vec<i64> = (0..100).map(|i| i * 100).collect();
        train.extend((0..20).map(|i| i * 100 + 1));
        train.sort();
        let c = rp_contamination(&train, 10_000, 1000.0, 1.0, 0.0);
        assert!(c > 0.0 && c <= 1.0, "contamination {c}");
        assert!(rp_contamination(&[], 10_000, 1000.0, 1.0, 0.0).is_nan());
    }

    #[test]
    fn test_presence_ratio() {
        // 100 s at 1 kHz, spikes only in the first half
        let train: Vec<i64> = (0..500).map(|i| i * 100).collect();
        let ratio = presence_ratio(&train, 100_000, 1000.0, 20.0, 0.5);
        assert!((ratio - 0.6).abs() < 1e-12, "ratio {ratio}");

        let uniform: Vec<i64> = (0..1000).map(|i| i * 100).collect();
        assert_eq!(presence_ratio(&uniform, 100_000, 1000.0, 20.0, 0.5), 1.0);
        assert!(presence_ratio(&uniform, 10_000, 1000.0, 20.0, 0.5).is_nan());
    }

    #[test]
    fn test_firing_range() {
        let uniform: Vec<i64> = (0..1000).map(|i| i * 100).collect();
        assert_eq!(firing_range(&uniform, 100_000, 1000.0, 0.5, (5.0, 95.0)), 0.0);

        // silent first half, 20 Hz second half
        let half: Vec<i64> = (0..1000).map(|i| 50_000 + i * 50).collect();
        let range = firing_range(&half, 100_000, 1000.0, 0.5, (5.0, 95.0));
        assert!((range - 20.0).abs() < 1e-9, "range {range}");
    }

    #[test]
    fn test_amplitude_cutoff() {
        assert!(amplitude_cutoff(&[1.0; 100], 32, 4, 3.0).is_nan());

        // amplitudes truncated at the left edge: the lowest bin is dense
        let truncated: Vec<f64> = (0..2000).map(|i| 10.0 + (i % 100) as f64 * 0.1).collect();
        let cutoff = amplitude_cutoff(&truncated, 32, 4, 3.0);
        assert!(cutoff > 0.0 && cutoff <= 0.5, "cutoff {cutoff}");
    }

    #[test]
    fn test_gaussian_smooth_preserves_mass_and_constants() {
        let flat = vec![2.0; 10];
        for v in gaussian_smooth(&flat, 3.0) {
            assert!((v - 2.0).abs() < 1e-12);
        }
        let mut spike = vec![0.0; 64];
        spike[32] = 1.0;
        let smoothed = gaussian_smooth(&spike, 3.0);
        assert!((smoothed.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(smoothed[32] > smoothed[33] && smoothed[33] > smoothed[36]);
    }
}
