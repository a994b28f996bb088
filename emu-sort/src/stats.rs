//! Small numeric helpers shared by preprocessing, extraction and metrics

use crate::recording::{Recording, RecordingError, Traces};
use ndarray::{Array2, Axis};

/// Scale turning a median absolute deviation into a Gaussian standard deviation
pub const MAD_SCALE: f64 = 0.674_489_750_196_081_7;

/// Median of the finite values; NaN when there are none
pub fn median(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Robust noise estimate, `median(|x - median(x)|) / 0.6745`
pub fn mad_noise(values: &[f64]) -> f64 {
    let center = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations) / MAD_SCALE
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

/// Linear-interpolated percentile (`0..=100`) of the values
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// Mean ignoring NaN; NaN when every value is NaN
pub fn nanmean(values: &[f64]) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Evenly spaced chunks of a segment stacked into one block
///
/// Short segments are returned whole.
pub fn sample_chunks(
    recording: &dyn Recording,
    segment: usize,
    num_chunks: usize,
    chunk_size: usize,
) -> Result<Traces, RecordingError> {
    let len = recording.num_samples(segment);
    if num_chunks == 0 || chunk_size == 0 || len <= num_chunks * chunk_size {
        return recording.traces(segment, 0, len);
    }

    let stride = (len - chunk_size) / (num_chunks - 1).max(1);
    let mut blocks = Vec::with_capacity(num_chunks);
    for i in 0..num_chunks {
        let start = (i * stride).min(len - chunk_size);
        blocks.push(recording.traces(segment, start, start + chunk_size)?);
    }
    let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
    ndarray::concatenate(Axis(0), &views).map_err(|e| RecordingError::Corrupt(e.to_string()))
}

/// Per-channel statistic over a samples x channels block
pub fn per_channel(traces: &Array2<f32>, statistic: impl Fn(&[f64]) -> f64) -> Vec<f64> {
    traces
        .columns()
        .into_iter()
        .map(|column| {
            let values: Vec<f64> = column.iter().map(|&v| v as f64).collect();
            statistic(&values)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_percentile_matches_linear_interpolation() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert!((percentile(&values, 95.0) - 4.8).abs() < 1e-12);
        assert!((percentile(&values, 5.0) - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_mad_noise_of_symmetric_values() {
        let values = [-2.0, -1.0, 0.0, 1.0, 2.0];
        assert!((mad_noise(&values) - 1.0 / MAD_SCALE).abs() < 1e-12);
    }

    #[test]
    fn test_nanmean_skips_nan() {
        assert_eq!(nanmean(&[1.0, f64::NAN, 3.0]), 2.0);
        assert!(nanmean(&[f64::NAN]).is_nan());
        assert!(nanmean(&[]).is_nan());
    }

    #[test]
    fn test_std_dev() {
        assert!((std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.0).abs() < 1e-12);
    }
}
