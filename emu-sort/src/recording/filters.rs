//! Zero-phase IIR filtering as a lazy view
//!
//! Second-order sections run forward then backward over the requested window
//! extended by a margin on both sides, so chunked reads match a whole-signal
//! filter away from the recording edges.

use super::{Recording, RecordingError, RecordingHandle, SampleDtype, Traces};
use ndarray::s;
use std::f64::consts::PI;

const BUTTERWORTH_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Normalized second-order section (`a0 == 1`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    fn from_coefficients(b: [f64; 3], a: [f64; 3]) -> Self {
        Self {
            b0: b[0] / a[0],
            b1: b[1] / a[0],
            b2: b[2] / a[0],
            a1: a[1] / a[0],
            a2: a[2] / a[0],
        }
    }

    fn prewarp(sampling_frequency: f64, cutoff: f64, q: f64) -> (f64, f64) {
        let w0 = 2.0 * PI * cutoff / sampling_frequency;
        (w0.cos(), w0.sin() / (2.0 * q))
    }

    pub fn highpass(sampling_frequency: f64, cutoff: f64) -> Self {
        let (cos, alpha) = Self::prewarp(sampling_frequency, cutoff, BUTTERWORTH_Q);
        Self::from_coefficients(
            [(1.0 + cos) / 2.0, -(1.0 + cos), (1.0 + cos) / 2.0],
            [1.0 + alpha, -2.0 * cos, 1.0 - alpha],
        )
    }

    pub fn lowpass(sampling_frequency: f64, cutoff: f64) -> Self {
        let (cos, alpha) = Self::prewarp(sampling_frequency, cutoff, BUTTERWORTH_Q);
        Self::from_coefficients(
            [(1.0 - cos) / 2.0, 1.0 - cos, (1.0 - cos) / 2.0],
            [1.0 + alpha, -2.0 * cos, 1.0 - alpha],
        )
    }

    pub fn notch(sampling_frequency: f64, freq: f64, q: f64) -> Self {
        let (cos, alpha) = Self::prewarp(sampling_frequency, freq, q);
        Self::from_coefficients([1.0, -2.0 * cos, 1.0], [1.0 + alpha, -2.0 * cos, 1.0 - alpha])
    }

    /// Transposed direct form II, in place
    fn run(&self, signal: &mut [f64]) {
        let (mut z1, mut z2) = (0.0, 0.0);
        for x in signal.iter_mut() {
            let input = *x;
            let output = self.b0 * input + z1;
            z1 = self.b1 * input - self.a1 * output + z2;
            z2 = self.b2 * input - self.a2 * output;
            *x = output;
        }
    }
}

/// Parent traces passed through a cascade of sections, forward and backward
#[derive(Debug)]
pub struct FilteredRecording {
    parent: RecordingHandle,
    sections: Vec<Biquad>,
    margin: usize,
}

impl FilteredRecording {
    pub fn new(parent: RecordingHandle, sections: Vec<Biquad>, margin: usize) -> Self {
        Self {
            parent,
            sections,
            margin,
        }
    }

    fn filter_in_place(&self, signal: &mut [f64]) {
        for section in &self.sections {
            section.run(signal);
        }
        signal.reverse();
        for section in &self.sections {
            section.run(signal);
        }
        signal.reverse();
    }
}

impl Recording for FilteredRecording {
    fn channel_ids(&self) -> &[String] {
        self.parent.channel_ids()
    }

    fn sampling_frequency(&self) -> f64 {
        self.parent.sampling_frequency()
    }

    fn num_segments(&self) -> usize {
        self.parent.num_segments()
    }

    fn num_samples(&self, segment: usize) -> usize {
        self.parent.num_samples(segment)
    }

    fn dtype(&self) -> SampleDtype {
        self.parent.dtype()
    }

    fn is_filtered(&self) -> bool {
        true
    }

    fn traces(&self, segment: usize, start: usize, end: usize) -> Result<Traces, RecordingError> {
        let len = self.parent.num_samples(segment);
        super::check_frames(start, end, len)?;

        let padded_start = start.saturating_sub(self.margin);
        let padded_end = (end + self.margin).min(len);
        let mut raw = self.parent.traces(segment, padded_start, padded_end)?;

        let mut column = Vec::with_capacity(raw.nrows());
        for mut channel in raw.columns_mut() {
            column.clear();
            column.extend(channel.iter().map(|&v| v as f64));
            self.filter_in_place(&mut column);
            for (dst, &src) in channel.iter_mut().zip(&column) {
                *dst = src as f32;
            }
        }

        let offset = start - padded_start;
        Ok(raw.slice(s![offset..offset + (end - start), ..]).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::super::MemoryRecording;
    use super::*;
    use ndarray::Array2;
    use std::sync::Arc;

    fn bandpass(parent: RecordingHandle, low: f64, high: f64) -> FilteredRecording {
        let fs = parent.sampling_frequency();
        FilteredRecording::new(
            parent,
            vec![Biquad::highpass(fs, low), Biquad::lowpass(fs, high)],
            (3.0 * fs / low) as usize,
        )
    }

    #[test]
    fn test_highpass_removes_offset() {
        let fs = 10_000.0;
        let data = Array2::from_elem((20_000, 1), 100.0f32);
        let rec: RecordingHandle = Arc::new(MemoryRecording::new(vec![data], fs).unwrap());
        let filtered = bandpass(rec, 250.0, 4000.0);

        let middle = filtered.traces(0, 9_000, 11_000).unwrap();
        assert!(middle.iter().all(|v| v.abs() < 1.0));
        assert!(filtered.is_filtered());
    }

    #[test]
    fn test_passband_sine_keeps_amplitude() {
        let fs = 30_000.0;
        let n = 30_000;
        let data = Array2::from_shape_fn((n, 1), |(i, _)| {
            (2.0 * PI * 1000.0 * i as f64 / fs).sin() as f32
        });
        let rec: RecordingHandle = Arc::new(MemoryRecording::new(vec![data], fs).unwrap());
        let filtered = bandpass(rec, 250.0, 5000.0);

        let middle = filtered.traces(0, 10_000, 20_000).unwrap();
        let peak = middle.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(peak > 0.95 && peak < 1.05, "peak {}", peak);
    }

    #[test]
    fn test_notch_rejects_line_frequency() {
        let fs = 10_000.0;
        let n = 50_000;
        let data = Array2::from_shape_fn((n, 1), |(i, _)| {
            (2.0 * PI * 60.0 * i as f64 / fs).sin() as f32
        });
        let rec: RecordingHandle = Arc::new(MemoryRecording::new(vec![data], fs).unwrap());
        let notched = FilteredRecording::new(rec, vec![Biquad::notch(fs, 60.0, 30.0)], 20_000);

        let middle = notched.traces(0, 20_000, 30_000).unwrap();
        let peak = middle.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(peak < 0.1, "peak {}", peak);
    }
}
