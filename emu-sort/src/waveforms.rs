//! Waveform extraction
//!
//! Cuts a window of `nbefore + nafter` samples around every spike, averages a
//! bounded subset per unit into a dense template, and records per-spike
//! amplitudes on each unit's extremum channel. Windows must lie entirely
//! inside the recording; otherwise extraction fails with
//! [`PipelineError::SpikesOutOfBounds`] so the caller can trim and retry.
//!
//! Only the samples around spikes are read, in chunks of at most
//! [`READ_CHUNK_SAMPLES`], so memory does not grow with recording length.

use crate::error::{PipelineError, Result};
use crate::recording::{Recording, RecordingError};
use crate::sorter::{window_fits, Sorting};
use crate::stats;
use ndarray::{s, Array2, ArrayView2, Axis};
use tracing::debug;

/// Upper bound on samples fetched by one trace read
pub const READ_CHUNK_SAMPLES: usize = 65_536;

#[derive(Debug, Clone, PartialEq)]
pub struct WaveformParams {
    pub ms_before: f64,
    pub ms_after: f64,
    /// Spikes averaged per template
    pub max_spikes_per_unit: usize,
    pub noise_chunks: usize,
    pub noise_chunk_size: usize,
}

impl WaveformParams {
    /// Symmetric window spanning the sorter's template width `nt`
    pub fn from_nt(nt: usize, sampling_frequency: f64) -> Self {
        let half_ms = nt as f64 / sampling_frequency * 1000.0 / 2.0;
        Self {
            ms_before: half_ms,
            ms_after: half_ms,
            max_spikes_per_unit: 500,
            noise_chunks: 20,
            noise_chunk_size: 10_000,
        }
    }

    pub fn nbefore(&self, sampling_frequency: f64) -> usize {
        (self.ms_before * sampling_frequency / 1000.0) as usize
    }

    pub fn nafter(&self, sampling_frequency: f64) -> usize {
        (self.ms_after * sampling_frequency / 1000.0) as usize
    }
}

#[derive(Debug, Clone)]
pub struct UnitWaveforms {
    pub unit_id: u32,
    pub spike_train: Vec<i64>,
    /// Mean waveform, window samples x channels
    pub template: Array2<f32>,
    pub extremum_channel: usize,
    /// Per-spike amplitude on the extremum channel, oriented so the template peak is positive
    pub amplitudes: Vec<f64>,
}

impl UnitWaveforms {
    /// Peak absolute template value on the extremum channel
    pub fn peak_amplitude(&self) -> f64 {
        self.template
            .column(self.extremum_channel)
            .iter()
            .fold(0.0f64, |m, &v| m.max((v as f64).abs()))
    }
}

#[derive(Debug, Clone)]
pub struct Waveforms {
    pub sampling_frequency: f64,
    pub num_samples: usize,
    pub nbefore: usize,
    pub nafter: usize,
    pub channel_ids: Vec<String>,
    pub units: Vec<UnitWaveforms>,
    /// MAD noise per channel
    pub noise_levels: Vec<f64>,
}

impl Waveforms {
    /// Recording duration in seconds
    pub fn duration(&self) -> f64 {
        self.num_samples as f64 / self.sampling_frequency
    }

    pub fn unit_ids(&self) -> Vec<u32> {
        self.units.iter().map(|u| u.unit_id).collect()
    }
}

/// Evenly spread picks of at most `max` out of `n`
fn subsample(n: usize, max: usize) -> Vec<usize> {
    if n <= max {
        (0..n).collect()
    } else {
        (0..max).map(|k| k * n / max).collect()
    }
}

/// Visit the `[t - nbefore, t - nbefore + len)` window of every spike time
///
/// Times must be ascending with every window inside segment 0. Neighbouring
/// windows share one read spanning at most [`READ_CHUNK_SAMPLES`] samples.
fn visit_windows(
    recording: &dyn Recording,
    times: &[i64],
    nbefore: usize,
    len: usize,
    mut visit: impl FnMut(ArrayView2<'_, f32>),
) -> Result<()> {
    let span = READ_CHUNK_SAMPLES.max(len);
    let mut i = 0;
    while i < times.len() {
        let chunk_start = times[i] as usize - nbefore;
        let mut j = i + 1;
        while j < times.len() && times[j] as usize - nbefore + len - chunk_start <= span {
            j += 1;
        }
        let chunk_end = times[j - 1] as usize - nbefore + len;
        let chunk = recording.traces(0, chunk_start, chunk_end)?;
        for &t in &times[i..j] {
            let offset = t as usize - nbefore - chunk_start;
            visit(chunk.slice(s![offset..offset + len, ..]));
        }
        i = j;
    }
    Ok(())
}

/// Extract templates, amplitudes and noise levels for every unit
pub fn extract_waveforms(
    recording: &dyn Recording,
    sorting: &Sorting,
    params: &WaveformParams,
) -> Result<Waveforms> {
    if recording.num_segments() != 1 {
        return Err(RecordingError::Incompatible(format!(
            "waveform extraction needs a single segment, recording has {}",
            recording.num_segments()
        ))
        .into());
    }

    let fs = recording.sampling_frequency();
    let num_samples = recording.num_samples(0);
    let nbefore = params.nbefore(fs);
    let nafter = params.nafter(fs);
    let window = nbefore + nafter;
    if window == 0 {
        return Err(PipelineError::Config(format!(
            "waveform window of {} + {} ms is shorter than one sample",
            params.ms_before, params.ms_after
        )));
    }

    let mut out_of_bounds = 0;
    let mut first = None;
    for unit in sorting.unit_ids() {
        for &t in sorting.spike_train(unit) {
            if !window_fits(t, num_samples, nbefore, nafter) {
                out_of_bounds += 1;
                first.get_or_insert((unit, t));
            }
        }
    }
    if let Some((unit, sample)) = first {
        return Err(PipelineError::SpikesOutOfBounds {
            count: out_of_bounds,
            unit,
            sample,
        });
    }

    let num_channels = recording.num_channels();

    let noise_block = stats::sample_chunks(
        recording,
        0,
        params.noise_chunks,
        params.noise_chunk_size,
    )?;
    let noise_levels = stats::per_channel(&noise_block, stats::mad_noise);

    let mut units = Vec::with_capacity(sorting.num_units());
    for unit_id in sorting.unit_ids() {
        let train = sorting.spike_train(unit_id).to_vec();
        let picks = subsample(train.len(), params.max_spikes_per_unit);

        let picked: Vec<i64> = picks.iter().map(|&i| train[i]).collect();
        let mut template = Array2::<f32>::zeros((window, num_channels));
        visit_windows(recording, &picked, nbefore, window, |snippet| {
            template += &snippet;
        })?;
        if !picks.is_empty() {
            template /= picks.len() as f32;
        }

        let peaks: Vec<f32> = template
            .axis_iter(Axis(1))
            .map(|column| column.iter().fold(0.0f32, |m, v| m.max(v.abs())))
            .collect();
        let extremum_channel = peaks
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (c, &p)| if p > best.1 { (c, p) } else { best })
            .0;

        let column = template.column(extremum_channel);
        let peak_offset = column
            .iter()
            .enumerate()
            .fold((nbefore.min(window - 1), 0.0f32), |best, (i, v)| {
                if v.abs() > best.1 {
                    (i, v.abs())
                } else {
                    best
                }
            })
            .0;
        let polarity = if column[peak_offset] < 0.0 { -1.0 } else { 1.0 };

        let mut amplitudes = Vec::with_capacity(train.len());
        visit_windows(recording, &train, nbefore, window, |snippet| {
            amplitudes.push(polarity * snippet[[peak_offset, extremum_channel]] as f64);
        })?;

        units.push(UnitWaveforms {
            unit_id,
            spike_train: train,
            template,
            extremum_channel,
            amplitudes,
        });
    }

    debug!(
        units = units.len(),
        nbefore,
        nafter,
        num_samples,
        "Extracted waveforms"
    );
    Ok(Waveforms {
        sampling_frequency: fs,
        num_samples,
        nbefore,
        nafter,
        channel_ids: recording.channel_ids().to_vec(),
        units,
        noise_levels,
    })
}
