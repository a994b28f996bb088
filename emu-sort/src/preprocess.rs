//! Per-group signal preparation
//!
//! For each channel group: pick the recordings (concatenating through the
//! cache when several are selected), slice channels and time, band-pass,
//! handle bad channels according to the group's policy, then notch out line
//! noise.

use crate::cache::FingerprintCache;
use crate::error::{PipelineError, Result};
use crate::recording::{Biquad, FilteredRecording, RecordingExt, RecordingHandle};
use crate::stats;
use emu_common::config::{BadChannelMethod, BadChannelPolicy, DatasetType};
use emu_common::EmuConfig;
use std::sync::Arc;
use tracing::{info, warn};

/// Line-noise frequency removed after bad-channel handling
pub const LINE_FREQUENCY_HZ: f64 = 60.0;

/// Quality factor of the line-noise notch
pub const LINE_NOTCH_Q: f64 = 30.0;

/// Channel ids containing this marker are auxiliary inputs, never EMG
const AUX_CHANNEL_MARKER: &str = "ADC";

/// Filtering and bad-channel detection primitives
pub trait SignalPreprocessor: Send + Sync {
    fn bandpass(&self, recording: RecordingHandle, freq_min: f64, freq_max: f64)
        -> Result<RecordingHandle>;

    fn notch(&self, recording: RecordingHandle, freq: f64, q: f64) -> Result<RecordingHandle>;

    /// Ids of channels flagged by `method` at `threshold`
    fn detect_bad_channels(
        &self,
        recording: &RecordingHandle,
        method: BadChannelMethod,
        threshold: f64,
    ) -> Result<Vec<String>>;
}

/// Butterworth band-pass, biquad notch and robust-spread detection
#[derive(Debug, Clone)]
pub struct DefaultPreprocessor {
    /// Chunks sampled per detection
    pub num_chunks: usize,
    /// Samples per detection chunk
    pub chunk_size: usize,
}

impl Default for DefaultPreprocessor {
    fn default() -> Self {
        Self {
            num_chunks: 10,
            chunk_size: 10_000,
        }
    }
}

impl SignalPreprocessor for DefaultPreprocessor {
    fn bandpass(
        &self,
        recording: RecordingHandle,
        freq_min: f64,
        freq_max: f64,
    ) -> Result<RecordingHandle> {
        let fs = recording.sampling_frequency();
        let nyquist = fs / 2.0;
        if freq_min >= nyquist {
            return Err(PipelineError::Config(format!(
                "emg_passband low edge {} Hz is above Nyquist ({} Hz)",
                freq_min, nyquist
            )));
        }

        let mut sections = vec![Biquad::highpass(fs, freq_min)];
        if freq_max < nyquist {
            sections.push(Biquad::lowpass(fs, freq_max));
        } else {
            warn!(freq_max, nyquist, "Passband high edge at or above Nyquist, low-pass skipped");
        }

        let margin = (3.0 * fs / freq_min).ceil() as usize;
        Ok(Arc::new(FilteredRecording::new(recording, sections, margin)))
    }

    fn notch(&self, recording: RecordingHandle, freq: f64, q: f64) -> Result<RecordingHandle> {
        let fs = recording.sampling_frequency();
        if freq >= fs / 2.0 {
            return Ok(recording);
        }
        let margin = (3.0 * q * fs / freq).ceil() as usize;
        Ok(Arc::new(FilteredRecording::new(
            recording,
            vec![Biquad::notch(fs, freq, q)],
            margin,
        )))
    }

    fn detect_bad_channels(
        &self,
        recording: &RecordingHandle,
        method: BadChannelMethod,
        threshold: f64,
    ) -> Result<Vec<String>> {
        let spread: fn(&[f64]) -> f64 = match method {
            BadChannelMethod::Mad => stats::mad_noise,
            BadChannelMethod::Std => stats::std_dev,
            BadChannelMethod::CoherencePsd => {
                return Err(PipelineError::Config(
                    "bad channel method 'coherence+psd' needs a probe-geometry aware detector; register one or use mad/std"
                        .to_string(),
                ))
            }
        };

        let block = stats::sample_chunks(recording.as_ref(), 0, self.num_chunks, self.chunk_size)?;
        let levels = stats::per_channel(&block, spread);
        let reference = stats::median(&levels);
        if !(reference > 0.0) {
            return Ok(Vec::new());
        }

        Ok(recording
            .channel_ids()
            .iter()
            .zip(&levels)
            .filter(|(_, &level)| level > threshold * reference || level < reference / threshold)
            .map(|(id, _)| id.clone())
            .collect())
    }
}

/// Ready-to-sort recording of one channel group
#[derive(Debug, Clone)]
pub struct PreparedGroup {
    pub group: usize,
    pub recording: RecordingHandle,
    /// Channel ids kept, in recording order
    pub channel_ids: Vec<String>,
    /// Indices of the kept channels in the loaded recording
    pub channel_indices: Vec<usize>,
    /// Channels flagged by detection (removed or not, per policy)
    pub bad_channel_ids: Vec<String>,
}

impl PreparedGroup {
    pub fn num_chans(&self) -> usize {
        self.channel_ids.len()
    }
}

/// Prepare one channel group from the loaded session recording
pub fn prepare_group(
    preprocessor: &dyn SignalPreprocessor,
    cache: &FingerprintCache,
    config: &EmuConfig,
    loaded: &RecordingHandle,
    group: usize,
) -> Result<PreparedGroup> {
    let data = &config.data;

    let segments = data
        .emg_recordings
        .resolve(loaded.num_segments())
        .map_err(|bad| {
            PipelineError::Config(format!(
                "emg_recordings index {} out of range ({} recordings found)",
                bad,
                loaded.num_segments()
            ))
        })?;
    if segments.len() > 1 && data.time_range_enabled() {
        return Err(PipelineError::Config(
            "time_range cannot be combined with multiple recordings".to_string(),
        ));
    }

    let selected = loaded.select_segments(&segments)?;
    let mut recording = if segments.len() > 1 {
        info!(group, recordings = ?segments, "Concatenating selected recordings");
        cache.get_or_build(config, &selected)?.recording
    } else {
        selected
    };

    let all_ids = recording.channel_ids().to_vec();
    let chan_selection = config.group.emg_chan_list.get(group).ok_or_else(|| {
        PipelineError::Config(format!("no emg_chan_list entry for group {}", group))
    })?;
    let mut channel_indices = chan_selection.resolve(all_ids.len()).map_err(|bad| {
        PipelineError::Config(format!(
            "emg_chan_list[{}] channel {} out of range ({} channels)",
            group,
            bad,
            all_ids.len()
        ))
    })?;
    if data.dataset_type == DatasetType::Openephys
        && matches!(chan_selection, emu_common::config::IndexSelection::All)
    {
        channel_indices.retain(|&i| !all_ids[i].contains(AUX_CHANNEL_MARKER));
    }
    if channel_indices.is_empty() {
        return Err(PipelineError::Config(format!(
            "channel group {} selects no channels",
            group
        )));
    }
    let channel_ids: Vec<String> = channel_indices.iter().map(|&i| all_ids[i].clone()).collect();
    recording = recording.channel_slice(&channel_ids)?;

    if data.time_range_enabled() {
        let fs = recording.sampling_frequency();
        let start = (data.time_range[0] * fs).round() as usize;
        let end = (data.time_range[1] * fs).round() as usize;
        if end > recording.num_samples(0) {
            return Err(PipelineError::Config(format!(
                "time_range end {} s exceeds recording duration {:.3} s",
                data.time_range[1],
                recording.duration(0)
            )));
        }
        recording = recording.frame_slice(start, end)?;
    }

    let [freq_min, freq_max] = data.emg_passband;
    recording = preprocessor.bandpass(recording, freq_min, freq_max)?;

    let policy = config.group.bad_channel_policy(group);
    let bad_channel_ids = match policy.detection() {
        Some((method, threshold)) => {
            preprocessor.detect_bad_channels(&recording, method, threshold)?
        }
        None => Vec::new(),
    };

    let (channel_ids, channel_indices) = if policy.removes_channels() && !bad_channel_ids.is_empty() {
        info!(group, removed = ?bad_channel_ids, "Removing bad channels");
        let kept: Vec<(String, usize)> = channel_ids
            .into_iter()
            .zip(channel_indices)
            .filter(|(id, _)| !bad_channel_ids.contains(id))
            .collect();
        if kept.is_empty() {
            return Err(PipelineError::Config(format!(
                "every channel of group {} was flagged bad",
                group
            )));
        }
        let ids: Vec<String> = kept.iter().map(|(id, _)| id.clone()).collect();
        recording = recording.channel_slice(&ids)?;
        kept.into_iter().unzip()
    } else {
        match policy {
            BadChannelPolicy::Disabled => {}
            _ if bad_channel_ids.is_empty() => info!(group, "No bad channels detected"),
            _ => info!(group, detected = ?bad_channel_ids, "Bad channels detected, none removed"),
        }
        (channel_ids, channel_indices)
    };

    recording = preprocessor.notch(recording, LINE_FREQUENCY_HZ, LINE_NOTCH_Q)?;

    Ok(PreparedGroup {
        group,
        recording,
        channel_ids,
        channel_indices,
        bad_channel_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::MemoryRecording;
    use ndarray::Array2;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
[Data]
dataset_type = "openephys"
emg_recordings = [0]
emg_passband = [250.0, 4000.0]

[Group]
emg_chan_list = ["all", [0, 2]]
remove_bad_emg_chans = [true, false]

[Sorting]
"#;

    /// Deterministic noise with one channel ten times louder than the rest
    fn noisy_recording(ids: &[&str]) -> RecordingHandle {
        let mut state = 12345u64;
        let data = Array2::from_shape_fn((20_000, ids.len()), |(_, c)| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let unit = (state % 2001) as f32 / 1000.0 - 1.0;
            if c == 1 {
                unit * 200.0
            } else {
                unit * 20.0
            }
        });
        Arc::new(
            MemoryRecording::new(vec![data], 10_000.0)
                .unwrap()
                .with_channel_ids(ids.iter().map(|s| s.to_string()).collect())
                .unwrap(),
        )
    }

    fn config(temp: &TempDir) -> EmuConfig {
        EmuConfig::from_toml_str(CONFIG)
            .unwrap()
            .with_session_folder(temp.path())
    }

    #[test]
    fn test_detects_loud_channel() {
        let recording = noisy_recording(&["CH1", "CH2", "CH3", "CH4"]);
        let bad = DefaultPreprocessor::default()
            .detect_bad_channels(&recording, BadChannelMethod::Mad, 5.0)
            .unwrap();
        assert_eq!(bad, vec!["CH2".to_string()]);
    }

    #[test]
    fn test_all_channels_skip_aux_inputs_and_remove_bad() {
        let temp = TempDir::new().unwrap();
        let recording = noisy_recording(&["CH1", "CH2", "CH3", "ADC1"]);
        let prepared = prepare_group(
            &DefaultPreprocessor::default(),
            &FingerprintCache::new(),
            &config(&temp),
            &recording,
            0,
        )
        .unwrap();

        assert_eq!(prepared.channel_ids, vec!["CH1".to_string(), "CH3".to_string()]);
        assert_eq!(prepared.channel_indices, vec![0, 2]);
        assert_eq!(prepared.recording.num_channels(), 2);
        assert!(prepared.recording.is_filtered());
    }

    #[test]
    fn test_off_policy_keeps_flagged_channels() {
        let temp = TempDir::new().unwrap();
        let recording = noisy_recording(&["CH1", "CH2", "CH3"]);
        let mut cfg = config(&temp);
        cfg.group.emg_chan_list[1] = emu_common::config::IndexSelection::Indices(vec![0, 1]);
        let prepared = prepare_group(
            &DefaultPreprocessor::default(),
            &FingerprintCache::new(),
            &cfg,
            &recording,
            1,
        )
        .unwrap();

        assert_eq!(prepared.num_chans(), 2);
        assert_eq!(prepared.channel_indices, vec![0, 1]);
    }

    #[test]
    fn test_out_of_range_recording_is_config_error() {
        let temp = TempDir::new().unwrap();
        let mut cfg = config(&temp);
        cfg.data.emg_recordings = emu_common::config::IndexSelection::Indices(vec![3]);
        let err = prepare_group(
            &DefaultPreprocessor::default(),
            &FingerprintCache::new(),
            &cfg,
            &noisy_recording(&["A", "B"]),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_time_range_slices_samples() {
        let temp = TempDir::new().unwrap();
        let mut cfg = config(&temp);
        cfg.data.time_range = [0.5, 1.5];
        cfg.group.remove_bad_emg_chans = vec![BadChannelPolicy::Disabled, BadChannelPolicy::Disabled];
        let prepared = prepare_group(
            &DefaultPreprocessor::default(),
            &FingerprintCache::new(),
            &cfg,
            &noisy_recording(&["A", "B", "C"]),
            0,
        )
        .unwrap();
        assert_eq!(prepared.recording.num_samples(0), 10_000);
        assert!(prepared.bad_channel_ids.is_empty());

        cfg.data.time_range = [0.5, 5.0];
        assert!(prepare_group(
            &DefaultPreprocessor::default(),
            &FingerprintCache::new(),
            &cfg,
            &noisy_recording(&["A", "B", "C"]),
            0,
        )
        .is_err());
    }
}
