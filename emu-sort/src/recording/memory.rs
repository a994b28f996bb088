//! Recording held entirely in memory

use super::{check_frames, check_segment, Recording, RecordingError, SampleDtype, Traces};
use ndarray::s;

#[derive(Debug, Clone)]
pub struct MemoryRecording {
    channel_ids: Vec<String>,
    sampling_frequency: f64,
    segments: Vec<Traces>,
    dtype: SampleDtype,
    filtered: bool,
}

impl MemoryRecording {
    /// Build from segments shaped samples x channels
    ///
    /// Channel ids default to `"0"`, `"1"`, ...
    pub fn new(segments: Vec<Traces>, sampling_frequency: f64) -> Result<Self, RecordingError> {
        let num_channels = segments.first().map(|t| t.ncols()).unwrap_or(0);
        if segments.iter().any(|t| t.ncols() != num_channels) {
            return Err(RecordingError::Incompatible(
                "all segments must have the same number of channels".to_string(),
            ));
        }
        if !(sampling_frequency > 0.0) {
            return Err(RecordingError::MissingParameter(
                "sampling frequency must be positive".to_string(),
            ));
        }
        Ok(Self {
            channel_ids: (0..num_channels).map(|c| c.to_string()).collect(),
            sampling_frequency,
            segments,
            dtype: SampleDtype::Float32,
            filtered: false,
        })
    }

    pub fn with_channel_ids(mut self, channel_ids: Vec<String>) -> Result<Self, RecordingError> {
        if channel_ids.len() != self.channel_ids.len() {
            return Err(RecordingError::Incompatible(format!(
                "{} channel ids given for {} channels",
                channel_ids.len(),
                self.channel_ids.len()
            )));
        }
        self.channel_ids = channel_ids;
        Ok(self)
    }

    pub fn with_dtype(mut self, dtype: SampleDtype) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn with_filtered(mut self, filtered: bool) -> Self {
        self.filtered = filtered;
        self
    }
}

impl Recording for MemoryRecording {
    fn channel_ids(&self) -> &[String] {
        &self.channel_ids
    }

    fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    fn num_segments(&self) -> usize {
        self.segments.len()
    }

    fn num_samples(&self, segment: usize) -> usize {
        self.segments.get(segment).map(|t| t.nrows()).unwrap_or(0)
    }

    fn dtype(&self) -> SampleDtype {
        self.dtype
    }

    fn is_filtered(&self) -> bool {
        self.filtered
    }

    fn traces(&self, segment: usize, start: usize, end: usize) -> Result<Traces, RecordingError> {
        check_segment(segment, self.segments.len())?;
        let data = &self.segments[segment];
        check_frames(start, end, data.nrows())?;
        Ok(data.slice(s![start..end, ..]).to_owned())
    }
}
