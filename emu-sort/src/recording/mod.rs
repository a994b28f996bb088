//! Multichannel recordings
//!
//! A [`Recording`] is a read-only source of traces laid out samples x channels,
//! split into one or more segments (one per recording file). Views built with
//! [`RecordingExt`] are lazy: they hold the parent handle and translate
//! requests, so slicing never copies sample data.

mod binary;
mod filters;
mod loaders;
mod memory;
mod views;

pub use binary::{write_segment, BinaryRecording};
pub use filters::{Biquad, FilteredRecording};
pub use loaders::{BinaryLoader, LoaderRegistry, RecordingLoader};
pub use memory::MemoryRecording;
pub use views::{ChannelSlice, ConcatenatedRecording, FrameSlice, SegmentSelection};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Trace block, samples x channels
pub type Traces = Array2<f32>;

/// Shared handle to a recording or view
pub type RecordingHandle = Arc<dyn Recording>;

/// Recording access errors
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("Segment index {index} out of range ({count} segments)")]
    SegmentOutOfRange { index: usize, count: usize },

    #[error("Frame range {start}..{end} invalid for segment of {len} samples")]
    FrameRange { start: usize, end: usize, len: usize },

    #[error("Unknown channel id '{0}'")]
    UnknownChannel(String),

    #[error("Incompatible recordings: {0}")]
    Incompatible(String),

    #[error("Unsupported sample dtype '{0}'")]
    UnsupportedDtype(String),

    #[error("Missing recording parameter: {0}")]
    MissingParameter(String),

    #[error("No loader registered for dataset type '{0}'")]
    NoLoader(String),

    #[error("Corrupt recording: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// On-disk sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleDtype {
    Int16,
    Float32,
}

impl SampleDtype {
    pub fn parse(name: &str) -> Result<Self, RecordingError> {
        match name {
            "int16" | "i2" | "<i2" => Ok(SampleDtype::Int16),
            "float32" | "f4" | "<f4" => Ok(SampleDtype::Float32),
            other => Err(RecordingError::UnsupportedDtype(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SampleDtype::Int16 => "int16",
            SampleDtype::Float32 => "float32",
        }
    }

    pub fn byte_width(&self) -> usize {
        match self {
            SampleDtype::Int16 => 2,
            SampleDtype::Float32 => 4,
        }
    }
}

impl fmt::Display for SampleDtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Read-only multichannel recording
pub trait Recording: Send + Sync + fmt::Debug {
    fn channel_ids(&self) -> &[String];

    fn sampling_frequency(&self) -> f64;

    fn num_segments(&self) -> usize;

    /// Samples in a segment; 0 for an out-of-range segment
    fn num_samples(&self, segment: usize) -> usize;

    fn dtype(&self) -> SampleDtype;

    /// Whether the traces are already high-pass filtered
    fn is_filtered(&self) -> bool {
        false
    }

    /// Traces `[start, end)` of a segment
    fn traces(&self, segment: usize, start: usize, end: usize) -> Result<Traces, RecordingError>;

    fn num_channels(&self) -> usize {
        self.channel_ids().len()
    }

    fn total_samples(&self) -> usize {
        (0..self.num_segments()).map(|s| self.num_samples(s)).sum()
    }

    /// Duration of a segment in seconds
    fn duration(&self, segment: usize) -> f64 {
        self.num_samples(segment) as f64 / self.sampling_frequency()
    }
}

/// View constructors over shared handles
pub trait RecordingExt {
    /// Keep only the named channels, in the given order
    fn channel_slice(&self, channel_ids: &[String]) -> Result<RecordingHandle, RecordingError>;

    /// Keep samples `[start, end)` of a single-segment recording
    fn frame_slice(&self, start: usize, end: usize) -> Result<RecordingHandle, RecordingError>;

    /// Keep the listed segments, in the given order
    fn select_segments(&self, segments: &[usize]) -> Result<RecordingHandle, RecordingError>;

    /// Join every segment end to end into one segment
    fn concatenate(&self) -> Result<RecordingHandle, RecordingError>;
}

impl RecordingExt for RecordingHandle {
    fn channel_slice(&self, channel_ids: &[String]) -> Result<RecordingHandle, RecordingError> {
        Ok(Arc::new(ChannelSlice::new(Arc::clone(self), channel_ids)?))
    }

    fn frame_slice(&self, start: usize, end: usize) -> Result<RecordingHandle, RecordingError> {
        Ok(Arc::new(FrameSlice::new(Arc::clone(self), start, end)?))
    }

    fn select_segments(&self, segments: &[usize]) -> Result<RecordingHandle, RecordingError> {
        Ok(Arc::new(SegmentSelection::new(Arc::clone(self), segments)?))
    }

    fn concatenate(&self) -> Result<RecordingHandle, RecordingError> {
        Ok(Arc::new(ConcatenatedRecording::new(Arc::clone(self))?))
    }
}

pub(crate) fn check_segment(index: usize, count: usize) -> Result<(), RecordingError> {
    if index >= count {
        return Err(RecordingError::SegmentOutOfRange { index, count });
    }
    Ok(())
}

pub(crate) fn check_frames(start: usize, end: usize, len: usize) -> Result<(), RecordingError> {
    if start > end || end > len {
        return Err(RecordingError::FrameRange { start, end, len });
    }
    Ok(())
}
