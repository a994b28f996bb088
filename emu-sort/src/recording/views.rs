//! Lazy views over a parent recording

use super::{
    check_frames, check_segment, Recording, RecordingError, RecordingHandle, SampleDtype, Traces,
};
use ndarray::{Array2, Axis};

/// Subset of channels
#[derive(Debug)]
pub struct ChannelSlice {
    parent: RecordingHandle,
    channel_ids: Vec<String>,
    indices: Vec<usize>,
}

impl ChannelSlice {
    pub fn new(parent: RecordingHandle, channel_ids: &[String]) -> Result<Self, RecordingError> {
        let parent_ids = parent.channel_ids();
        let indices = channel_ids
            .iter()
            .map(|id| {
                parent_ids
                    .iter()
                    .position(|p| p == id)
                    .ok_or_else(|| RecordingError::UnknownChannel(id.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            parent,
            channel_ids: channel_ids.to_vec(),
            indices,
        })
    }
}

impl Recording for ChannelSlice {
    fn channel_ids(&self) -> &[String] {
        &self.channel_ids
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
        self.parent.is_filtered()
    }

    fn traces(&self, segment: usize, start: usize, end: usize) -> Result<Traces, RecordingError> {
        let traces = self.parent.traces(segment, start, end)?;
        Ok(traces.select(Axis(1), &self.indices))
    }
}

/// Sample window of a single-segment recording
#[derive(Debug)]
pub struct FrameSlice {
    parent: RecordingHandle,
    start: usize,
    end: usize,
}

impl FrameSlice {
    pub fn new(parent: RecordingHandle, start: usize, end: usize) -> Result<Self, RecordingError> {
        if parent.num_segments() != 1 {
            return Err(RecordingError::Incompatible(format!(
                "frame slicing needs a single segment, recording has {}",
                parent.num_segments()
            )));
        }
        check_frames(start, end, parent.num_samples(0))?;
        Ok(Self { parent, start, end })
    }
}

impl Recording for FrameSlice {
    fn channel_ids(&self) -> &[String] {
        self.parent.channel_ids()
    }

    fn sampling_frequency(&self) -> f64 {
        self.parent.sampling_frequency()
    }

    fn num_segments(&self) -> usize {
        1
    }

    fn num_samples(&self, segment: usize) -> usize {
        if segment == 0 {
            self.end - self.start
        } else {
            0
        }
    }

    fn dtype(&self) -> SampleDtype {
        self.parent.dtype()
    }

    fn is_filtered(&self) -> bool {
        self.parent.is_filtered()
    }

    fn traces(&self, segment: usize, start: usize, end: usize) -> Result<Traces, RecordingError> {
        check_segment(segment, 1)?;
        check_frames(start, end, self.end - self.start)?;
        self.parent.traces(0, self.start + start, self.start + end)
    }
}

/// Reordered subset of segments
#[derive(Debug)]
pub struct SegmentSelection {
    parent: RecordingHandle,
    segments: Vec<usize>,
}

impl SegmentSelection {
    pub fn new(parent: RecordingHandle, segments: &[usize]) -> Result<Self, RecordingError> {
        if segments.is_empty() {
            return Err(RecordingError::Incompatible(
                "segment selection must not be empty".to_string(),
            ));
        }
        for &segment in segments {
            check_segment(segment, parent.num_segments())?;
        }
        Ok(Self {
            parent,
            segments: segments.to_vec(),
        })
    }
}

impl Recording for SegmentSelection {
    fn channel_ids(&self) -> &[String] {
        self.parent.channel_ids()
    }

    fn sampling_frequency(&self) -> f64 {
        self.parent.sampling_frequency()
    }

    fn num_segments(&self) -> usize {
        self.segments.len()
    }

    fn num_samples(&self, segment: usize) -> usize {
        self.segments
            .get(segment)
            .map(|&s| self.parent.num_samples(s))
            .unwrap_or(0)
    }

    fn dtype(&self) -> SampleDtype {
        self.parent.dtype()
    }

    fn is_filtered(&self) -> bool {
        self.parent.is_filtered()
    }

    fn traces(&self, segment: usize, start: usize, end: usize) -> Result<Traces, RecordingError> {
        check_segment(segment, self.segments.len())?;
        self.parent.traces(self.segments[segment], start, end)
    }
}

/// Every parent segment joined end to end into one segment
#[derive(Debug)]
pub struct ConcatenatedRecording {
    parent: RecordingHandle,
    /// Start sample of each parent segment in the joined timeline
    offsets: Vec<usize>,
    total: usize,
}

impl ConcatenatedRecording {
    pub fn new(parent: RecordingHandle) -> Result<Self, RecordingError> {
        if parent.num_segments() == 0 {
            return Err(RecordingError::Incompatible(
                "cannot concatenate a recording without segments".to_string(),
            ));
        }
        let mut offsets = Vec::with_capacity(parent.num_segments());
        let mut total = 0;
        for segment in 0..parent.num_segments() {
            offsets.push(total);
            total += parent.num_samples(segment);
        }
        Ok(Self {
            parent,
            offsets,
            total,
        })
    }
}

impl Recording for ConcatenatedRecording {
    fn channel_ids(&self) -> &[String] {
        self.parent.channel_ids()
    }

    fn sampling_frequency(&self) -> f64 {
        self.parent.sampling_frequency()
    }

    fn num_segments(&self) -> usize {
        1
    }

    fn num_samples(&self, segment: usize) -> usize {
        if segment == 0 {
            self.total
        } else {
            0
        }
    }

    fn dtype(&self) -> SampleDtype {
        self.parent.dtype()
    }

    fn is_filtered(&self) -> bool {
        self.parent.is_filtered()
    }

    fn traces(&self, segment: usize, start: usize, end: usize) -> Result<Traces, RecordingError> {
        check_segment(segment, 1)?;
        check_frames(start, end, self.total)?;

        let mut pieces = Vec::new();
        for (parent_segment, &offset) in self.offsets.iter().enumerate() {
            let len = self.parent.num_samples(parent_segment);
            let from = start.max(offset);
            let to = end.min(offset + len);
            if from < to {
                pieces.push(self.parent.traces(parent_segment, from - offset, to - offset)?);
            }
        }

        match pieces.len() {
            0 => Ok(Array2::zeros((0, self.num_channels()))),
            1 => Ok(pieces.remove(0)),
            _ => {
                let views: Vec<_> = pieces.iter().map(|p| p.view()).collect();
                ndarray::concatenate(Axis(0), &views)
                    .map_err(|e| RecordingError::Corrupt(format!("segment shapes differ: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{MemoryRecording, RecordingExt};
    use super::*;
    use ndarray::array;
    use std::sync::Arc;

    fn two_segments() -> RecordingHandle {
        let seg0 = array![[0.0f32, 10.0, 20.0], [1.0, 11.0, 21.0], [2.0, 12.0, 22.0]];
        let seg1 = array![[3.0f32, 13.0, 23.0], [4.0, 14.0, 24.0]];
        Arc::new(MemoryRecording::new(vec![seg0, seg1], 1000.0).unwrap())
    }

    #[test]
    fn test_channel_slice_reorders_columns() {
        let rec = two_segments();
        let view = rec.channel_slice(&["2".to_string(), "0".to_string()]).unwrap();
        assert_eq!(view.channel_ids(), &["2".to_string(), "0".to_string()]);
        let traces = view.traces(1, 0, 2).unwrap();
        assert_eq!(traces, array![[23.0f32, 3.0], [24.0, 4.0]]);
    }

    #[test]
    fn test_channel_slice_unknown_channel() {
        let rec = two_segments();
        let err = rec.channel_slice(&["7".to_string()]).unwrap_err();
        assert!(matches!(err, RecordingError::UnknownChannel(id) if id == "7"));
    }

    #[test]
    fn test_concatenate_spans_segment_boundary() {
        let rec = two_segments().concatenate().unwrap();
        assert_eq!(rec.num_segments(), 1);
        assert_eq!(rec.num_samples(0), 5);
        let traces = rec.traces(0, 2, 4).unwrap();
        assert_eq!(traces.column(0).to_vec(), vec![2.0f32, 3.0]);
        assert_eq!(rec.traces(0, 3, 3).unwrap().nrows(), 0);
        assert!(rec.traces(0, 4, 6).is_err());
    }

    #[test]
    fn test_select_then_frame_slice() {
        let rec = two_segments().select_segments(&[1]).unwrap();
        assert_eq!(rec.num_samples(0), 2);
        let window = rec.frame_slice(1, 2).unwrap();
        assert_eq!(window.traces(0, 0, 1).unwrap(), array![[4.0f32, 14.0, 24.0]]);

        assert!(two_segments().frame_slice(0, 1).is_err());
        assert!(two_segments().select_segments(&[2]).is_err());
    }
}
