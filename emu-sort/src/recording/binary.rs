//! Flat little-endian binary recordings
//!
//! Each segment is one file of interleaved samples (`sample0 ch0, sample0 ch1, ...`).
//! Folders written by [`BinaryRecording::write`] carry a `binary.json` sidecar
//! describing the files.

use super::{
    check_frames, check_segment, Recording, RecordingError, SampleDtype, Traces,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sidecar file name inside a written folder
pub const METADATA_FILE: &str = "binary.json";

/// Samples per block when streaming a segment to disk
const WRITE_CHUNK_SAMPLES: usize = 65_536;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BinaryMetadata {
    channel_ids: Vec<String>,
    sampling_frequency: f64,
    dtype: SampleDtype,
    filtered: bool,
    /// File names relative to the folder
    files: Vec<String>,
    num_samples: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct BinaryRecording {
    channel_ids: Vec<String>,
    sampling_frequency: f64,
    dtype: SampleDtype,
    filtered: bool,
    files: Vec<PathBuf>,
    num_samples: Vec<usize>,
}

impl BinaryRecording {
    /// Wrap headerless files, one segment per file
    pub fn from_raw_files(
        files: Vec<PathBuf>,
        sampling_frequency: f64,
        num_channels: usize,
        dtype: SampleDtype,
    ) -> Result<Self, RecordingError> {
        if num_channels == 0 {
            return Err(RecordingError::MissingParameter(
                "binary recordings need at least one channel".to_string(),
            ));
        }
        let frame_bytes = (num_channels * dtype.byte_width()) as u64;
        let mut num_samples = Vec::with_capacity(files.len());
        for file in &files {
            let size = std::fs::metadata(file)?.len();
            if size % frame_bytes != 0 {
                return Err(RecordingError::Corrupt(format!(
                    "{} is {} bytes, not a multiple of {} channels x {}",
                    file.display(),
                    size,
                    num_channels,
                    dtype
                )));
            }
            num_samples.push((size / frame_bytes) as usize);
        }

        Ok(Self {
            channel_ids: (0..num_channels).map(|c| c.to_string()).collect(),
            sampling_frequency,
            dtype,
            filtered: false,
            files,
            num_samples,
        })
    }

    /// Open a folder previously produced by [`BinaryRecording::write`]
    pub fn open(folder: &Path) -> Result<Self, RecordingError> {
        let text = std::fs::read_to_string(folder.join(METADATA_FILE))?;
        let meta: BinaryMetadata = serde_json::from_str(&text)
            .map_err(|e| RecordingError::Corrupt(format!("{}: {}", METADATA_FILE, e)))?;

        if meta.files.len() != meta.num_samples.len() {
            return Err(RecordingError::Corrupt(format!(
                "{} lists {} files but {} sample counts",
                METADATA_FILE,
                meta.files.len(),
                meta.num_samples.len()
            )));
        }

        let frame_bytes = (meta.channel_ids.len() * meta.dtype.byte_width()) as u64;
        let mut files = Vec::with_capacity(meta.files.len());
        for (name, &samples) in meta.files.iter().zip(&meta.num_samples) {
            let path = folder.join(name);
            let size = std::fs::metadata(&path)?.len();
            if size != samples as u64 * frame_bytes {
                return Err(RecordingError::Corrupt(format!(
                    "{} is {} bytes, expected {}",
                    path.display(),
                    size,
                    samples as u64 * frame_bytes
                )));
            }
            files.push(path);
        }

        Ok(Self {
            channel_ids: meta.channel_ids,
            sampling_frequency: meta.sampling_frequency,
            dtype: meta.dtype,
            filtered: meta.filtered,
            files,
            num_samples: meta.num_samples,
        })
    }

    /// Materialize every segment of `recording` into `folder`
    ///
    /// The sidecar is written last, so an interrupted write never opens.
    pub fn write(recording: &dyn Recording, folder: &Path) -> Result<Self, RecordingError> {
        std::fs::create_dir_all(folder)?;
        let dtype = recording.dtype();

        let mut names = Vec::with_capacity(recording.num_segments());
        let mut num_samples = Vec::with_capacity(recording.num_segments());
        for segment in 0..recording.num_segments() {
            let name = format!("traces_seg{}.raw", segment);
            write_segment(recording, segment, &folder.join(&name), dtype)?;
            names.push(name);
            num_samples.push(recording.num_samples(segment));
        }

        let meta = BinaryMetadata {
            channel_ids: recording.channel_ids().to_vec(),
            sampling_frequency: recording.sampling_frequency(),
            dtype,
            filtered: recording.is_filtered(),
            files: names,
            num_samples,
        };
        let text = serde_json::to_string_pretty(&meta)
            .map_err(|e| RecordingError::Corrupt(e.to_string()))?;
        std::fs::write(folder.join(METADATA_FILE), text)?;
        debug!(folder = %folder.display(), segments = meta.files.len(), "Wrote binary recording");

        Self::open(folder)
    }
}

/// Stream one segment to a flat file
pub fn write_segment(
    recording: &dyn Recording,
    segment: usize,
    path: &Path,
    dtype: SampleDtype,
) -> Result<(), RecordingError> {
    check_segment(segment, recording.num_segments())?;
    let total = recording.num_samples(segment);
    let mut writer = BufWriter::new(File::create(path)?);

    let mut start = 0;
    while start < total {
        let end = (start + WRITE_CHUNK_SAMPLES).min(total);
        let traces = recording.traces(segment, start, end)?;
        for row in traces.rows() {
            for &value in row {
                match dtype {
                    SampleDtype::Int16 => {
                        let sample = value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                        writer.write_all(&sample.to_le_bytes())?;
                    }
                    SampleDtype::Float32 => writer.write_all(&value.to_le_bytes())?,
                }
            }
        }
        start = end;
    }

    writer.flush()?;
    Ok(())
}

impl Recording for BinaryRecording {
    fn channel_ids(&self) -> &[String] {
        &self.channel_ids
    }

    fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    fn num_segments(&self) -> usize {
        self.files.len()
    }

    fn num_samples(&self, segment: usize) -> usize {
        self.num_samples.get(segment).copied().unwrap_or(0)
    }

    fn dtype(&self) -> SampleDtype {
        self.dtype
    }

    fn is_filtered(&self) -> bool {
        self.filtered
    }

    fn traces(&self, segment: usize, start: usize, end: usize) -> Result<Traces, RecordingError> {
        check_segment(segment, self.files.len())?;
        check_frames(start, end, self.num_samples[segment])?;

        let num_channels = self.channel_ids.len();
        let width = self.dtype.byte_width();
        let mut file = File::open(&self.files[segment])?;
        file.seek(SeekFrom::Start((start * num_channels * width) as u64))?;

        let mut bytes = vec![0u8; (end - start) * num_channels * width];
        file.read_exact(&mut bytes)?;

        let values: Vec<f32> = match self.dtype {
            SampleDtype::Int16 => bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32)
                .collect(),
            SampleDtype::Float32 => bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        };

        Array2::from_shape_vec((end - start, num_channels), values)
            .map_err(|e| RecordingError::Corrupt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::MemoryRecording;
    use super::*;
    use ndarray::array;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_open_preserves_layout() {
        let temp = TempDir::new().unwrap();
        let source = MemoryRecording::new(
            vec![
                array![[1.0f32, -2.0], [3.0, -4.0], [5.0, -6.0]],
                array![[7.0f32, -8.0]],
            ],
            2000.0,
        )
        .unwrap()
        .with_dtype(SampleDtype::Int16)
        .with_filtered(true);

        let written = BinaryRecording::write(&source, temp.path()).unwrap();
        assert_eq!(written.num_segments(), 2);
        assert_eq!(written.num_samples(0), 3);
        assert!(written.is_filtered());
        assert_eq!(
            std::fs::metadata(temp.path().join("traces_seg0.raw")).unwrap().len(),
            3 * 2 * 2
        );

        let reopened = BinaryRecording::open(temp.path()).unwrap();
        assert_eq!(reopened.traces(0, 1, 3).unwrap(), array![[3.0f32, -4.0], [5.0, -6.0]]);
        assert_eq!(reopened.traces(1, 0, 1).unwrap(), array![[7.0f32, -8.0]]);
    }

    #[test]
    fn test_open_detects_truncated_file() {
        let temp = TempDir::new().unwrap();
        let source = MemoryRecording::new(vec![array![[1.0f32], [2.0], [3.0]]], 1000.0).unwrap();
        BinaryRecording::write(&source, temp.path()).unwrap();

        std::fs::write(temp.path().join("traces_seg0.raw"), [0u8; 5]).unwrap();
        assert!(matches!(
            BinaryRecording::open(temp.path()),
            Err(RecordingError::Corrupt(_))
        ));
    }

    #[test]
    fn test_raw_files_infer_sample_count() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("rec.dat");
        let samples: Vec<u8> = [1i16, 2, 3, 4, 5, 6]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        std::fs::write(&path, samples).unwrap();

        let rec = BinaryRecording::from_raw_files(vec![path.clone()], 30000.0, 2, SampleDtype::Int16)
            .unwrap();
        assert_eq!(rec.num_samples(0), 3);
        assert_eq!(rec.traces(0, 2, 3).unwrap(), array![[5.0f32, 6.0]]);

        assert!(BinaryRecording::from_raw_files(vec![path], 30000.0, 4, SampleDtype::Int16).is_err());
    }
}
