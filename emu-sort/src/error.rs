//! Error types for emu-sort

use crate::recording::RecordingError;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline error type
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid or inconsistent configuration, raised before work starts
    #[error("Configuration error: {0}")]
    Config(String),

    /// Concatenation cache could not be read or written
    #[error("Cache error: {0}")]
    Cache(String),

    /// Recording access failed
    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    /// Sorter failed for one job
    #[error("Sorter failed for worker {worker}: {message}")]
    Sorter { worker: usize, message: String },

    /// Sorter engine returned results that do not line up with the submitted jobs
    #[error("Sorter engine error: {0}")]
    SorterEngine(String),

    /// Waveform windows fall outside the recording
    #[error("{count} spikes have waveform windows outside the recording (first: unit {unit} at sample {sample})")]
    SpikesOutOfBounds { count: usize, unit: u32, sample: i64 },

    /// Post-processing of one job failed
    #[error("Worker {worker} failed: {source}")]
    Extraction {
        worker: usize,
        #[source]
        source: Box<PipelineError>,
    },

    /// An extraction batch contained a failed job
    #[error("Error in parallel extraction of batch {batch}/{total}, try reducing max_concurrent_tasks in 'SI' section of the config file: {source}")]
    Batch {
        batch: usize,
        total: usize,
        #[source]
        source: Box<PipelineError>,
    },

    /// Sorter output arrays could not be read or written
    #[error("Array file error: {0}")]
    Npy(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// emu-common error
    #[error("Common error: {0}")]
    Common(#[from] emu_common::Error),

    /// Internal error (task join failures and the like)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(e: tokio::task::JoinError) -> Self {
        PipelineError::Internal(format!("Blocking task failed: {}", e))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Common(emu_common::Error::from(e))
    }
}

impl From<ndarray_npy::ReadNpyError> for PipelineError {
    fn from(e: ndarray_npy::ReadNpyError) -> Self {
        PipelineError::Npy(e.to_string())
    }
}

impl From<ndarray_npy::WriteNpyError> for PipelineError {
    fn from(e: ndarray_npy::WriteNpyError) -> Self {
        PipelineError::Npy(e.to_string())
    }
}

impl PipelineError {
    /// Innermost error, unwrapping batch and per-worker wrappers
    pub fn root_cause(&self) -> &PipelineError {
        match self {
            PipelineError::Extraction { source, .. } | PipelineError::Batch { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}
