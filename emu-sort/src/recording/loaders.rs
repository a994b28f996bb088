//! Dataset loaders keyed by `[Data].dataset_type`
//!
//! Only flat binary sessions are read natively. Vendor formats (Open Ephys,
//! Intan, NWB, Blackrock) are supplied by registering a loader for their type.

use super::{BinaryRecording, RecordingError, RecordingHandle, SampleDtype};
use emu_common::config::{DataSection, DatasetType};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// File extensions treated as flat binary recordings
const BINARY_EXTENSIONS: &[&str] = &["bin", "dat", "raw"];

/// Produces a recording with one segment per recording file of a session
pub trait RecordingLoader: Send + Sync {
    fn load(&self, data: &DataSection) -> Result<RecordingHandle, RecordingError>;
}

/// Loader for headerless binary sessions
///
/// Every `.bin`/`.dat`/`.raw` file directly inside the session folder is a
/// segment, ordered by file name.
#[derive(Debug, Default)]
pub struct BinaryLoader;

impl BinaryLoader {
    fn session_files(data: &DataSection) -> Result<Vec<PathBuf>, RecordingError> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&data.session_folder)? {
            let path = entry?.path();
            let is_binary = path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| BINARY_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false);
            if is_binary {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl RecordingLoader for BinaryLoader {
    fn load(&self, data: &DataSection) -> Result<RecordingHandle, RecordingError> {
        let sampling_rate = data
            .binary_sampling_rate
            .ok_or_else(|| RecordingError::MissingParameter("binary_sampling_rate".to_string()))?;
        let num_channels = data
            .binary_num_channels
            .ok_or_else(|| RecordingError::MissingParameter("binary_num_channels".to_string()))?;
        let dtype = match &data.binary_dtype {
            Some(name) => SampleDtype::parse(name)?,
            None => SampleDtype::Int16,
        };

        let files = Self::session_files(data)?;
        if files.is_empty() {
            return Err(RecordingError::MissingParameter(format!(
                "no .bin, .dat or .raw files in {}",
                data.session_folder.display()
            )));
        }

        info!(
            folder = %data.session_folder.display(),
            files = files.len(),
            num_channels,
            "Loading binary session"
        );
        Ok(Arc::new(BinaryRecording::from_raw_files(
            files,
            sampling_rate,
            num_channels,
            dtype,
        )?))
    }
}

/// Dataset type to loader mapping
pub struct LoaderRegistry {
    loaders: HashMap<DatasetType, Arc<dyn RecordingLoader>>,
}

impl LoaderRegistry {
    /// Registry with the built-in binary loader
    pub fn new() -> Self {
        let mut registry = Self {
            loaders: HashMap::new(),
        };
        registry.register(DatasetType::Binary, Arc::new(BinaryLoader));
        registry
    }

    /// Install or replace the loader for a dataset type
    pub fn register(&mut self, dataset_type: DatasetType, loader: Arc<dyn RecordingLoader>) {
        self.loaders.insert(dataset_type, loader);
    }

    pub fn load(&self, data: &DataSection) -> Result<RecordingHandle, RecordingError> {
        let loader = self
            .loaders
            .get(&data.dataset_type)
            .ok_or_else(|| RecordingError::NoLoader(data.dataset_type.to_string()))?;
        loader.load(data)
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
