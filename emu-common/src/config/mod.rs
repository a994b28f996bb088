//! `emu_config.toml` loading, validation and persistence
//!
//! The file has five sections: `[Data]`, `[Group]`, `[Sorting]`, `[KS]` and `[SI]`.
//! `[KS]` is passed to the sorter verbatim (after per-job overrides), so it is kept
//! as an untyped table.

mod bad_channels;
mod sections;

#[cfg(test)]
mod tests;

pub use bad_channels::{BadChannelMethod, BadChannelPolicy};
pub use sections::{
    DataSection, DatasetType, GroupSection, IndexSelection, ParamGridSpec, SiSection,
    SortType, SortingSection,
};

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the session configuration
pub const CONFIG_FILE_NAME: &str = "emu_config.toml";

const EMU_TEMPLATE: &str = include_str!("../../templates/emu_config.toml");
const KS4_TEMPLATE: &str = include_str!("../../templates/ks4_config.toml");

/// Sorter keys EMUsort requires to be switched off
const REQUIRED_OFF_KS_KEYS: &[&str] = &["nblocks", "do_correction"];

/// Full session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmuConfig {
    #[serde(default)]
    pub sort_type: SortType,
    #[serde(rename = "Data")]
    pub data: DataSection,
    #[serde(rename = "Group")]
    pub group: GroupSection,
    #[serde(rename = "Sorting")]
    pub sorting: SortingSection,
    #[serde(rename = "KS", default)]
    pub ks: toml::Table,
    #[serde(rename = "SI", default)]
    pub si: SiSection,
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl EmuConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("Config file not found: {}", path.display()))
            } else {
                Error::Io(e)
            }
        })?;
        let config = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Write the configuration atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        write_toml_atomic(self, path)
    }

    /// Point the configuration at a session folder
    pub fn with_session_folder(mut self, session_folder: &Path) -> Self {
        self.data.session_folder = session_folder.to_path_buf();
        self
    }

    /// Folder receiving per-job result folders, the session folder unless overridden
    pub fn output_folder(&self) -> PathBuf {
        self.sorting
            .output_folder
            .clone()
            .unwrap_or_else(|| self.data.session_folder.clone())
    }

    pub fn num_groups(&self) -> usize {
        self.group.num_groups()
    }

    /// Fingerprint of the `[Data]` section used by the concatenation cache
    pub fn data_fingerprint(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.data)?)
    }

    /// Check invariants that must hold before any work starts
    pub fn validate(&self) -> Result<()> {
        let data = &self.data;

        if data.time_range_enabled() {
            let [start, end] = data.time_range;
            if !(start >= 0.0 && start < end) {
                return Err(Error::Config(format!(
                    "time_range must be [0, 0] or [start, end] with 0 <= start < end (got [{}, {}])",
                    start, end
                )));
            }
            let multiple = match &data.emg_recordings {
                IndexSelection::All => true,
                IndexSelection::Indices(indices) => indices.len() > 1,
            };
            if multiple {
                return Err(Error::Config(
                    "time_range cannot be combined with multiple recordings; select one recording or set time_range to [0, 0]"
                        .to_string(),
                ));
            }
        }

        let [low, high] = data.emg_passband;
        if !(low > 0.0 && low < high) {
            return Err(Error::Config(format!(
                "emg_passband must satisfy 0 < low < high (got [{}, {}])",
                low, high
            )));
        }

        if data.dataset_type == DatasetType::Binary
            && (data.binary_sampling_rate.is_none() || data.binary_num_channels.is_none())
        {
            return Err(Error::Config(
                "binary datasets require binary_sampling_rate and binary_num_channels in [Data]"
                    .to_string(),
            ));
        }

        if self.group.emg_chan_list.is_empty() {
            return Err(Error::Config(
                "emg_chan_list must contain at least one channel group".to_string(),
            ));
        }
        let num_policies = self.group.remove_bad_emg_chans.len();
        if num_policies != 0 && num_policies != self.num_groups() {
            return Err(Error::Config(format!(
                "remove_bad_emg_chans has {} entries but emg_chan_list has {} groups",
                num_policies,
                self.num_groups()
            )));
        }

        let sorting = &self.sorting;
        if sorting.num_ks_jobs < 1 {
            return Err(Error::Config(
                "num_KS_jobs must be greater than or equal to 1".to_string(),
            ));
        }
        if sorting.num_ks_jobs > 1 && !sorting.do_ks_param_gridsearch {
            return Err(Error::Config(
                "Parallel jobs can only be used when do_KS_param_gridsearch is set to true"
                    .to_string(),
            ));
        }
        if let Some((key, _)) = sorting
            .gridsearch_ks_params
            .iter()
            .find(|(_, values)| values.is_empty())
        {
            return Err(Error::Config(format!(
                "gridsearch_KS_params.{} has no candidate values",
                key
            )));
        }
        if let Some(values) = sorting.gridsearch_ks_params.get("Th") {
            let well_formed = values
                .iter()
                .all(|v| v.as_array().map(|a| a.len() == 2).unwrap_or(false));
            if !well_formed {
                return Err(Error::Config(
                    "every gridsearch_KS_params.Th candidate must be a [universal, learned] pair"
                        .to_string(),
                ));
            }
        }

        for key in REQUIRED_OFF_KS_KEYS {
            if let Some(value) = self.ks.get(*key) {
                if is_truthy(value) {
                    return Err(Error::Config(format!("{} must be False for EMUsort", key)));
                }
            }
        }

        if self.si.max_concurrent_tasks < 1 {
            return Err(Error::Config(
                "max_concurrent_tasks in [SI] must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn is_truthy(value: &toml::Value) -> bool {
    match value {
        toml::Value::Boolean(b) => *b,
        toml::Value::Integer(i) => *i != 0,
        toml::Value::Float(f) => *f != 0.0,
        _ => true,
    }
}

/// Path of the configuration for a sort type inside a session folder
pub fn config_path(session_folder: &Path, sort_type: SortType) -> PathBuf {
    match sort_type {
        SortType::Emu => session_folder.join(CONFIG_FILE_NAME),
        SortType::Ks4 => session_folder.join("ks4_config.toml"),
    }
}

/// Write the default configuration template into a session folder
///
/// Overwrites an existing file, which is how `--reset-config` works.
pub fn create_config(session_folder: &Path, sort_type: SortType) -> Result<PathBuf> {
    let template = match sort_type {
        SortType::Emu => EMU_TEMPLATE,
        SortType::Ks4 => KS4_TEMPLATE,
    };
    let mut config = EmuConfig::from_toml_str(template)?;
    config.data.session_folder = session_folder.to_path_buf();

    let path = config_path(session_folder, sort_type);
    config.save(&path)?;
    info!(path = %path.display(), "Created configuration from template");
    Ok(path)
}

/// Serialize a value as TOML and replace `path` atomically
pub fn write_toml_atomic<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let text = toml::to_string_pretty(value)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    std::fs::write(&temp_path, text)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}
