//! Typed sections of `emu_config.toml`
//!
//! Every section keeps keys it does not model in a flattened `extra` table, so
//! a load/save cycle never drops user settings.

use super::bad_channels::BadChannelPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Candidate values per swept sorter parameter, as written in `[Sorting.gridsearch_KS_params]`
pub type ParamGridSpec = BTreeMap<String, Vec<toml::Value>>;

/// Acquisition system that produced the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetType {
    Openephys,
    Intan,
    Nwb,
    Blackrock,
    Binary,
}

impl DatasetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetType::Openephys => "openephys",
            DatasetType::Intan => "intan",
            DatasetType::Nwb => "nwb",
            DatasetType::Blackrock => "blackrock",
            DatasetType::Binary => "binary",
        }
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flavor of pipeline run, selects the result folder suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortType {
    #[default]
    Emu,
    Ks4,
}

/// Either every index or an explicit list
///
/// Accepts `"all"`, `["all"]` or a list of non-negative integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SelectionRepr", into = "SelectionRepr")]
pub enum IndexSelection {
    All,
    Indices(Vec<usize>),
}

impl IndexSelection {
    pub fn all() -> Self {
        IndexSelection::All
    }

    /// Resolve against a collection of `count` items
    ///
    /// Returns the offending index when the selection points outside the collection.
    pub fn resolve(&self, count: usize) -> std::result::Result<Vec<usize>, usize> {
        match self {
            IndexSelection::All => Ok((0..count).collect()),
            IndexSelection::Indices(indices) => {
                if let Some(bad) = indices.iter().find(|&&i| i >= count) {
                    return Err(*bad);
                }
                Ok(indices.clone())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum SelectionRepr {
    Keyword(String),
    Indices(Vec<usize>),
    KeywordList(Vec<String>),
}

impl TryFrom<SelectionRepr> for IndexSelection {
    type Error = String;

    fn try_from(repr: SelectionRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            SelectionRepr::Keyword(word) if word == "all" => Ok(IndexSelection::All),
            SelectionRepr::KeywordList(words) if words.first().map(String::as_str) == Some("all") => {
                Ok(IndexSelection::All)
            }
            SelectionRepr::Indices(indices) if indices.is_empty() => {
                Err("index list must not be empty".to_string())
            }
            SelectionRepr::Indices(indices) => Ok(IndexSelection::Indices(indices)),
            SelectionRepr::Keyword(word) => Err(format!(
                "expected 'all' or a list of non-negative integers, got '{}'",
                word
            )),
            SelectionRepr::KeywordList(words) => Err(format!(
                "expected 'all' or a list of non-negative integers, got {:?}",
                words
            )),
        }
    }
}

impl From<IndexSelection> for SelectionRepr {
    fn from(selection: IndexSelection) -> Self {
        match selection {
            IndexSelection::All => SelectionRepr::Keyword("all".to_string()),
            IndexSelection::Indices(indices) => SelectionRepr::Indices(indices),
        }
    }
}

/// `[Data]`: which recording to sort and how to read it
///
/// This is the section the concatenation cache fingerprints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSection {
    pub dataset_type: DatasetType,
    #[serde(default)]
    pub session_folder: PathBuf,
    #[serde(default = "IndexSelection::all")]
    pub emg_recordings: IndexSelection,
    #[serde(default = "default_passband")]
    pub emg_passband: [f64; 2],
    /// Seconds; `[0, 0]` disables slicing
    #[serde(default)]
    pub time_range: [f64; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openephys_stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openephys_experiment_id: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_sampling_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_num_channels: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_dtype: Option<String>,
    #[serde(flatten)]
    pub extra: toml::Table,
}

fn default_passband() -> [f64; 2] {
    [250.0, 5000.0]
}

impl DataSection {
    pub fn time_range_enabled(&self) -> bool {
        self.time_range != [0.0, 0.0]
    }

    /// Folder name used in result folder names
    pub fn session_name(&self) -> String {
        self.session_folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// `[Group]`: channel groups sorted independently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSection {
    pub emg_chan_list: Vec<IndexSelection>,
    #[serde(default)]
    pub remove_bad_emg_chans: Vec<BadChannelPolicy>,
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl GroupSection {
    pub fn num_groups(&self) -> usize {
        self.emg_chan_list.len()
    }

    /// Bad-channel policy for a group; unlisted groups detect and report only
    pub fn bad_channel_policy(&self, group: usize) -> BadChannelPolicy {
        self.remove_bad_emg_chans
            .get(group)
            .copied()
            .unwrap_or(BadChannelPolicy::Off)
    }
}

/// `[Sorting]`: sorter invocation and the parameter sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortingSection {
    #[serde(default = "default_sorter_name")]
    pub sorter_name: String,
    /// External sorter command line; `{params}`, `{output}` and `{recording}` are substituted
    #[serde(default)]
    pub sorter_command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_folder: Option<PathBuf>,
    #[serde(rename = "GPU_to_use", default = "default_gpus")]
    pub gpu_to_use: Vec<u32>,
    #[serde(rename = "num_KS_jobs", default = "default_num_jobs")]
    pub num_ks_jobs: usize,
    #[serde(rename = "do_KS_param_gridsearch", default)]
    pub do_ks_param_gridsearch: bool,
    #[serde(rename = "gridsearch_KS_params", default)]
    pub gridsearch_ks_params: ParamGridSpec,
    #[serde(flatten)]
    pub extra: toml::Table,
}

fn default_sorter_name() -> String {
    "kilosort4".to_string()
}

fn default_gpus() -> Vec<u32> {
    vec![0]
}

fn default_num_jobs() -> usize {
    1
}

/// `[SI]`: waveform extraction and scoring resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiSection {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_chunk_duration")]
    pub chunk_duration: String,
    #[serde(flatten)]
    pub extra: toml::Table,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_chunk_duration() -> String {
    "1s".to_string()
}

impl Default for SiSection {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent(),
            chunk_duration: default_chunk_duration(),
            extra: toml::Table::new(),
        }
    }
}
