//! Scoring results persisted with each job

use crate::grid::ParameterCombination;
use emu_common::config::SortType;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// `[Results]` section of a job's `emu_config.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsSection {
    pub unit_ids: Vec<u32>,
    pub snr_scores: Vec<f64>,
    pub firing_rate_validity_scores: Vec<f64>,
    #[serde(rename = "type_I_scores")]
    pub type_i_scores: Vec<f64>,
    #[serde(rename = "type_II_scores")]
    pub type_ii_scores: Vec<f64>,
    pub emusort_scores: Vec<f64>,
    pub emusort_score: f64,
}

/// `manifest.json` written into every finished result folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultManifest {
    pub folder_name: String,
    pub session_name: String,
    pub sort_type: SortType,
    pub group: usize,
    pub num_groups: usize,
    pub worker: usize,
    pub num_units: usize,
    pub channels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swept_params: Option<ParameterCombination>,
    /// `None` when no unit produced a finite score
    pub job_score: Option<f64>,
    pub created_at: chrono::DateTime<chrono::Local>,
}

impl ResultManifest {
    pub const FILE_NAME: &'static str = "manifest.json";

    pub fn write(&self, folder: &Path) -> std::io::Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(folder.join(Self::FILE_NAME), text)
    }

    pub fn read(folder: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(folder.join(Self::FILE_NAME))?;
        serde_json::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
