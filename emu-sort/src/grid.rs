//! Sorter parameter sweep
//!
//! A grid maps parameter names to candidate values. Expansion follows the
//! usual grid-search convention: keys in sorted order, Cartesian product with
//! the first key varying slowest.

use crate::error::{PipelineError, Result};
use emu_common::config::ParamGridSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One point of the sweep: a value for every swept parameter
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterCombination(BTreeMap<String, toml::Value>);

impl ParameterCombination {
    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &toml::Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Folder-name fragment, e.g. `Th_10,4_spkTh_-6`
    pub fn folder_suffix(&self) -> String {
        self.0
            .iter()
            .map(|(key, value)| format!("{}_{}", key, flatten_value(value)))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Write this combination into a sorter parameter table
    ///
    /// `Th` is a `[universal, learned]` pair and `spkTh` feeds the
    /// single-channel threshold; every other key is copied as is.
    pub fn apply_to(&self, params: &mut toml::Table) -> Result<()> {
        for (key, value) in &self.0 {
            match key.as_str() {
                "Th" => {
                    let pair = value.as_array().filter(|a| a.len() == 2).ok_or_else(|| {
                        PipelineError::Config(format!(
                            "Th must be a [universal, learned] pair, got {}",
                            value
                        ))
                    })?;
                    params.insert("Th_universal".to_string(), pair[0].clone());
                    params.insert("Th_learned".to_string(), pair[1].clone());
                }
                "spkTh" => {
                    params.insert("Th_single_ch".to_string(), value.clone());
                }
                _ => {
                    params.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, toml::Value)> for ParameterCombination {
    fn from_iter<I: IntoIterator<Item = (String, toml::Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn flatten_value(value: &toml::Value) -> String {
    match value {
        toml::Value::Array(items) => items
            .iter()
            .map(flatten_value)
            .collect::<Vec<_>>()
            .join(","),
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Every combination of the grid, first key slowest
///
/// An empty grid yields a single empty combination; a key without
/// candidates yields none.
pub fn expand(spec: &ParamGridSpec) -> Vec<ParameterCombination> {
    let mut combinations = vec![BTreeMap::new()];
    for (key, candidates) in spec {
        let mut next = Vec::with_capacity(combinations.len() * candidates.len());
        for partial in &combinations {
            for candidate in candidates {
                let mut extended = partial.clone();
                extended.insert(key.clone(), candidate.clone());
                next.push(extended);
            }
        }
        combinations = next;
    }
    combinations.into_iter().map(ParameterCombination).collect()
}

/// Combinations to run: the full grid, or only its first point when the sweep is off
pub fn combinations(spec: &ParamGridSpec, gridsearch: bool) -> Vec<ParameterCombination> {
    let mut all = expand(spec);
    if !gridsearch {
        all.truncate(1);
    }
    all
}
