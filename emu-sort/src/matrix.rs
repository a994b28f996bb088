//! Job matrix construction
//!
//! One job per parameter combination, all sharing the group's preprocessed
//! recording. Each job gets its own folder, a device, and sorter parameters
//! with the combination applied and neighborhood sizes clamped to the number
//! of channels actually present.

use crate::error::{PipelineError, Result};
use crate::grid;
use crate::isolation;
use crate::models::{JobConfig, JobMatrix, SortJob};
use crate::preprocess::PreparedGroup;
use emu_common::EmuConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Sorter parameters that must not exceed the channel count
const CHANNEL_BOUNDED_KEYS: &[&str] = &["nearest_chans", "nearest_templates"];

/// `<output>/sorted_g<group>_<session>`, the prefix shared by a group's worker folders
pub fn group_base(output_folder: &Path, session_name: &str, group: usize, num_groups: usize) -> PathBuf {
    output_folder.join(format!(
        "sorted_g{:0width$}_{}",
        group,
        session_name,
        width = isolation::pad_width(num_groups)
    ))
}

/// Device string for a worker, round-robin over the configured GPUs
pub fn device_for(worker: usize, gpus: &[u32]) -> String {
    if gpus.is_empty() {
        return "cpu".to_string();
    }
    format!("cuda:{}", gpus[worker % gpus.len()])
}

fn clamp_to_channels(params: &mut toml::Table, num_chans: usize) {
    for key in CHANNEL_BOUNDED_KEYS {
        if let Some(value) = params.get(*key).and_then(|v| v.as_integer()) {
            if value > num_chans as i64 {
                debug!(key, value, num_chans, "Clamping sorter parameter to channel count");
                params.insert(key.to_string(), toml::Value::Integer(num_chans as i64));
            }
        }
    }
}

/// Build the jobs for one prepared channel group
///
/// Fails before touching any folder when parallel jobs are requested without
/// a parameter sweep.
pub fn build(config: &EmuConfig, prepared: &PreparedGroup) -> Result<JobMatrix> {
    let sorting = &config.sorting;
    if sorting.num_ks_jobs > 1 && !sorting.do_ks_param_gridsearch {
        return Err(PipelineError::Config(
            "Parallel jobs can only be used when do_KS_param_gridsearch is set to true"
                .to_string(),
        ));
    }

    let combinations = grid::combinations(
        &sorting.gridsearch_ks_params,
        sorting.do_ks_param_gridsearch,
    );
    if combinations.is_empty() {
        return Err(PipelineError::Config(
            "gridsearch_KS_params produced no parameter combinations".to_string(),
        ));
    }

    let total = combinations.len();
    let num_chans = prepared.num_chans();
    let base = group_base(
        &config.output_folder(),
        &config.data.session_name(),
        prepared.group,
        config.num_groups(),
    );
    info!(
        group = prepared.group,
        jobs = total,
        num_chans,
        gridsearch = sorting.do_ks_param_gridsearch,
        "Building job matrix"
    );

    let mut matrix = JobMatrix::default();
    for (worker, combination) in combinations.into_iter().enumerate() {
        let mut params = config.ks.clone();
        combination.apply_to(&mut params)?;
        clamp_to_channels(&mut params, num_chans);
        params.insert(
            "torch_device".to_string(),
            toml::Value::String(device_for(worker, &sorting.gpu_to_use)),
        );

        let folder = isolation::allocate(&base, worker, total);

        let mut job_config = config.clone();
        job_config.ks = params.clone();

        matrix.configs.push(JobConfig {
            worker,
            group: prepared.group,
            num_groups: config.num_groups(),
            num_chans,
            sorted_folder: folder.clone(),
            emg_chans_used: prepared.channel_ids.clone(),
            emg_chan_indices: prepared.channel_indices.clone(),
            emg_chan_noise: Vec::new(),
            bad_chans_detected: prepared.bad_channel_ids.clone(),
            swept_params: (!combination.is_empty()).then_some(combination),
            config: job_config,
            results: None,
        });
        matrix.jobs.push(SortJob {
            worker,
            sorter_name: sorting.sorter_name.clone(),
            recording: prepared.recording.clone(),
            output_folder: folder,
            sorter_parameters: params,
        });
    }

    Ok(matrix)
}
