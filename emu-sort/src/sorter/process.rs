//! Sorter run as an external command
//!
//! For each job the recording is written to `<job>/sorter_input/recording.dat`
//! and the parameters to `<job>/sorter_params.json`; the command is then run
//! inside the job folder and must leave Kilosort-style `spike_times.npy` and
//! `spike_clusters.npy` in `<job>/sorter_output/`. The input copy is removed
//! once the command exits.

use super::{SorterEngine, Sorting, SortingResult};
use crate::error::{PipelineError, Result};
use crate::models::SortJob;
use crate::recording::write_segment;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use ndarray::ArrayD;
use ndarray_npy::read_npy;
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const SORTER_INPUT_DIR: &str = "sorter_input";
pub const SORTER_OUTPUT_DIR: &str = "sorter_output";
pub const PARAMS_FILE: &str = "sorter_params.json";

/// Lines of stderr kept in failure messages
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Serialize)]
struct SorterInvocation<'a> {
    sorter_name: &'a str,
    worker: usize,
    recording: &'a Path,
    sampling_frequency: f64,
    num_channels: usize,
    num_samples: usize,
    dtype: &'a str,
    channel_ids: &'a [String],
    output_folder: &'a Path,
    params: &'a toml::Table,
}

#[derive(Debug, Clone)]
pub struct ExternalCommandSorter {
    name: String,
    command: Vec<String>,
}

impl ExternalCommandSorter {
    /// `command[0]` is the program; `{params}`, `{output}` and `{recording}`
    /// are substituted in every argument
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Result<Self> {
        if command.is_empty() || command[0].trim().is_empty() {
            return Err(PipelineError::Config(
                "sorter_command in [Sorting] must name a program".to_string(),
            ));
        }
        Ok(Self {
            name: name.into(),
            command,
        })
    }

    fn expand_args(&self, params: &Path, output: &Path, recording: &Path) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| {
                arg.replace("{params}", &params.to_string_lossy())
                    .replace("{output}", &output.to_string_lossy())
                    .replace("{recording}", &recording.to_string_lossy())
            })
            .collect()
    }

    async fn run_one(&self, job: &SortJob) -> Result<SortingResult> {
        let worker = job.worker;
        let recording = &job.recording;
        if recording.num_segments() != 1 {
            return Err(PipelineError::Sorter {
                worker,
                message: format!(
                    "expected a single-segment recording, got {} segments",
                    recording.num_segments()
                ),
            });
        }

        let output = job.output_folder.clone();
        let input_dir = output.join(SORTER_INPUT_DIR);
        tokio::fs::create_dir_all(&input_dir).await?;

        let recording_path = input_dir.join("recording.dat");
        {
            let recording = recording.clone();
            let path = recording_path.clone();
            tokio::task::spawn_blocking(move || {
                write_segment(recording.as_ref(), 0, &path, recording.dtype())
            })
            .await??;
        }

        let params_path = output.join(PARAMS_FILE);
        let invocation = SorterInvocation {
            sorter_name: &job.sorter_name,
            worker,
            recording: &recording_path,
            sampling_frequency: recording.sampling_frequency(),
            num_channels: recording.num_channels(),
            num_samples: recording.num_samples(0),
            dtype: recording.dtype().name(),
            channel_ids: recording.channel_ids(),
            output_folder: &output,
            params: &job.sorter_parameters,
        };
        tokio::fs::write(&params_path, serde_json::to_vec_pretty(&invocation)?).await?;

        let args = self.expand_args(&params_path, &output, &recording_path);
        info!(worker, program = %args[0], folder = %output.display(), "Running sorter");
        let result = Command::new(&args[0])
            .args(&args[1..])
            .current_dir(&output)
            .env("CUDA_DEVICE_ORDER", "PCI_BUS_ID")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::Sorter {
                worker,
                message: format!("failed to start '{}': {}", args[0], e),
            });
        remove_sorter_input(&input_dir, worker).await;
        let result = result?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            return Err(PipelineError::Sorter {
                worker,
                message: format!("exited with {}: {}", result.status, tail),
            });
        }
        debug!(worker, stdout_bytes = result.stdout.len(), "Sorter exited cleanly");

        let sorter_output = output.join(SORTER_OUTPUT_DIR);
        let fs = recording.sampling_frequency();
        let sorting =
            tokio::task::spawn_blocking(move || read_sorter_output(&sorter_output, fs)).await??;

        Ok(SortingResult {
            worker,
            sorting,
            output_folder: output,
        })
    }
}

async fn remove_sorter_input(input_dir: &Path, worker: usize) {
    if let Err(e) = tokio::fs::remove_dir_all(input_dir).await {
        warn!(worker, error = %e, folder = %input_dir.display(), "Could not remove sorter input");
    }
}

#[async_trait]
impl SorterEngine for ExternalCommandSorter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_jobs(&self, jobs: &[SortJob], n_jobs: usize) -> Result<Vec<SortingResult>> {
        let runs: Vec<_> = jobs.iter().map(|job| self.run_one(job)).collect();
        futures::stream::iter(runs)
            .buffered(n_jobs.max(1))
            .try_collect()
            .await
    }
}

/// Read `spike_times.npy` and `spike_clusters.npy` from a sorter output folder
pub fn read_sorter_output(folder: &Path, sampling_frequency: f64) -> Result<Sorting> {
    let times = read_index_array(&folder.join("spike_times.npy"))?;
    let labels = read_index_array(&folder.join("spike_clusters.npy"))?;
    Sorting::from_labels(sampling_frequency, &times, &labels)
}

/// Integer array of any shape and common integer dtype, flattened
fn read_index_array(path: &Path) -> Result<Vec<i64>> {
    if !path.exists() {
        return Err(PipelineError::Npy(format!("{} not found", path.display())));
    }
    if let Ok(array) = read_npy::<_, ArrayD<i64>>(path) {
        return Ok(array.iter().copied().collect());
    }
    if let Ok(array) = read_npy::<_, ArrayD<i32>>(path) {
        return Ok(array.iter().map(|&v| v as i64).collect());
    }
    if let Ok(array) = read_npy::<_, ArrayD<u32>>(path) {
        return Ok(array.iter().map(|&v| v as i64).collect());
    }
    let array = read_npy::<_, ArrayD<u64>>(path)
        .map_err(|e| PipelineError::Npy(format!("{}: {}", path.display(), e)))?;
    array
        .iter()
        .map(|&v| {
            i64::try_from(v)
                .map_err(|_| PipelineError::Npy(format!("{}: value {} too large", path.display(), v)))
        })
        .collect()
}
