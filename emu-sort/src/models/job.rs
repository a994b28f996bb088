//! Sorting job model
//!
//! A job pairs the shared preprocessed recording with its own output folder
//! and sorter parameters. Its [`JobConfig`] is the full session configuration
//! specialized for that job; it ends up as the result folder's
//! `emu_config.toml`.

use crate::error::{PipelineError, Result};
use crate::grid::ParameterCombination;
use crate::models::results::ResultsSection;
use crate::recording::RecordingHandle;
use chrono::{DateTime, Utc};
use emu_common::events::JobState;
use emu_common::EmuConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unit of work handed to the sorter
#[derive(Debug, Clone)]
pub struct SortJob {
    pub worker: usize,
    pub sorter_name: String,
    pub recording: RecordingHandle,
    pub output_folder: PathBuf,
    pub sorter_parameters: toml::Table,
}

/// Per-job configuration snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub worker: usize,
    pub group: usize,
    pub num_groups: usize,
    pub num_chans: usize,
    pub sorted_folder: PathBuf,
    pub emg_chans_used: Vec<String>,
    pub emg_chan_indices: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emg_chan_noise: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bad_chans_detected: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swept_params: Option<ParameterCombination>,
    /// Session configuration with this job's `[KS]` overrides applied
    #[serde(flatten)]
    pub config: EmuConfig,
    #[serde(rename = "Results", default, skip_serializing_if = "Option::is_none")]
    pub results: Option<ResultsSection>,
}

impl JobConfig {
    /// Sorter template width in samples (`[KS].nt`)
    pub fn nt(&self) -> Result<usize> {
        self.config
            .ks
            .get("nt")
            .and_then(|v| v.as_integer())
            .filter(|&nt| nt > 0)
            .map(|nt| nt as usize)
            .ok_or_else(|| {
                PipelineError::Config(format!(
                    "worker {}: [KS].nt must be a positive integer",
                    self.worker
                ))
            })
    }
}

/// Jobs of one channel group with their configurations, index-aligned
#[derive(Debug, Clone, Default)]
pub struct JobMatrix {
    pub jobs: Vec<SortJob>,
    pub configs: Vec<JobConfig>,
}

impl JobMatrix {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Recorded state change
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    pub worker: usize,
    pub old_state: JobState,
    pub new_state: JobState,
    pub transitioned_at: DateTime<Utc>,
}

/// Post-sort lifecycle of one job
#[derive(Debug, Clone)]
pub struct JobProgress {
    pub worker: usize,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobProgress {
    pub fn new(worker: usize) -> Self {
        Self {
            worker,
            state: JobState::RawSortOutput,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Move to `new_state`, which must be the direct successor of the current state
    pub fn advance(&mut self, new_state: JobState) -> Result<StateTransition> {
        if self.state.next() != Some(new_state) {
            return Err(PipelineError::Internal(format!(
                "worker {}: illegal transition {} -> {}",
                self.worker, self.state, new_state
            )));
        }
        Ok(self.transition_to(new_state))
    }

    /// Mark the job failed from any non-terminal state
    pub fn fail(&mut self) -> Option<StateTransition> {
        if self.state.is_terminal() {
            return None;
        }
        Some(self.transition_to(JobState::Failed))
    }

    fn transition_to(&mut self, new_state: JobState) -> StateTransition {
        let transition = StateTransition {
            worker: self.worker,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;
        if new_state.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_walks_forward() {
        let mut progress = JobProgress::new(2);
        for state in [
            JobState::WaveformsExtracted,
            JobState::Scored,
            JobState::Consolidated,
            JobState::Renamed,
        ] {
            let transition = progress.advance(state).unwrap();
            assert_eq!(transition.new_state, state);
            assert_eq!(transition.worker, 2);
        }
        assert!(progress.ended_at.is_some());
        assert!(progress.fail().is_none());
    }

    #[test]
    fn test_progress_rejects_skips_and_rewinds() {
        let mut progress = JobProgress::new(0);
        assert!(progress.advance(JobState::Scored).is_err());
        progress.advance(JobState::WaveformsExtracted).unwrap();
        assert!(progress.advance(JobState::RawSortOutput).is_err());
        assert_eq!(progress.state, JobState::WaveformsExtracted);
    }

    #[test]
    fn test_fail_from_middle_state() {
        let mut progress = JobProgress::new(1);
        progress.advance(JobState::WaveformsExtracted).unwrap();
        let transition = progress.fail().unwrap();
        assert_eq!(transition.old_state, JobState::WaveformsExtracted);
        assert_eq!(progress.state, JobState::Failed);
        assert!(progress.advance(JobState::Scored).is_err());
    }
}
