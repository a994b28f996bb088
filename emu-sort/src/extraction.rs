//! Result extraction pipeline
//!
//! Takes each job from raw sorter output to its permanent result folder:
//!
//! ```text
//! RAW_SORT_OUTPUT -> WAVEFORMS_EXTRACTED -> SCORED -> CONSOLIDATED -> RENAMED
//! ```
//!
//! Jobs run through the [`BatchScheduler`]; heavy steps are offloaded with
//! `spawn_blocking` so the jobs of one batch interleave.

use crate::consolidate;
use crate::error::{PipelineError, Result};
use crate::models::{JobConfig, JobProgress, ResultManifest, SortJob, StateTransition};
use crate::naming::final_folder_name;
use crate::recording::RecordingHandle;
use crate::scheduler::BatchScheduler;
use crate::scoring::{QualityScoreSet, QualityScoringEngine};
use crate::sorter::{Sorting, SortingResult};
use crate::waveforms::{extract_waveforms, WaveformParams, Waveforms};
use chrono::{Local, Utc};
use emu_common::config::{write_toml_atomic, CONFIG_FILE_NAME};
use emu_common::events::{EmuEvent, EventBus, JobState};
use ndarray::Array1;
use ndarray_npy::write_npy;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const CHANNELS_USED_FILE: &str = "emg_chans_used.npy";

/// Outcome of one finished job
#[derive(Debug, Clone)]
pub struct JobReport {
    pub worker: usize,
    /// Quality score report for the operator
    pub report: String,
    /// How to open the result in Phy
    pub view_message: String,
    pub final_folder: PathBuf,
    pub job_score: Option<f64>,
    pub manifest: ResultManifest,
}

pub fn view_message(worker: usize, final_folder: &Path) -> String {
    format!(
        "\nTo view Worker {} result in Phy, run:\nphy template-gui {}\n",
        worker,
        final_folder.join(consolidate::PHY_PARAMS_FILE).display()
    )
}

#[derive(Debug, Clone, Default)]
pub struct ResultExtractor {
    scoring: QualityScoringEngine,
    event_bus: EventBus,
}

impl ResultExtractor {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            scoring: QualityScoringEngine::default(),
            event_bus,
        }
    }

    pub fn with_scoring(mut self, scoring: QualityScoringEngine) -> Self {
        self.scoring = scoring;
        self
    }

    /// Extract every job in bounded batches, reports in job order
    pub async fn extract_all(
        &self,
        results: Vec<SortingResult>,
        jobs: &[SortJob],
        configs: Vec<JobConfig>,
        max_concurrent: usize,
    ) -> Result<Vec<JobReport>> {
        if results.len() != jobs.len() || configs.len() != jobs.len() {
            return Err(PipelineError::Internal(format!(
                "{} sorting results, {} jobs and {} job configs do not line up",
                results.len(),
                jobs.len(),
                configs.len()
            )));
        }

        let scheduler = BatchScheduler::new(max_concurrent)?.with_event_bus(self.event_bus.clone());
        info!(
            jobs = jobs.len(),
            max_concurrent,
            batches = scheduler.batch_count(jobs.len()),
            "Extracting sorting results"
        );

        let items: Vec<_> = results
            .into_iter()
            .zip(jobs.iter().cloned())
            .zip(configs)
            .map(|((result, job), config)| (result, job, config))
            .collect();

        scheduler
            .run(
                items,
                |(result, job, config)| self.extract_one(result, job, config),
                |batch, reports: &[JobReport]| {
                    for report in reports {
                        debug!(batch, worker = report.worker, "\n{}", report.report);
                    }
                },
            )
            .await
    }

    /// Run one job through every stage
    pub async fn extract_one(
        &self,
        result: SortingResult,
        job: SortJob,
        config: JobConfig,
    ) -> Result<JobReport> {
        let worker = config.worker;
        let mut progress = JobProgress::new(worker);

        match self.run_stages(&mut progress, result, job, config).await {
            Ok(report) => Ok(report),
            Err(e) => {
                if let Some(transition) = progress.fail() {
                    self.emit_transition(transition);
                }
                error!(worker, error = %e, "Result extraction failed");
                self.event_bus.emit_lossy(EmuEvent::JobFailed {
                    worker,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(PipelineError::Extraction {
                    worker,
                    source: Box::new(e),
                })
            }
        }
    }

    fn emit_transition(&self, transition: StateTransition) {
        self.event_bus.emit_lossy(EmuEvent::JobStateChanged {
            worker: transition.worker,
            old_state: transition.old_state,
            new_state: transition.new_state,
            timestamp: transition.transitioned_at,
        });
    }

    fn advance(&self, progress: &mut JobProgress, state: JobState) -> Result<()> {
        let transition = progress.advance(state)?;
        debug!(worker = transition.worker, state = %transition.new_state, "Job advanced");
        self.emit_transition(transition);
        Ok(())
    }

    async fn run_stages(
        &self,
        progress: &mut JobProgress,
        result: SortingResult,
        job: SortJob,
        mut config: JobConfig,
    ) -> Result<JobReport> {
        let worker = config.worker;
        let folder = result.output_folder.clone();
        let fs = job.recording.sampling_frequency();
        let params = WaveformParams::from_nt(config.nt()?, fs);
        info!(
            worker,
            nt = config.nt()?,
            fs,
            ms_buffer = params.ms_before,
            "Extracting waveforms"
        );

        let waveforms =
            extract_with_fallback(job.recording.clone(), result.sorting, params, worker).await?;
        self.advance(progress, JobState::WaveformsExtracted)?;

        info!(worker, units = waveforms.units.len(), "Computing quality metrics");
        let scoring = self.scoring.clone();
        let (scores, waveforms) = tokio::task::spawn_blocking(move || {
            let scores = scoring.score(&waveforms);
            (scores, waveforms)
        })
        .await?;
        self.advance(progress, JobState::Scored)?;

        config.emg_chan_noise = waveforms.noise_levels.clone();
        config.results = Some(scores.to_results());

        info!(worker, "Consolidating sorter output");
        let recording = job.recording.clone();
        let consolidate_folder = folder.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            consolidate::consolidate_sorter_output(&consolidate_folder)?;
            consolidate::write_recording_and_params(recording.as_ref(), &consolidate_folder)?;
            Ok(())
        })
        .await??;
        self.advance(progress, JobState::Consolidated)?;

        let report = scores.report(worker);
        let (final_folder, manifest) =
            tokio::task::spawn_blocking(move || finalize(&folder, config, &scores, &waveforms))
                .await??;
        self.advance(progress, JobState::Renamed)?;

        info!(
            worker,
            folder = %final_folder.display(),
            score = ?manifest.job_score,
            "Result folder ready"
        );
        Ok(JobReport {
            worker,
            report,
            view_message: view_message(worker, &final_folder),
            final_folder,
            job_score: manifest.job_score,
            manifest,
        })
    }
}

/// Extract waveforms, trimming boundary spikes and retrying once if needed
async fn extract_with_fallback(
    recording: RecordingHandle,
    sorting: Sorting,
    params: WaveformParams,
    worker: usize,
) -> Result<Waveforms> {
    let first = {
        let recording = recording.clone();
        let sorting = sorting.clone();
        let params = params.clone();
        tokio::task::spawn_blocking(move || extract_waveforms(recording.as_ref(), &sorting, &params))
            .await?
    };

    match first {
        Err(PipelineError::SpikesOutOfBounds { count, unit, sample }) => {
            warn!(
                worker,
                count,
                unit,
                sample,
                "Spikes too close to the recording edges, removing them and retrying"
            );
            tokio::task::spawn_blocking(move || {
                let fs = recording.sampling_frequency();
                let (trimmed, removed) = sorting.remove_excess_spikes(
                    recording.num_samples(0),
                    params.nbefore(fs),
                    params.nafter(fs),
                );
                debug!(worker, removed, "Removed excess spikes");
                extract_waveforms(recording.as_ref(), &trimmed, &params)
            })
            .await?
        }
        other => other,
    }
}

/// Rename the job folder and write the final config, channel list and manifest
fn finalize(
    folder: &Path,
    mut config: JobConfig,
    scores: &QualityScoreSet,
    waveforms: &Waveforms,
) -> Result<(PathBuf, ResultManifest)> {
    let sweep = config.config.sorting.do_ks_param_gridsearch;
    let mut manifest = ResultManifest {
        folder_name: String::new(),
        session_name: config.config.data.session_name(),
        sort_type: config.config.sort_type,
        group: config.group,
        num_groups: config.num_groups,
        worker: config.worker,
        num_units: waveforms.units.len(),
        channels: config.emg_chans_used.clone(),
        swept_params: if sweep { config.swept_params.clone() } else { None },
        job_score: scores.job_score(),
        created_at: Local::now(),
    };
    manifest.folder_name = final_folder_name(&manifest);

    let parent = folder
        .parent()
        .ok_or_else(|| PipelineError::Internal(format!("{} has no parent", folder.display())))?;
    let final_folder = parent.join(&manifest.folder_name);
    if final_folder.exists() {
        return Err(PipelineError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists", final_folder.display()),
        )));
    }
    std::fs::rename(folder, &final_folder)?;

    config.sorted_folder = final_folder.clone();
    write_toml_atomic(&config, &final_folder.join(CONFIG_FILE_NAME))?;

    match numeric_channel_ids(&config.emg_chans_used) {
        Some(ids) => write_npy(final_folder.join(CHANNELS_USED_FILE), &ids)?,
        None => warn!(
            worker = config.worker,
            channels = ?config.emg_chans_used,
            "Channel ids are not numeric, {} not written", CHANNELS_USED_FILE
        ),
    }
    manifest.write(&final_folder)?;

    Ok((final_folder, manifest))
}

/// Channel ids as integers, `None` if any id is not a number
fn numeric_channel_ids(ids: &[String]) -> Option<Array1<i64>> {
    ids.iter()
        .map(|id| id.trim().parse::<i64>().ok())
        .collect::<Option<Vec<_>>>()
        .map(Array1::from)
}
