//! Session-level sorting orchestration
//!
//! Drives one EMUsort run end to end:
//! - Configuration validation (before any folder or process is touched)
//! - Recording load through the loader registry
//! - Per channel group: preprocessing, job matrix, sorter dispatch, result extraction
//! - Report collection in job order

use crate::cache::FingerprintCache;
use crate::error::{PipelineError, Result};
use crate::extraction::{JobReport, ResultExtractor};
use crate::matrix;
use crate::preprocess::{prepare_group, DefaultPreprocessor, SignalPreprocessor};
use crate::recording::LoaderRegistry;
use crate::scoring::QualityScoringEngine;
use crate::sorter::{dispatch, ExternalCommandSorter, SorterEngine};
use emu_common::events::EventBus;
use emu_common::human_time::format_elapsed;
use emu_common::EmuConfig;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Session orchestrator
///
/// Collaborators are injectable so embedding applications can register
/// vendor recording loaders or drive a sorter other than an external command.
pub struct SortingSession {
    loaders: Arc<LoaderRegistry>,
    preprocessor: Arc<dyn SignalPreprocessor>,
    sorter: Arc<dyn SorterEngine>,
    scoring: QualityScoringEngine,
    event_bus: EventBus,
}

impl SortingSession {
    /// Session with the built-in loaders and preprocessor
    pub fn new(sorter: Arc<dyn SorterEngine>) -> Self {
        Self {
            loaders: Arc::new(LoaderRegistry::new()),
            preprocessor: Arc::new(DefaultPreprocessor::default()),
            sorter,
            scoring: QualityScoringEngine::default(),
            event_bus: EventBus::default(),
        }
    }

    /// Session running the sorter command named in `[Sorting]`
    pub fn from_config(config: &EmuConfig) -> Result<Self> {
        let sorter = ExternalCommandSorter::new(
            config.sorting.sorter_name.clone(),
            config.sorting.sorter_command.clone(),
        )?;
        Ok(Self::new(Arc::new(sorter)))
    }

    pub fn with_loaders(mut self, loaders: LoaderRegistry) -> Self {
        self.loaders = Arc::new(loaders);
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn SignalPreprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_scoring(mut self, scoring: QualityScoringEngine) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Sort every channel group of the session
    ///
    /// # Phases
    /// 1. Validation - configuration errors surface before any side effect
    /// 2. Loading - one recording handle per session, one segment per recording
    /// 3. Per group - preprocessing (through the concatenation cache), job
    ///    matrix, sorter dispatch, batched result extraction
    ///
    /// # Returns
    /// One report per job, groups in order and jobs in worker order
    pub async fn run(&self, config: &EmuConfig) -> Result<Vec<JobReport>> {
        self.run_reporting(config, |_, _| {}).await
    }

    /// [`run`](Self::run), handing each group's reports to `on_group` as soon
    /// as that group is finished
    ///
    /// Groups completed before a failing one have already been reported
    /// when the error is returned.
    pub async fn run_reporting<G>(&self, config: &EmuConfig, mut on_group: G) -> Result<Vec<JobReport>>
    where
        G: FnMut(usize, &[JobReport]),
    {
        let started = Instant::now();
        config
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        info!(
            session = %config.data.session_folder.display(),
            dataset_type = %config.data.dataset_type,
            groups = config.num_groups(),
            sorter = self.sorter.name(),
            "Starting EMUsort session"
        );

        let loaders = self.loaders.clone();
        let data = config.data.clone();
        let loaded = tokio::task::spawn_blocking(move || loaders.load(&data)).await??;
        info!(
            recordings = loaded.num_segments(),
            channels = loaded.num_channels(),
            fs = loaded.sampling_frequency(),
            "Recording loaded"
        );

        std::fs::create_dir_all(config.output_folder())?;
        let cache = FingerprintCache::with_event_bus(self.event_bus.clone());
        let extractor =
            ResultExtractor::new(self.event_bus.clone()).with_scoring(self.scoring.clone());

        let mut reports = Vec::new();
        for group in 0..config.num_groups() {
            info!(group, "Preparing channel group");
            let prepared = {
                let preprocessor = self.preprocessor.clone();
                let cache = cache.clone();
                let config = config.clone();
                let loaded = loaded.clone();
                tokio::task::spawn_blocking(move || {
                    prepare_group(preprocessor.as_ref(), &cache, &config, &loaded, group)
                })
                .await??
            };

            let matrix = matrix::build(config, &prepared)?;
            let results = dispatch(
                self.sorter.as_ref(),
                group,
                &matrix.jobs,
                config.sorting.num_ks_jobs,
                &self.event_bus,
            )
            .await?;

            let group_reports = extractor
                .extract_all(
                    results,
                    &matrix.jobs,
                    matrix.configs,
                    config.si.max_concurrent_tasks,
                )
                .await?;
            on_group(group, &group_reports);
            reports.extend(group_reports);
        }

        info!(
            jobs = reports.len(),
            elapsed = %format_elapsed(started.elapsed()),
            "EMUsort session complete"
        );
        Ok(reports)
    }
}
