//! Sorter engine boundary
//!
//! The engine receives every job of a group at once together with a
//! concurrency bound, and returns one [`SortingResult`] per job in job order.

mod process;

pub use process::{
    read_sorter_output, ExternalCommandSorter, PARAMS_FILE, SORTER_INPUT_DIR, SORTER_OUTPUT_DIR,
};

use crate::error::{PipelineError, Result};
use crate::models::SortJob;
use async_trait::async_trait;
use chrono::Utc;
use emu_common::events::{EmuEvent, EventBus};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

/// Spike trains per unit, in samples of the sorted recording
#[derive(Debug, Clone, PartialEq)]
pub struct Sorting {
    sampling_frequency: f64,
    spike_trains: BTreeMap<u32, Vec<i64>>,
}

impl Sorting {
    /// Build from per-unit trains; trains are sorted
    pub fn new(sampling_frequency: f64, mut spike_trains: BTreeMap<u32, Vec<i64>>) -> Self {
        for train in spike_trains.values_mut() {
            train.sort_unstable();
        }
        Self {
            sampling_frequency,
            spike_trains,
        }
    }

    /// Build from parallel spike-time and cluster-label arrays
    pub fn from_labels(sampling_frequency: f64, times: &[i64], labels: &[i64]) -> Result<Self> {
        if times.len() != labels.len() {
            return Err(PipelineError::Npy(format!(
                "{} spike times but {} cluster labels",
                times.len(),
                labels.len()
            )));
        }
        let mut trains: BTreeMap<u32, Vec<i64>> = BTreeMap::new();
        for (&time, &label) in times.iter().zip(labels) {
            let unit = u32::try_from(label)
                .map_err(|_| PipelineError::Npy(format!("invalid cluster label {}", label)))?;
            trains.entry(unit).or_default().push(time);
        }
        Ok(Self::new(sampling_frequency, trains))
    }

    pub fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    pub fn unit_ids(&self) -> Vec<u32> {
        self.spike_trains.keys().copied().collect()
    }

    pub fn spike_train(&self, unit: u32) -> &[i64] {
        self.spike_trains
            .get(&unit)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn num_units(&self) -> usize {
        self.spike_trains.len()
    }

    pub fn total_spikes(&self) -> usize {
        self.spike_trains.values().map(Vec::len).sum()
    }

    /// Copy without spikes whose `[t - nbefore, t + nafter)` window leaves `[0, num_samples)`
    ///
    /// Returns the trimmed sorting and the number of spikes removed. Units
    /// left without spikes are kept.
    pub fn remove_excess_spikes(
        &self,
        num_samples: usize,
        nbefore: usize,
        nafter: usize,
    ) -> (Sorting, usize) {
        let mut removed = 0;
        let trains = self
            .spike_trains
            .iter()
            .map(|(&unit, train)| {
                let kept: Vec<i64> = train
                    .iter()
                    .copied()
                    .filter(|&t| window_fits(t, num_samples, nbefore, nafter))
                    .collect();
                removed += train.len() - kept.len();
                (unit, kept)
            })
            .collect();
        (
            Sorting {
                sampling_frequency: self.sampling_frequency,
                spike_trains: trains,
            },
            removed,
        )
    }
}

/// Whether `[t - nbefore, t + nafter)` lies inside `[0, num_samples)`
pub fn window_fits(t: i64, num_samples: usize, nbefore: usize, nafter: usize) -> bool {
    t >= nbefore as i64 && t + nafter as i64 <= num_samples as i64
}

/// Sorter output for one job
#[derive(Debug, Clone)]
pub struct SortingResult {
    pub worker: usize,
    pub sorting: Sorting,
    pub output_folder: PathBuf,
}

/// Spike sorter capable of running several jobs
#[async_trait]
pub trait SorterEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Run every job with at most `n_jobs` in flight, results in job order
    async fn run_jobs(&self, jobs: &[SortJob], n_jobs: usize) -> Result<Vec<SortingResult>>;
}

/// Run a group's jobs through the engine and check the results line up
pub async fn dispatch(
    engine: &dyn SorterEngine,
    group: usize,
    jobs: &[SortJob],
    n_jobs: usize,
    event_bus: &EventBus,
) -> Result<Vec<SortingResult>> {
    let concurrency = n_jobs.clamp(1, jobs.len().max(1));
    info!(
        sorter = engine.name(),
        group,
        jobs = jobs.len(),
        concurrency,
        "Starting sorter"
    );
    event_bus.emit_lossy(EmuEvent::SortingStarted {
        group,
        jobs: jobs.len(),
        concurrency,
        timestamp: Utc::now(),
    });

    let results = engine.run_jobs(jobs, concurrency).await?;

    if results.len() != jobs.len() {
        return Err(PipelineError::SorterEngine(format!(
            "{} returned {} results for {} jobs",
            engine.name(),
            results.len(),
            jobs.len()
        )));
    }
    for (job, result) in jobs.iter().zip(&results) {
        if job.worker != result.worker || job.output_folder != result.output_folder {
            return Err(PipelineError::SorterEngine(format!(
                "{} returned results out of order (expected worker {}, got {})",
                engine.name(),
                job.worker,
                result.worker
            )));
        }
    }

    event_bus.emit_lossy(EmuEvent::SortingCompleted {
        group,
        jobs: jobs.len(),
        timestamp: Utc::now(),
    });
    info!(group, total_spikes = results.iter().map(|r| r.sorting.total_spikes()).sum::<usize>(), "Sorter finished");
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorting() -> Sorting {
        Sorting::from_labels(1000.0, &[50, 5, 995, 500, 20], &[1, 0, 0, 1, 1]).unwrap()
    }

    #[test]
    fn test_from_labels_groups_and_sorts() {
        let s = sorting();
        assert_eq!(s.unit_ids(), vec![0, 1]);
        assert_eq!(s.spike_train(0), &[5, 995]);
        assert_eq!(s.spike_train(1), &[20, 50, 500]);
        assert_eq!(s.total_spikes(), 5);
        assert!(s.spike_train(9).is_empty());
    }

    #[test]
    fn test_from_labels_rejects_mismatch() {
        assert!(Sorting::from_labels(1000.0, &[1, 2], &[0]).is_err());
        assert!(Sorting::from_labels(1000.0, &[1], &[-1]).is_err());
    }

    #[test]
    fn test_remove_excess_spikes_trims_edges() {
        let (trimmed, removed) = sorting().remove_excess_spikes(1000, 10, 10);
        assert_eq!(removed, 2);
        assert!(trimmed.spike_train(0).is_empty());
        assert_eq!(trimmed.spike_train(1), &[20, 50, 500]);
        assert_eq!(trimmed.num_units(), 2);
    }

    #[test]
    fn test_window_fits_boundaries() {
        assert!(window_fits(10, 100, 10, 10));
        assert!(!window_fits(9, 100, 10, 10));
        assert!(window_fits(90, 100, 10, 10));
        assert!(!window_fits(91, 100, 10, 10));
    }
}
