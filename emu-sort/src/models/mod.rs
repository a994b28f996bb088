//! Data models for sorting jobs and their results

pub mod job;
pub mod results;

pub use job::{JobConfig, JobMatrix, JobProgress, SortJob, StateTransition};
pub use results::{ResultManifest, ResultsSection};
