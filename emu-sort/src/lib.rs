//! emu-sort library interface
//!
//! EMUsort parameter-sweep orchestration around an external spike sorter:
//! recording preparation, job fan-out, sorter dispatch, quality scoring and
//! result folder management. The `emusort` binary is a thin CLI over
//! [`orchestrator::SortingSession`].

pub mod cache;
pub mod consolidate;
pub mod error;
pub mod extraction;
pub mod grid;
pub mod isolation;
pub mod matrix;
pub mod metrics;
pub mod models;
pub mod naming;
pub mod orchestrator;
pub mod preprocess;
pub mod recording;
pub mod scheduler;
pub mod scoring;
pub mod sorter;
pub mod stats;
pub mod waveforms;

pub use crate::error::{PipelineError, Result};
pub use crate::extraction::JobReport;
pub use crate::orchestrator::SortingSession;
