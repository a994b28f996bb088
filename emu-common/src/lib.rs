//! # EMUsort Common Library
//!
//! Shared code for the EMUsort workspace including:
//! - Configuration model (`emu_config.toml`) and its persistence
//! - Common error type
//! - Pipeline event types (EmuEvent enum) and the EventBus
//! - Elapsed time formatting

pub mod config;
pub mod error;
pub mod events;
pub mod human_time;

pub use config::EmuConfig;
pub use error::{Error, Result};
