//! emusort - EMUsort command line entry point
//!
//! Creates or resets a session's configuration, optionally opens it in an
//! editor, and runs the sorting pipeline.

use anyhow::{bail, Context, Result};
use clap::Parser;
use emu_common::config::{config_path, create_config, SortType};
use emu_common::human_time::format_elapsed;
use emu_common::EmuConfig;
use emu_sort::SortingSession;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for emusort
#[derive(Parser, Debug)]
#[command(name = "emusort")]
#[command(about = "Process EMG data and perform spike sorting")]
#[command(version)]
struct Args {
    /// Path to the session folder
    #[arg(short, long)]
    folder: PathBuf,

    /// Generate or update the configuration file in an editor
    #[arg(short, long)]
    config: bool,

    /// Reset the configuration file to the default EMUsort template
    #[arg(long)]
    reset_config: bool,

    /// Reset the configuration file to the default Kilosort4 template
    #[arg(long)]
    ks4_reset_config: bool,

    /// Perform spike sorting
    #[arg(short, long)]
    sort: bool,
}

/// Editor command: `EMUSORT_EDITOR`, then `EDITOR`, then the platform default
fn resolve_editor() -> String {
    std::env::var("EMUSORT_EDITOR")
        .or_else(|_| std::env::var("EDITOR"))
        .ok()
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| {
            if cfg!(windows) {
                "notepad".to_string()
            } else {
                "nano".to_string()
            }
        })
}

fn open_in_editor(path: &Path) -> Result<()> {
    let editor = resolve_editor();
    let status = std::process::Command::new(&editor)
        .arg(path)
        .status()
        .with_context(|| format!("Failed to launch editor '{}'", editor))?;
    if !status.success() {
        bail!("Editor '{}' exited with {}", editor, status);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let started = Instant::now();

    let session_folder = std::fs::canonicalize(&args.folder)
        .with_context(|| format!("Session folder {} not found", args.folder.display()))?;
    let sort_type = if args.ks4_reset_config {
        SortType::Ks4
    } else {
        SortType::Emu
    };

    let path = config_path(&session_folder, sort_type);
    if !path.exists() || args.reset_config || args.ks4_reset_config {
        println!("Generating config file from default template: \n{}\n", path.display());
        create_config(&session_folder, sort_type)?;
    }

    if args.config {
        open_in_editor(&path)?;
    }

    let mut config = EmuConfig::load(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?
        .with_session_folder(&session_folder);
    config.sort_type = sort_type;
    config.validate().context("Invalid configuration")?;

    if args.sort {
        info!(session = %session_folder.display(), "Starting spike sorting");
        let session = SortingSession::from_config(&config)?;
        let reports = session
            .run_reporting(&config, |group, reports| {
                debug!(group, jobs = reports.len(), "Group finished");
                for report in reports {
                    println!("{}", report.report);
                }
                for report in reports {
                    println!("{}", report.view_message);
                }
            })
            .await?;
        info!(jobs = reports.len(), "Spike sorting complete");
    }

    println!("Pipeline finished! You've earned a break.");
    println!("Time elapsed: {}", format_elapsed(started.elapsed()));
    Ok(())
}
