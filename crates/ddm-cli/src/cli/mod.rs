//! CLI for the DDM download manager.

mod commands;
pub mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ddm_core::config;
use ddm_core::engine::DownloadEngine;
use ddm_core::facade::JobFacade;
use ddm_core::store::TaskStore;
use ddm_core::task::Priority;
use std::path::Path;
use std::sync::Arc;

use commands::{
    run_add, run_bench, run_checksum, run_import_har, run_pause, run_priority, run_remove,
    run_resume, run_run, run_status,
};

/// Top-level CLI for the DDM download manager.
#[derive(Debug, Parser)]
#[command(name = "ddm")]
#[command(about = "DDM: high-throughput segmented download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add a new download job.
    Add {
        /// Direct HTTP/HTTPS URL to download.
        url: String,
        /// Directory where the file will be saved (default: current directory).
        #[arg(long, value_name = "DIR")]
        download_dir: Option<std::path::PathBuf>,
        /// Priority: low, normal, high, or urgent (default: auto from size).
        #[arg(long)]
        priority: Option<String>,
    },

    /// Run the engine: starts the worker pool and processes queued jobs
    /// until interrupted.
    Run {
        /// Run up to N tasks concurrently (default 1).
        #[arg(long, default_value = "1", value_name = "N")]
        jobs: usize,
    },

    /// Show status of all jobs.
    Status,

    /// Pause a job by ID.
    Pause {
        /// Job identifier.
        id: i64,
    },

    /// Resume a paused job by its ID.
    Resume {
        /// Job identifier.
        id: i64,
    },

    /// Remove a job by ID (and its on-disk artifacts).
    Remove {
        /// Job identifier.
        id: i64,
    },

    /// Change a job's priority.
    Priority {
        /// Job identifier.
        id: i64,
        /// New priority: low, normal, high, or urgent.
        level: String,
    },

    /// Import a HAR file and create download jobs from it.
    ImportHar {
        /// Path to the HAR file.
        path: String,

        /// Allow persisting cookies extracted from the HAR (if needed).
        #[arg(long)]
        allow_cookies: bool,
    },

    /// Benchmark different segment counts for a given URL.
    Bench {
        /// Direct HTTP/HTTPS URL to benchmark.
        url: String,
    },

    /// Compute SHA-256 of a file (e.g. after download).
    Checksum {
        /// Path to the file.
        path: String,
    },
}

fn parse_priority(s: &str) -> Result<Priority> {
    match s.to_ascii_lowercase().as_str() {
        "low" => Ok(Priority::Low),
        "normal" => Ok(Priority::Normal),
        "high" => Ok(Priority::High),
        "urgent" => Ok(Priority::Urgent),
        other => anyhow::bail!("unknown priority \"{other}\" (expected low, normal, high, or urgent)"),
    }
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Run { jobs } => {
                let mut run_cfg = cfg.clone();
                run_cfg.worker_count = jobs.max(1);
                let store = Arc::new(TaskStore::open_default().await?);
                let engine = DownloadEngine::start(run_cfg, store.clone(), None, None).await?;
                let facade = Arc::new(JobFacade::new(engine.clone(), store.pool().clone()).await?);
                run_run(engine, facade).await?;
            }
            other => {
                let store = Arc::new(TaskStore::open_default().await?);
                let engine = DownloadEngine::open_for_cli(cfg.clone(), store.clone(), None, None).await?;
                let facade = JobFacade::new(engine, store.pool().clone()).await?;

                match other {
                    CliCommand::Add { url, download_dir, priority } => {
                        let dir = download_dir.or_else(|| std::env::current_dir().ok()).unwrap_or_default();
                        let priority = priority.as_deref().map(parse_priority).transpose()?;
                        run_add(&facade, &url, &dir, priority).await?
                    }
                    CliCommand::Status => run_status(&facade).await?,
                    CliCommand::Pause { id } => run_pause(&facade, id).await?,
                    CliCommand::Resume { id } => run_resume(&facade, id).await?,
                    CliCommand::Remove { id } => run_remove(&facade, id).await?,
                    CliCommand::Priority { id, level } => {
                        let priority = parse_priority(&level)?;
                        run_priority(&facade, id, priority).await?
                    }
                    CliCommand::ImportHar { path, allow_cookies } => {
                        run_import_har(&facade, Path::new(&path), allow_cookies).await?;
                    }
                    CliCommand::Bench { url } => run_bench(&url).await?,
                    CliCommand::Checksum { path } => run_checksum(Path::new(&path)).await?,
                    CliCommand::Run { .. } => unreachable!("handled above"),
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
