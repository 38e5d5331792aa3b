use std::path::PathBuf;

use clap::{Parser, Subcommand};
use subq::JobType;

#[derive(Parser, Debug)]
#[command(name = "subq", version, about = "Subtitle job queue")]
pub struct Cli {
    /// Job database (default: ~/.subq/data/jobs.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Settings file (default: ~/.subq/settings.json)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the dispatcher until interrupted
    Run {
        /// Override `max_parallel_jobs` from the settings
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Seconds between dispatcher ticks
        #[arg(long, default_value_t = 2)]
        poll_secs: u64,
    },

    /// Queue a job
    Enqueue {
        #[arg(value_parser = parse_job_type)]
        job_type: JobType,

        /// Target file, relative to the job's base directory
        file: String,

        /// Job parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
    },

    /// Show pending, running and recently failed jobs
    Status {
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Window for recently failed jobs
        #[arg(long, default_value_t = 24)]
        failed_hours: i64,
    },

    /// Delete a pending job
    Delete { id: i64 },

    /// Purge finished jobs
    Cleanup {
        #[arg(long, default_value_t = 7)]
        retention_days: i64,
    },
}

fn parse_job_type(s: &str) -> Result<JobType, String> {
    s.parse()
}
