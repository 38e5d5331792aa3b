//! `subq` command line: run the dispatcher or inspect the job queue.
//!
//! Logging: `RUST_LOG=subq=debug` overrides the default `info` filter.

mod cli;

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use subq::db::default_database_path;
use subq::scheduler::clamp_parallel;
use subq::settings::default_settings_path;
use subq::{
    Database, Dispatcher, Job, JobError, JobExecutor, JobParams, JobStore, JsonSettingsStore,
    SchedulerConfig, Settings, SettingsStore, Toolbox,
};

use crate::cli::{Cli, Command};

type CliResult<T> = Result<T, Box<dyn Error>>;

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    // The library logs through `log`; forward those records to the subscriber.
    if installed.is_ok() {
        let _ = tracing_log::LogTracer::init();
    }
}

fn resolve(path: Option<PathBuf>, default: Option<PathBuf>, what: &str) -> CliResult<PathBuf> {
    path.or(default)
        .ok_or_else(|| format!("Could not determine the default {} path; pass it explicitly", what).into())
}

fn open_store(cli: &Cli) -> CliResult<JobStore> {
    let path = resolve(cli.db.clone(), default_database_path(), "database")?;
    Ok(JobStore::new(Database::open(&path)?))
}

fn describe(job: &Job) -> String {
    let mut line = format!(
        "#{:<5} {:<18} {:<9} {}",
        job.id,
        job.job_type().as_str(),
        job.status.as_str(),
        job.file_path
    );
    if let Some(started) = job.started_at {
        line.push_str(&format!("  started {}", started.format("%Y-%m-%d %H:%M:%S")));
    }
    if let Some(err) = &job.error_message {
        line.push_str(&format!("\n        {}", err));
    }
    line
}

fn print_section(title: &str, jobs: &[Job]) {
    println!("{} ({})", title, jobs.len());
    for job in jobs {
        println!("  {}", describe(job));
    }
}

/// Without an override the bound tracks `max_parallel_jobs` in the settings
/// file while the loop runs.
fn scheduler_config(
    settings: &Settings,
    max_parallel: Option<usize>,
    poll_secs: u64,
) -> SchedulerConfig {
    let mut config = SchedulerConfig::from_settings(settings);
    if let Some(n) = max_parallel {
        let clamped = clamp_parallel(n);
        if clamped != n {
            log::warn!("--max-parallel {} is out of range; using {}", n, clamped);
        }
        config.max_parallel = clamped;
        config.follow_settings = false;
    }
    config.poll_interval = Duration::from_secs(poll_secs.max(1));
    config
}

fn run_dispatcher(cli: &Cli, max_parallel: Option<usize>, poll_secs: u64) -> CliResult<()> {
    let settings_path = resolve(cli.settings.clone(), default_settings_path(), "settings")?;
    let settings_store: Arc<dyn SettingsStore> = Arc::new(JsonSettingsStore::new(settings_path));
    let settings = settings_store.load()?;

    let store = open_store(cli)?;
    let executor = JobExecutor::new(store.clone(), settings_store, Toolbox::system());

    let config = scheduler_config(&settings, max_parallel, poll_secs);
    let dispatcher = Dispatcher::new(store, executor, config);
    dispatcher.start()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    log::info!("Press Ctrl-C to stop");
    let _ = rx.recv();
    log::info!("Shutting down");
    dispatcher.stop();
    Ok(())
}

fn run(cli: Cli) -> CliResult<()> {
    match &cli.command {
        Command::Run {
            max_parallel,
            poll_secs,
        } => run_dispatcher(&cli, *max_parallel, *poll_secs),

        Command::Enqueue {
            job_type,
            file,
            params,
        } => {
            let params = JobParams::from_json(*job_type, params.as_deref())
                .map_err(|e| JobError::InvalidParams(e.to_string()))?;
            let id = open_store(&cli)?.create(file, &params)?;
            println!("{}", id);
            Ok(())
        }

        Command::Status {
            limit,
            failed_hours,
        } => {
            let store = open_store(&cli)?;
            print_section("Running", &store.list_running()?);
            print_section("Pending", &store.list_pending(*limit)?);
            print_section(
                &format!("Failed in the last {}h", failed_hours),
                &store.list_recently_failed(chrono::Duration::hours(*failed_hours))?,
            );
            Ok(())
        }

        Command::Delete { id } => {
            if open_store(&cli)?.delete(*id)? {
                println!("Deleted job {}", id);
                Ok(())
            } else {
                Err(format!("Job {} not found or not pending", id).into())
            }
        }

        Command::Cleanup { retention_days } => {
            let removed = open_store(&cli)?.cleanup(chrono::Duration::days(*retention_days))?;
            println!("Removed {} finished jobs", removed);
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
