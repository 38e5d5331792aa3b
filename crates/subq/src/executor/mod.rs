//! Runs one admitted job to a terminal status.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::info_span;

use crate::error::JobError;
use crate::failover::DEFAULT_MAX_ATTEMPTS;
use crate::jobs::{CancellationToken, Job, JobOutput, JobStatus, JobStore};
use crate::sanitize;
use crate::settings::SettingsStore;
use crate::tools::Toolbox;

mod handlers;
pub mod video_match;

use handlers::HandlerContext;

/// What happened when a job's outcome was written back.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub job_id: i64,
    /// Status the handler outcome maps to.
    pub status: JobStatus,
    pub error_message: Option<String>,
    /// `false` when the job was no longer `running` (for example after a
    /// timeout) and the outcome was dropped.
    pub recorded: bool,
}

/// Dispatches jobs to their handlers and records the outcome.
#[derive(Clone)]
pub struct JobExecutor {
    store: JobStore,
    settings: Arc<dyn SettingsStore>,
    tools: Toolbox,
    max_translation_attempts: u32,
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

impl JobExecutor {
    pub fn new(store: JobStore, settings: Arc<dyn SettingsStore>, tools: Toolbox) -> Self {
        Self {
            store,
            settings,
            tools,
            max_translation_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_translation_attempts(mut self, attempts: u32) -> Self {
        self.max_translation_attempts = attempts.max(1);
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn settings(&self) -> &dyn SettingsStore {
        self.settings.as_ref()
    }

    /// Runs the handler for `job` without touching the store.
    ///
    /// Panics inside the handler are converted into `JobError::Failed`.
    pub fn run_handler(&self, job: &Job, cancel: &CancellationToken) -> Result<JobOutput, JobError> {
        let settings = self.settings.load()?;
        let ctx = HandlerContext {
            settings: &settings,
            settings_store: self.settings.as_ref(),
            tools: &self.tools,
            max_translation_attempts: self.max_translation_attempts,
            cancel,
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handlers::dispatch(&ctx, job))) {
            Ok(result) => result,
            Err(payload) => Err(JobError::Failed(format!(
                "Job handler panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    /// Runs `job` (already `running`) and writes its terminal status.
    ///
    /// Never panics and never returns an error: handler failures become a
    /// `failed` status and store failures are logged.
    pub fn execute(&self, job: &Job, cancel: &CancellationToken) -> ExecutionReport {
        let file = sanitize::redact_path(Path::new(&job.file_path));
        let _span = info_span!("job",
            job_id = job.id,
            job_type = %job.job_type(),
            file = %file,
        )
        .entered();

        let started = Instant::now();
        let outcome = self
            .run_handler(job, cancel)
            .and_then(|output| serde_json::to_value(&output).map_err(|e| {
                JobError::Failed(format!("Failed to serialize job result: {}", e))
            }));

        let (status, error_message, result) = match outcome {
            Ok(value) => (JobStatus::Completed, None, Some(value)),
            Err(e) => (JobStatus::Failed, Some(e.to_string()), None),
        };

        let recorded = match self.store.update_status(
            job.id,
            status,
            error_message.as_deref(),
            result.as_ref(),
        ) {
            Ok(recorded) => recorded,
            Err(e) => {
                log::error!("Failed to record outcome of job {}: {}", job.id, e);
                false
            }
        };

        let elapsed = started.elapsed();
        match (&error_message, recorded) {
            (_, false) => log::warn!(
                "Job {} finished as {} after {:.1?} but is no longer running; outcome dropped",
                job.id,
                status,
                elapsed
            ),
            (None, true) => log::info!("Job {} completed in {:.1?}", job.id, elapsed),
            (Some(msg), true) => log::error!("Job {} failed after {:.1?}: {}", job.id, elapsed, msg),
        }

        ExecutionReport {
            job_id: job.id,
            status,
            error_message,
            recorded,
        }
    }
}
