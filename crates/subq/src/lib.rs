pub mod db;
pub mod error;
pub mod executor;
pub mod failover;
pub mod jobs;
pub mod sanitize;
pub mod scheduler;
pub mod settings;
pub mod tools;

pub use db::{Database, DatabaseError};
pub use error::{ConfigError, JobError, Result, SchedulerError, SubqError};
pub use executor::{ExecutionReport, JobExecutor};
pub use failover::{run_translation_with_failover, FailoverOutcome, TranslationTarget};
pub use jobs::{CancellationToken, Job, JobParams, JobStatus, JobStore, JobType};
pub use scheduler::{Dispatcher, JobTimeouts, SchedulerConfig, TickReport};
pub use settings::{JsonSettingsStore, MemorySettingsStore, Settings, SettingsStore};
pub use tools::{ToolError, Toolbox};
