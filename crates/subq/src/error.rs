use std::path::PathBuf;
use thiserror::Error;

use crate::tools::ToolError;

#[derive(Error, Debug)]
pub enum SubqError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, SubqError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write settings file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Settings validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Settings lock poisoned")]
    LockPoisoned,
}

/// Errors raised while executing one job. The message becomes the job's
/// `error_message`.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Configuration(String),

    #[error("Input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("{0}")]
    Tool(#[from] ToolError),

    #[error("Translation failed: {0}")]
    Translation(String),

    #[error("Failed to load settings: {0}")]
    Settings(#[from] ConfigError),

    #[error("Job store error: {0}")]
    Store(#[from] crate::db::DatabaseError),

    #[error("{0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Dispatcher is already running")]
    AlreadyRunning,

    #[error("Failed to build dispatcher runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
