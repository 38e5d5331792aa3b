use std::path::PathBuf;
use thiserror::Error;

/// Errors from external collaborator tools.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The program could not be started at all.
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran and exited unsuccessfully.
    #[error("{program} failed: {message}")]
    CommandFailed { program: String, message: String },

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The program's output could not be interpreted.
    #[error("Unexpected output from {program}: {reason}")]
    InvalidOutput { program: String, reason: String },

    /// The run was cancelled because the job timed out.
    #[error("Cancelled")]
    Cancelled,

    /// No implementation is configured for this collaborator.
    #[error("{0} is not available")]
    Unavailable(&'static str),

    #[error("{0}")]
    Failed(String),
}
