//! Child process execution that honours a cancellation token.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use super::ToolError;
use crate::jobs::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Captured result of a finished child process.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Formats a failure with both stderr and stdout.
    pub fn error_message(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();

        match (stderr.is_empty(), stdout.is_empty()) {
            (true, true) => format!(
                "Command failed with exit code {}",
                self.status.code().unwrap_or(-1)
            ),
            (true, false) => stdout.to_string(),
            (false, true) => stderr.to_string(),
            (false, false) => format!("{}\n{}", stderr, stdout),
        }
    }
}

fn program_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn kill(child: &mut Child, program: &str) {
    if let Err(e) = child.kill() {
        log::warn!("Failed to kill {}: {}", program, e);
    }
    let _ = child.wait();
}

/// Runs `cmd` to completion, capturing output.
///
/// The token is polled while the child runs; once it fires the child is
/// killed and `ToolError::Cancelled` is returned.
pub fn run(cmd: &mut Command, cancel: &CancellationToken) -> Result<CommandOutput, ToolError> {
    let program = program_name(cmd);
    log::debug!("Running {}", program);

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ToolError::Spawn {
            program: program.clone(),
            source: e,
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        if cancel.is_cancelled() {
            log::warn!("Cancelling {}", program);
            kill(&mut child, &program);
            return Err(ToolError::Cancelled);
        }
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                kill(&mut child, &program);
                return Err(ToolError::Failed(format!(
                    "Failed to wait for {}: {}",
                    program, e
                )));
            }
        }
    };

    Ok(CommandOutput {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

/// Like [`run`], but a non-zero exit becomes `ToolError::CommandFailed`.
pub fn run_checked(
    cmd: &mut Command,
    cancel: &CancellationToken,
) -> Result<CommandOutput, ToolError> {
    let program = program_name(cmd);
    let output = run(cmd, cancel)?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(ToolError::CommandFailed {
            program,
            message: output.error_message(),
        })
    }
}
