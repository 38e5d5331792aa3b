use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::command::run_checked;
use super::{SubtitleAligner, ToolError};
use crate::jobs::{CancellationToken, SyncOptions};

/// Aligns subtitles with the `ffsubsync` CLI.
#[derive(Debug, Clone)]
pub struct FfsubsyncAligner {
    pub program: PathBuf,
}

impl Default for FfsubsyncAligner {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffsubsync"),
        }
    }
}

fn build_args(video: &Path, subtitle: &Path, output: &Path, options: &SyncOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        video.into(),
        "-i".into(),
        subtitle.into(),
        "-o".into(),
        output.into(),
    ];
    if let Some(max_offset) = options.max_offset_seconds {
        args.push("--max-offset-seconds".into());
        args.push(max_offset.to_string().into());
    }
    if options.no_fix_framerate {
        args.push("--no-fix-framerate".into());
    }
    if options.gss {
        args.push("--gss".into());
    }
    args
}

impl SubtitleAligner for FfsubsyncAligner {
    fn align(
        &self,
        video: &Path,
        subtitle: &Path,
        output: &Path,
        options: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(build_args(video, subtitle, output, options));
        run_checked(&mut cmd, cancel)?;

        if !output.exists() {
            return Err(ToolError::Failed(format!(
                "ffsubsync did not write {}",
                output.display()
            )));
        }
        Ok(())
    }
}
