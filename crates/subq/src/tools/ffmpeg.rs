//! Subtitle stream extraction via ffprobe, ffmpeg and mkvextract.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;

use super::command::run_checked;
use super::{SubtitleExtractor, ToolError};
use crate::jobs::CancellationToken;

const TEXT_CODECS: &[&str] = &["subrip", "ass", "ssa", "mov_text", "webvtt"];
const PGS_CODEC: &str = "hdmv_pgs_subtitle";
const VOBSUB_CODEC: &str = "dvd_subtitle";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Text,
    Pgs,
    VobSub,
}

impl StreamKind {
    fn from_codec(codec: &str) -> Option<Self> {
        if TEXT_CODECS.contains(&codec) {
            Some(StreamKind::Text)
        } else if codec == PGS_CODEC {
            Some(StreamKind::Pgs)
        } else if codec == VOBSUB_CODEC {
            Some(StreamKind::VobSub)
        } else {
            None
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            StreamKind::Text => "srt",
            StreamKind::Pgs => "sup",
            StreamKind::VobSub => "sub",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    /// Container-level stream index.
    index: Option<u32>,
    #[serde(default)]
    codec_name: String,
    #[serde(default)]
    tags: ProbeTags,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    #[serde(default)]
    language: Option<String>,
}

/// A subtitle stream selected for extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SelectedStream {
    /// Position among the container's subtitle streams (`0:s:<n>`).
    subtitle_index: usize,
    container_index: Option<u32>,
    kind: StreamKind,
}

/// Picks every stream tagged `language`: text codecs first, then PGS, then
/// VobSub.
fn select_streams(streams: &[ProbeStream], language: &str) -> Vec<SelectedStream> {
    let language = language.to_lowercase();
    let mut selected = Vec::new();

    for wanted in [StreamKind::Text, StreamKind::Pgs, StreamKind::VobSub] {
        for (idx, stream) in streams.iter().enumerate() {
            let lang = stream
                .tags
                .language
                .as_deref()
                .unwrap_or_default()
                .to_lowercase();
            if lang == language && StreamKind::from_codec(&stream.codec_name) == Some(wanted) {
                selected.push(SelectedStream {
                    subtitle_index: idx,
                    container_index: stream.index,
                    kind: wanted,
                });
            }
        }
    }

    selected
}

/// `<stem>.<ext>` for a single stream, `<stem>.track<N>.<ext>` otherwise.
fn output_path(video: &Path, stream: &SelectedStream, total: usize, ext: &str) -> PathBuf {
    let stem = video.with_extension("");
    let suffix = if total == 1 {
        String::new()
    } else {
        format!(".track{}", stream.subtitle_index)
    };
    PathBuf::from(format!("{}{}.{}", stem.display(), suffix, ext))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Extracts subtitle streams with the ffmpeg tool family.
#[derive(Debug, Clone)]
pub struct FfmpegExtractor {
    pub ffprobe: PathBuf,
    pub ffmpeg: PathBuf,
    pub mkvextract: PathBuf,
}

impl Default for FfmpegExtractor {
    fn default() -> Self {
        Self {
            ffprobe: PathBuf::from("ffprobe"),
            ffmpeg: PathBuf::from("ffmpeg"),
            mkvextract: PathBuf::from("mkvextract"),
        }
    }
}

impl FfmpegExtractor {
    fn probe(&self, video: &Path, cancel: &CancellationToken) -> Result<Vec<ProbeStream>, ToolError> {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.args(["-v", "quiet", "-print_format", "json", "-show_streams", "-select_streams", "s"])
            .arg(video);
        let output = run_checked(&mut cmd, cancel)?;
        let parsed: ProbeOutput =
            serde_json::from_str(&output.stdout).map_err(|e| ToolError::InvalidOutput {
                program: "ffprobe".to_string(),
                reason: e.to_string(),
            })?;
        Ok(parsed.streams)
    }

    fn extract_stream(
        &self,
        video: &Path,
        stream: &SelectedStream,
        total: usize,
        cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        let output = output_path(video, stream, total, stream.kind.extension());

        let mut cmd = match stream.kind {
            StreamKind::VobSub => {
                let track = stream.container_index.ok_or_else(|| {
                    ToolError::Failed(format!(
                        "No container track id for VobSub stream {}",
                        stream.subtitle_index
                    ))
                })?;
                let mut cmd = Command::new(&self.mkvextract);
                cmd.arg(video)
                    .arg("tracks")
                    .arg(format!("{}:{}", track, output.display()));
                cmd
            }
            kind => {
                let codec = if kind == StreamKind::Pgs { "copy" } else { "srt" };
                let mut cmd = Command::new(&self.ffmpeg);
                cmd.args(["-y", "-analyzeduration", "200M", "-probesize", "50M", "-i"])
                    .arg(video)
                    .arg("-map")
                    .arg(format!("0:s:{}", stream.subtitle_index))
                    .args(["-c:s", codec])
                    .arg(&output);
                cmd
            }
        };

        log::info!(
            "Extracting subtitle stream {} to {}",
            stream.subtitle_index,
            file_name(&output)
        );
        run_checked(&mut cmd, cancel)?;

        if !output.exists() {
            return Err(ToolError::Failed(format!(
                "Output file was not created for stream {}",
                stream.subtitle_index
            )));
        }

        if stream.kind == StreamKind::VobSub {
            let idx = output.with_extension("idx");
            if !idx.exists() {
                return Err(ToolError::Failed(format!(
                    "VobSub .idx file was not created for stream {}",
                    stream.subtitle_index
                )));
            }
            return Ok(format!("{} + {}", file_name(&output), file_name(&idx)));
        }

        Ok(file_name(&output))
    }
}

impl SubtitleExtractor for FfmpegExtractor {
    fn extract(
        &self,
        video: &Path,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ToolError> {
        let streams = self.probe(video, cancel)?;
        let selected = select_streams(&streams, language);
        if selected.is_empty() {
            return Err(ToolError::Failed(format!(
                "No subtitle streams found for language \"{}\"",
                language
            )));
        }

        let mut extracted = Vec::new();
        for stream in &selected {
            match self.extract_stream(video, stream, selected.len(), cancel) {
                Ok(name) => extracted.push(name),
                Err(ToolError::Cancelled) => return Err(ToolError::Cancelled),
                Err(e) => log::error!("Failed to extract stream {}: {}", stream.subtitle_index, e),
            }
        }

        if extracted.is_empty() {
            return Err(ToolError::Failed(
                "Failed to extract any subtitle streams".to_string(),
            ));
        }
        Ok(extracted)
    }
}
