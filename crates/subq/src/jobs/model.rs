//! Typed job model.
//!
//! Every job type carries its own parameter struct. The `params` column stores
//! the inner struct as JSON; the `job_type` column selects which struct to
//! decode it into.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::job_repo::JobRow;
use crate::db::{parse_timestamp, DatabaseError};
use crate::tools::SubtitleCandidate;

/// The kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Extract,
    SupToSrt,
    Translate,
    SearchSubtitles,
    SyncSubtitles,
    PublishSubtitles,
}

impl JobType {
    pub const ALL: [JobType; 6] = [
        JobType::Extract,
        JobType::SupToSrt,
        JobType::Translate,
        JobType::SearchSubtitles,
        JobType::SyncSubtitles,
        JobType::PublishSubtitles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Extract => "extract",
            JobType::SupToSrt => "sup_to_srt",
            JobType::Translate => "translate",
            JobType::SearchSubtitles => "search_subtitles",
            JobType::SyncSubtitles => "sync_subtitles",
            JobType::PublishSubtitles => "publish_subtitles",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown job type: {}", s))
    }
}

/// Lifecycle state of a job: `pending → running → {completed | failed | timeout}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout
        )
    }

    /// The only status a job may hold immediately before entering `self`.
    pub fn required_predecessor(&self) -> Option<JobStatus> {
        match self {
            JobStatus::Pending => None,
            JobStatus::Running => Some(JobStatus::Pending),
            JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout => {
                Some(JobStatus::Running)
            }
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "timeout" => Ok(JobStatus::Timeout),
            other => Err(format!("Unknown job status: {}", other)),
        }
    }
}

// ─── Parameters ────────────────────────────────────────────────────────────

/// Parameters for stream extraction from a video container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    /// ISO 639-2 language tag of the streams to extract; settings default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
}

/// Parameters for bitmap subtitle (PGS / VobSub) to SRT conversion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupToSrtParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_language: Option<String>,
    pub debug: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_subtitle_index: Option<u32>,
}

/// Parameters for translating an SRT file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_lang: Option<String>,
}

/// Parameters for searching and downloading subtitles for a video.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSubtitlesParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    /// Language preference order; settings default when empty.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_downloads: Option<u32>,
}

/// Options forwarded to the alignment tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_offset_seconds: Option<u32>,
    pub no_fix_framerate: bool,
    pub gss: bool,
}

/// Parameters for aligning a subtitle against its video.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSubtitlesParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    /// Explicit video path relative to the base directory; skips matching.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    pub options: SyncOptions,
}

/// Parameters for uploading a subtitle to a publishing provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSubtitlesParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Job parameters, one variant per job type.
#[derive(Debug, Clone, PartialEq)]
pub enum JobParams {
    Extract(ExtractParams),
    SupToSrt(SupToSrtParams),
    Translate(TranslateParams),
    SearchSubtitles(SearchSubtitlesParams),
    SyncSubtitles(SyncSubtitlesParams),
    PublishSubtitles(PublishSubtitlesParams),
}

impl JobParams {
    pub fn job_type(&self) -> JobType {
        match self {
            JobParams::Extract(_) => JobType::Extract,
            JobParams::SupToSrt(_) => JobType::SupToSrt,
            JobParams::Translate(_) => JobType::Translate,
            JobParams::SearchSubtitles(_) => JobType::SearchSubtitles,
            JobParams::SyncSubtitles(_) => JobType::SyncSubtitles,
            JobParams::PublishSubtitles(_) => JobType::PublishSubtitles,
        }
    }

    /// Default (empty) parameters for a job type.
    pub fn default_for(job_type: JobType) -> Self {
        match job_type {
            JobType::Extract => JobParams::Extract(Default::default()),
            JobType::SupToSrt => JobParams::SupToSrt(Default::default()),
            JobType::Translate => JobParams::Translate(Default::default()),
            JobType::SearchSubtitles => JobParams::SearchSubtitles(Default::default()),
            JobType::SyncSubtitles => JobParams::SyncSubtitles(Default::default()),
            JobType::PublishSubtitles => JobParams::PublishSubtitles(Default::default()),
        }
    }

    pub fn base_dir(&self) -> Option<&Path> {
        match self {
            JobParams::Extract(p) => p.base_dir.as_deref(),
            JobParams::SupToSrt(p) => p.base_dir.as_deref(),
            JobParams::Translate(p) => p.base_dir.as_deref(),
            JobParams::SearchSubtitles(p) => p.base_dir.as_deref(),
            JobParams::SyncSubtitles(p) => p.base_dir.as_deref(),
            JobParams::PublishSubtitles(p) => p.base_dir.as_deref(),
        }
    }

    /// Serializes the variant's inner struct.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            JobParams::Extract(p) => serde_json::to_string(p),
            JobParams::SupToSrt(p) => serde_json::to_string(p),
            JobParams::Translate(p) => serde_json::to_string(p),
            JobParams::SearchSubtitles(p) => serde_json::to_string(p),
            JobParams::SyncSubtitles(p) => serde_json::to_string(p),
            JobParams::PublishSubtitles(p) => serde_json::to_string(p),
        }
    }

    /// Decodes stored params for the given job type. A missing blob yields
    /// the type's defaults.
    pub fn from_json(job_type: JobType, raw: Option<&str>) -> Result<Self, serde_json::Error> {
        let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
            return Ok(Self::default_for(job_type));
        };
        Ok(match job_type {
            JobType::Extract => JobParams::Extract(serde_json::from_str(raw)?),
            JobType::SupToSrt => JobParams::SupToSrt(serde_json::from_str(raw)?),
            JobType::Translate => JobParams::Translate(serde_json::from_str(raw)?),
            JobType::SearchSubtitles => JobParams::SearchSubtitles(serde_json::from_str(raw)?),
            JobType::SyncSubtitles => JobParams::SyncSubtitles(serde_json::from_str(raw)?),
            JobType::PublishSubtitles => JobParams::PublishSubtitles(serde_json::from_str(raw)?),
        })
    }
}

// ─── Outputs ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractOutput {
    pub output_files: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupToSrtOutput {
    pub output_file: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateOutput {
    pub output_file: String,
    pub message: String,
}

/// One language tried during a subtitle search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchAttempt {
    pub language: String,
    pub found: usize,
    pub downloaded: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSubtitlesOutput {
    pub downloaded_files: Vec<String>,
    pub attempts: Vec<SearchAttempt>,
    pub subtitles: Vec<SubtitleCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSubtitlesOutput {
    pub output_file: String,
    pub video: String,
    pub options: SyncOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishSubtitlesOutput {
    pub provider: String,
    pub result: serde_json::Value,
}

/// Result produced by a successful handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobOutput {
    Extract(ExtractOutput),
    SupToSrt(SupToSrtOutput),
    Translate(TranslateOutput),
    SearchSubtitles(SearchSubtitlesOutput),
    SyncSubtitles(SyncSubtitlesOutput),
    PublishSubtitles(PublishSubtitlesOutput),
}

// ─── Job ───────────────────────────────────────────────────────────────────

/// A decoded job record.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: i64,
    pub status: JobStatus,
    pub file_path: String,
    pub params: JobParams,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl Job {
    pub fn job_type(&self) -> JobType {
        self.params.job_type()
    }
}

fn corrupt(id: i64, reason: impl Into<String>) -> DatabaseError {
    DatabaseError::CorruptRow {
        id,
        reason: reason.into(),
    }
}

fn decode_timestamp(id: i64, field: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    match raw {
        None => Ok(None),
        Some(s) => parse_timestamp(s)
            .map(Some)
            .ok_or_else(|| corrupt(id, format!("invalid {} '{}'", field, s))),
    }
}

impl TryFrom<JobRow> for Job {
    type Error = DatabaseError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let job_type: JobType = row.job_type.parse().map_err(|e: String| corrupt(id, e))?;
        let status: JobStatus = row.status.parse().map_err(|e: String| corrupt(id, e))?;
        let params = JobParams::from_json(job_type, row.params.as_deref())
            .map_err(|e| corrupt(id, format!("invalid params: {}", e)))?;
        let created_at = decode_timestamp(id, "created_at", Some(&row.created_at))?
            .ok_or_else(|| corrupt(id, "missing created_at"))?;
        let result = match row.result.as_deref() {
            Some(raw) => Some(
                serde_json::from_str(raw).map_err(|e| corrupt(id, format!("invalid result: {}", e)))?,
            ),
            None => None,
        };

        Ok(Job {
            id,
            status,
            params,
            created_at,
            started_at: decode_timestamp(id, "started_at", row.started_at.as_deref())?,
            completed_at: decode_timestamp(id, "completed_at", row.completed_at.as_deref())?,
            error_message: row.error_message,
            result,
            file_path: row.file_path,
        })
    }
}
