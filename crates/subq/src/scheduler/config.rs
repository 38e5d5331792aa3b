use std::time::Duration;

use crate::failover::DEFAULT_MAX_ATTEMPTS;
use crate::jobs::JobType;
use crate::settings::schema::MAX_PARALLEL_JOBS_LIMIT;
use crate::settings::Settings;

/// Per-type execution limits in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTimeouts {
    pub extract: u64,
    pub sup_to_srt: u64,
    pub translate: u64,
    pub search_subtitles: u64,
    pub sync_subtitles: u64,
    pub publish_subtitles: u64,
}

impl JobTimeouts {
    /// Limit applied to job types without their own entry.
    pub const DEFAULT_SECS: u64 = 600;

    pub fn for_type(&self, job_type: JobType) -> Duration {
        let secs = match job_type {
            JobType::Extract => self.extract,
            JobType::SupToSrt => self.sup_to_srt,
            JobType::Translate => self.translate,
            JobType::SearchSubtitles => self.search_subtitles,
            JobType::SyncSubtitles => self.sync_subtitles,
            JobType::PublishSubtitles => self.publish_subtitles,
        };
        Duration::from_secs(secs)
    }

    /// Limit for a raw type name, falling back to [`Self::DEFAULT_SECS`].
    pub fn for_name(&self, job_type: &str) -> Duration {
        job_type
            .parse::<JobType>()
            .map(|t| self.for_type(t))
            .unwrap_or(Duration::from_secs(Self::DEFAULT_SECS))
    }
}

impl Default for JobTimeouts {
    fn default() -> Self {
        Self {
            extract: 300,
            sup_to_srt: 600,
            translate: 1800,
            search_subtitles: 600,
            sync_subtitles: 1800,
            publish_subtitles: 600,
        }
    }
}

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Initial concurrency bound; adjustable later through
    /// `Dispatcher::set_max_parallel`.
    pub max_parallel: usize,
    pub poll_interval: Duration,
    pub cleanup_interval: Duration,
    /// Age after which finished jobs are purged.
    pub retention: chrono::Duration,
    pub timeouts: JobTimeouts,
    pub max_translation_attempts: u32,
    /// Re-read `max_parallel_jobs` from the settings store on every tick.
    pub follow_settings: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel: 1,
            poll_interval: Duration::from_secs(2),
            cleanup_interval: Duration::from_secs(60 * 60),
            retention: chrono::Duration::days(7),
            timeouts: JobTimeouts::default(),
            max_translation_attempts: DEFAULT_MAX_ATTEMPTS,
            follow_settings: false,
        }
    }
}

impl SchedulerConfig {
    /// Defaults with the concurrency bound taken from `settings` and kept in
    /// step with later saves.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_parallel: clamp_parallel(settings.max_parallel_jobs),
            follow_settings: true,
            ..Self::default()
        }
    }
}

/// Clamps a concurrency bound to `1..=MAX_PARALLEL_JOBS_LIMIT`.
pub fn clamp_parallel(n: usize) -> usize {
    n.clamp(1, MAX_PARALLEL_JOBS_LIMIT)
}
