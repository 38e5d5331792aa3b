//! Typed facade over the job table.

use chrono::{DateTime, Duration, Utc};

use super::model::{Job, JobParams, JobStatus};
use crate::db::job_repo::{self, JobRow, NewJobRow, StatusUpdate};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};

/// Durable job store. The table is the single source of truth for job
/// state; nothing here caches rows.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

/// A stored row that does not decode into a [`Job`]: an unknown job type,
/// unreadable params or a malformed timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct UndecodableJob {
    pub id: i64,
    /// Raw `job_type` column.
    pub job_type: String,
    /// Parsed `started_at`, when the column holds a valid timestamp.
    pub started_at: Option<DateTime<Utc>>,
    pub reason: String,
}

/// One listing split into decoded jobs and rows that failed to decode.
#[derive(Debug, Default)]
pub struct JobScan {
    pub jobs: Vec<Job>,
    pub undecodable: Vec<UndecodableJob>,
}

fn decode_each(rows: Vec<JobRow>) -> JobScan {
    let mut scan = JobScan::default();
    for row in rows {
        let id = row.id;
        let job_type = row.job_type.clone();
        let started_at = row.started_at.as_deref().and_then(parse_timestamp);
        match Job::try_from(row) {
            Ok(job) => scan.jobs.push(job),
            Err(e) => {
                let reason = match e {
                    DatabaseError::CorruptRow { reason, .. } => reason,
                    other => other.to_string(),
                };
                scan.undecodable.push(UndecodableJob {
                    id,
                    job_type,
                    started_at,
                    reason,
                });
            }
        }
    }
    scan
}

fn decode_all(rows: Vec<JobRow>) -> Vec<Job> {
    let scan = decode_each(rows);
    for bad in &scan.undecodable {
        log::warn!("Skipping undecodable job {}: {}", bad.id, bad.reason);
    }
    scan.jobs
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    /// Enqueues a job as `pending` and returns its id.
    pub fn create(&self, file_path: &str, params: &JobParams) -> Result<i64, DatabaseError> {
        self.create_at(file_path, params, Utc::now())
    }

    pub fn create_at(
        &self,
        file_path: &str,
        params: &JobParams,
        now: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let params_json = params.to_json()?;
        let created_at = format_timestamp(now);
        let id = job_repo::insert(
            &self.db,
            &NewJobRow {
                job_type: params.job_type().as_str(),
                file_path,
                params: Some(&params_json),
                created_at: &created_at,
            },
        )?;
        log::info!("Enqueued {} job {} for {}", params.job_type(), id, file_path);
        Ok(id)
    }

    pub fn get(&self, id: i64) -> Result<Option<Job>, DatabaseError> {
        job_repo::find_by_id(&self.db, id)?
            .map(Job::try_from)
            .transpose()
    }

    /// Oldest pending jobs first. Rows that do not decode are logged and
    /// skipped; [`scan_pending`](Self::scan_pending) returns them too.
    pub fn list_pending(&self, limit: usize) -> Result<Vec<Job>, DatabaseError> {
        Ok(decode_all(job_repo::list_pending(&self.db, limit as u64)?))
    }

    /// Running jobs ordered by `started_at`.
    pub fn list_running(&self) -> Result<Vec<Job>, DatabaseError> {
        Ok(decode_all(job_repo::list_running(&self.db)?))
    }

    pub fn scan_pending(&self, limit: usize) -> Result<JobScan, DatabaseError> {
        Ok(decode_each(job_repo::list_pending(&self.db, limit as u64)?))
    }

    pub fn scan_running(&self) -> Result<JobScan, DatabaseError> {
        Ok(decode_each(job_repo::list_running(&self.db)?))
    }

    /// Failed or timed-out jobs completed within `window`, newest first.
    pub fn list_recently_failed(&self, window: Duration) -> Result<Vec<Job>, DatabaseError> {
        self.list_recently_failed_at(window, Utc::now())
    }

    pub fn list_recently_failed_at(
        &self,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, DatabaseError> {
        let cutoff = format_timestamp(now - window);
        Ok(decode_all(job_repo::list_failed_since(&self.db, &cutoff)?))
    }

    /// All jobs, newest first.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<Job>, DatabaseError> {
        Ok(decode_all(job_repo::list_recent(&self.db, limit as u64)?))
    }

    pub fn count_by_status(&self, status: JobStatus) -> Result<u64, DatabaseError> {
        job_repo::count_by_status(&self.db, status.as_str())
    }

    /// Moves a job to `status`.
    ///
    /// `started_at` is stamped on the move to `running`, `completed_at` on
    /// the move to any terminal status. The write only applies when the
    /// persisted status is the required predecessor (`pending` for running,
    /// `running` for terminal statuses), so terminal states are final and a
    /// late completion cannot overwrite a timeout. Returns whether the row
    /// changed.
    pub fn update_status(
        &self,
        id: i64,
        status: JobStatus,
        error_message: Option<&str>,
        result: Option<&serde_json::Value>,
    ) -> Result<bool, DatabaseError> {
        self.update_status_at(id, status, error_message, result, Utc::now())
    }

    pub fn update_status_at(
        &self,
        id: i64,
        status: JobStatus,
        error_message: Option<&str>,
        result: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let Some(expected) = status.required_predecessor() else {
            log::warn!("Refusing to move job {} back to {}", id, status);
            return Ok(false);
        };

        let stamp = format_timestamp(now);
        let result_json = result.map(serde_json::to_string).transpose()?;
        let update = StatusUpdate {
            status: status.as_str(),
            expected_status: expected.as_str(),
            started_at: (status == JobStatus::Running).then_some(stamp.as_str()),
            completed_at: status.is_terminal().then_some(stamp.as_str()),
            error_message,
            result: result_json.as_deref(),
        };

        let applied = job_repo::update_status(&self.db, id, &update)?;
        if !applied {
            log::debug!(
                "Job {} not moved to {}: persisted status is not {}",
                id,
                status,
                expected
            );
        }
        Ok(applied)
    }

    /// Fails a job that can never run, whether it is still pending or
    /// already running. Pending rows pass through `running` so the guarded
    /// transitions hold. Returns whether the job ended up `failed`.
    pub fn reject_at(
        &self,
        id: i64,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        self.update_status_at(id, JobStatus::Running, None, None, now)?;
        self.update_status_at(id, JobStatus::Failed, Some(message), None, now)
    }

    /// Deletes a job only while it is pending.
    pub fn delete(&self, id: i64) -> Result<bool, DatabaseError> {
        let deleted = job_repo::delete_pending(&self.db, id)?;
        if deleted {
            log::info!("Deleted pending job {}", id);
        }
        Ok(deleted)
    }

    /// Removes terminal jobs completed more than `retention` ago.
    pub fn cleanup(&self, retention: Duration) -> Result<usize, DatabaseError> {
        self.cleanup_at(retention, Utc::now())
    }

    pub fn cleanup_at(&self, retention: Duration, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let cutoff = format_timestamp(now - retention);
        let deleted = job_repo::delete_terminal_before(&self.db, &cutoff)?;
        if deleted > 0 {
            log::info!("Cleaned up {} finished jobs older than {}", deleted, cutoff);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::{JobType, TranslateParams};
    use chrono::TimeZone;
    use serde_json::json;

    fn store() -> JobStore {
        JobStore::new(Database::open_in_memory().unwrap())
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn translate(lang: &str) -> JobParams {
        JobParams::Translate(TranslateParams {
            base_dir: Some("/media".into()),
            target_lang: Some(lang.to_string()),
        })
    }

    #[test]
    fn test_create_and_get() {
        let store = store();
        let id = store.create_at("a/b.srt", &translate("de"), t0()).unwrap();

        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.job_type(), JobType::Translate);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.created_at, t0());
        assert_eq!(job.params, translate("de"));
        assert!(store.get(id + 1).unwrap().is_none());
    }

    #[test]
    fn test_ids_increase() {
        let store = store();
        let a = store.create("a.srt", &translate("de")).unwrap();
        let b = store.create("b.srt", &translate("de")).unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_lifecycle_stamps_timestamps_once() {
        let store = store();
        let id = store.create_at("a.srt", &translate("de"), t0()).unwrap();

        let started = t0() + Duration::seconds(5);
        assert!(store
            .update_status_at(id, JobStatus::Running, None, None, started)
            .unwrap());
        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.started_at, Some(started));
        assert!(job.completed_at.is_none());

        let done = started + Duration::seconds(30);
        let result = json!({"output_file": "a.de.srt"});
        assert!(store
            .update_status_at(id, JobStatus::Completed, None, Some(&result), done)
            .unwrap());
        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.started_at, Some(started));
        assert_eq!(job.completed_at, Some(done));
        assert_eq!(job.result, Some(result));
    }

    #[test]
    fn test_pending_cannot_skip_running() {
        let store = store();
        let id = store.create("a.srt", &translate("de")).unwrap();

        assert!(!store
            .update_status(id, JobStatus::Completed, None, None)
            .unwrap());
        assert_eq!(store.get(id).unwrap().unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_timeout_is_not_overwritten_by_late_completion() {
        let store = store();
        let id = store.create("a.srt", &translate("de")).unwrap();
        store.update_status(id, JobStatus::Running, None, None).unwrap();
        assert!(store
            .update_status(id, JobStatus::Timeout, Some("Job timed out after 1800 seconds"), None)
            .unwrap());

        assert!(!store
            .update_status(id, JobStatus::Completed, None, Some(&json!({})))
            .unwrap());
        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Timeout);
        assert!(job.result.is_none());
    }

    #[test]
    fn test_nothing_moves_back_to_pending() {
        let store = store();
        let id = store.create("a.srt", &translate("de")).unwrap();
        assert!(!store.update_status(id, JobStatus::Pending, None, None).unwrap());
    }

    #[test]
    fn test_delete_only_pending() {
        let store = store();
        let pending = store.create("a.srt", &translate("de")).unwrap();
        let running = store.create("b.srt", &translate("de")).unwrap();
        store
            .update_status(running, JobStatus::Running, None, None)
            .unwrap();

        assert!(store.delete(pending).unwrap());
        assert!(store.get(pending).unwrap().is_none());
        assert!(!store.delete(pending).unwrap());

        assert!(!store.delete(running).unwrap());
        assert_eq!(store.get(running).unwrap().unwrap().status, JobStatus::Running);
    }

    #[test]
    fn test_cleanup_respects_retention() {
        let store = store();
        let now = t0();
        let old = store.create_at("old.srt", &translate("de"), now).unwrap();
        let recent = store.create_at("new.srt", &translate("de"), now).unwrap();

        for (id, age) in [(old, 10), (recent, 3)] {
            let done = now - Duration::days(age);
            store
                .update_status_at(id, JobStatus::Running, None, None, done - Duration::minutes(1))
                .unwrap();
            store
                .update_status_at(id, JobStatus::Completed, None, Some(&json!({})), done)
                .unwrap();
        }

        assert_eq!(store.cleanup_at(Duration::days(7), now).unwrap(), 1);
        assert!(store.get(old).unwrap().is_none());
        assert!(store.get(recent).unwrap().is_some());
    }

    #[test]
    fn test_list_recently_failed_window() {
        let store = store();
        let now = t0();
        let ids: Vec<i64> = (0..3)
            .map(|i| store.create_at(&format!("{}.srt", i), &translate("de"), now).unwrap())
            .collect();

        let finish = |id: i64, status: JobStatus, hours: i64| {
            let at = now - Duration::hours(hours);
            store
                .update_status_at(id, JobStatus::Running, None, None, at)
                .unwrap();
            store
                .update_status_at(id, status, Some("boom"), None, at)
                .unwrap();
        };
        finish(ids[0], JobStatus::Failed, 2);
        finish(ids[1], JobStatus::Timeout, 1);
        finish(ids[2], JobStatus::Failed, 48);

        let failed = store
            .list_recently_failed_at(Duration::hours(24), now)
            .unwrap();
        let got: Vec<i64> = failed.iter().map(|j| j.id).collect();
        assert_eq!(got, vec![ids[1], ids[0]]);
    }

    fn insert_raw(store: &JobStore, job_type: &str, params: Option<&str>) -> i64 {
        job_repo::insert(
            store.db(),
            &NewJobRow {
                job_type,
                file_path: "raw.srt",
                params,
                created_at: &format_timestamp(t0()),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_undecodable_rows_do_not_hide_the_rest() {
        let store = store();
        let bad_type = insert_raw(&store, "transcode", None);
        let bad_params = insert_raw(&store, "translate", Some("{not json"));
        let good = store
            .create_at("good.srt", &translate("de"), t0() + Duration::seconds(1))
            .unwrap();

        let listed: Vec<i64> = store.list_pending(10).unwrap().iter().map(|j| j.id).collect();
        assert_eq!(listed, vec![good]);

        let scan = store.scan_pending(10).unwrap();
        assert_eq!(scan.jobs.len(), 1);
        let bad: Vec<(i64, &str)> = scan
            .undecodable
            .iter()
            .map(|b| (b.id, b.job_type.as_str()))
            .collect();
        assert_eq!(bad, vec![(bad_type, "transcode"), (bad_params, "translate")]);
        assert_eq!(scan.undecodable[0].reason, "Unknown job type: transcode");
        assert!(scan.undecodable[1].reason.starts_with("invalid params"));
    }

    #[test]
    fn test_reject_fails_pending_row() {
        let store = store();
        let id = insert_raw(&store, "transcode", None);

        assert!(store
            .reject_at(id, "Unknown job type: transcode", t0())
            .unwrap());
        let row = job_repo::find_by_id(store.db(), id).unwrap().unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(row.error_message.as_deref(), Some("Unknown job type: transcode"));
        assert!(row.started_at.is_some());
        assert!(row.completed_at.is_some());

        // Terminal rows stay put.
        assert!(!store.reject_at(id, "again", t0()).unwrap());
    }

    #[test]
    fn test_count_by_status() {
        let store = store();
        for i in 0..3 {
            store
                .create(&format!("{}.srt", i), &translate("de"))
                .unwrap();
        }
        assert_eq!(store.count_by_status(JobStatus::Pending).unwrap(), 3);
        assert_eq!(store.count_by_status(JobStatus::Running).unwrap(), 0);
    }
}
