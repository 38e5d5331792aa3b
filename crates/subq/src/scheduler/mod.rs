//! Dispatcher loop: timeout sweep, FIFO admission and periodic cleanup.
//!
//! One control thread drives [`Dispatcher::tick_at`] from a current-thread
//! tokio runtime, waking on a fixed interval or when a job is enqueued or
//! finishes. Every admitted job runs on its own thread; the concurrency
//! bound is enforced at admission against the store's `running` count.
//!
//! Timed out jobs have their cancellation token fired, so subprocess-backed
//! tools kill their child instead of running on unobserved.

mod config;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

pub use config::{clamp_parallel, JobTimeouts, SchedulerConfig};

use crate::db::DatabaseError;
use crate::error::SchedulerError;
use crate::executor::JobExecutor;
use crate::jobs::{CancellationToken, Job, JobParams, JobStatus, JobStore};

/// What one pass of the loop did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub timed_out: Vec<i64>,
    pub admitted: Vec<i64>,
    /// Undecodable jobs moved to `failed`.
    pub rejected: Vec<i64>,
    /// Jobs removed by cleanup, when cleanup ran on this tick.
    pub cleaned: Option<usize>,
}

struct Shared {
    store: JobStore,
    executor: JobExecutor,
    config: SchedulerConfig,
    max_parallel: AtomicUsize,
    shutdown: AtomicBool,
    wake_tx: broadcast::Sender<()>,
    in_flight: Mutex<HashMap<i64, CancellationToken>>,
    units: Mutex<Vec<JoinHandle<()>>>,
    last_cleanup: Mutex<Option<DateTime<Utc>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Long-lived job dispatcher. Construct once per process, [`start`] it,
/// and [`stop`] it at shutdown.
///
/// [`start`]: Dispatcher::start
/// [`stop`]: Dispatcher::stop
pub struct Dispatcher {
    shared: Arc<Shared>,
    control: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(store: JobStore, executor: JobExecutor, config: SchedulerConfig) -> Self {
        let (wake_tx, _) = broadcast::channel(16);
        let executor = executor.with_max_translation_attempts(config.max_translation_attempts);
        Self {
            shared: Arc::new(Shared {
                store,
                executor,
                max_parallel: AtomicUsize::new(clamp_parallel(config.max_parallel)),
                config,
                shutdown: AtomicBool::new(false),
                wake_tx,
                in_flight: Mutex::new(HashMap::new()),
                units: Mutex::new(Vec::new()),
                last_cleanup: Mutex::new(None),
            }),
            control: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.shared.store
    }

    pub fn max_parallel(&self) -> usize {
        self.shared.max_parallel.load(Ordering::Acquire)
    }

    /// Changes the concurrency bound; the next tick admits against it.
    pub fn set_max_parallel(&self, n: usize) {
        if self.shared.set_max_parallel(n) {
            self.wake();
        }
    }

    /// Stores a new pending job and wakes the loop.
    pub fn enqueue(&self, file_path: &str, params: &JobParams) -> Result<i64, DatabaseError> {
        let id = self.shared.store.create(file_path, params)?;
        self.wake();
        Ok(id)
    }

    /// Removes a job if it is still pending.
    pub fn delete(&self, id: i64) -> Result<bool, DatabaseError> {
        self.shared.store.delete(id)
    }

    /// Asks the loop to run a tick now.
    pub fn wake(&self) {
        // No receiver simply means the loop is not running.
        let _ = self.shared.wake_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        lock(&self.control).is_some()
    }

    /// Number of execution units that have not finished yet.
    pub fn in_flight(&self) -> usize {
        lock(&self.shared.in_flight).len()
    }

    /// Starts the control loop on a background thread.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut control = lock(&self.control);
        if control.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(SchedulerError::Runtime)?;

        self.shared.shutdown.store(false, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let mut wake_rx = self.shared.wake_tx.subscribe();

        let handle = std::thread::Builder::new()
            .name("subq-dispatcher".to_string())
            .spawn(move || {
                rt.block_on(async {
                    let mut timer = tokio::time::interval(shared.config.poll_interval);
                    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

                    loop {
                        tokio::select! {
                            _ = timer.tick() => {},
                            _ = wake_rx.recv() => {},
                        }

                        if shared.shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        shared.tick(Utc::now());
                    }
                });
                log::debug!("Dispatcher loop exited");
            })
            .map_err(|source| SchedulerError::Spawn {
                name: "subq-dispatcher".to_string(),
                source,
            })?;

        *control = Some(handle);
        log::info!(
            "Dispatcher started (max parallel {}, poll every {:?})",
            self.max_parallel(),
            self.shared.config.poll_interval
        );
        Ok(())
    }

    /// Stops the control loop and joins it. In-flight jobs are cancelled
    /// and joined as well.
    pub fn stop(&self) {
        let handle = lock(&self.control).take();
        let Some(handle) = handle else {
            return;
        };

        self.shared.shutdown.store(true, Ordering::Release);
        self.wake();
        if handle.join().is_err() {
            log::error!("Dispatcher thread panicked");
        }

        let tokens: Vec<CancellationToken> = lock(&self.shared.in_flight).values().cloned().collect();
        if !tokens.is_empty() {
            log::info!("Cancelling {} in-flight jobs", tokens.len());
            for token in &tokens {
                token.cancel();
            }
        }

        let units: Vec<JoinHandle<()>> = lock(&self.shared.units).drain(..).collect();
        for unit in units {
            if unit.join().is_err() {
                log::error!("Execution unit panicked outside the job boundary");
            }
        }
        log::info!("Dispatcher stopped");
    }

    /// Runs one pass of the loop against the clock value `now`.
    pub fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        self.shared.tick(now)
    }

    /// Blocks until no execution unit is in flight or `timeout` elapses.
    /// Returns whether the dispatcher went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.in_flight() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    /// Returns whether the bound changed.
    fn set_max_parallel(&self, n: usize) -> bool {
        let n = clamp_parallel(n);
        let previous = self.max_parallel.swap(n, Ordering::AcqRel);
        if previous != n {
            log::info!("Max parallel jobs changed from {} to {}", previous, n);
        }
        previous != n
    }

    fn refresh_from_settings(&self) {
        match self.executor.settings().load() {
            Ok(settings) => {
                self.set_max_parallel(settings.max_parallel_jobs);
            }
            Err(e) => log::warn!("Keeping max parallel jobs; settings unreadable: {}", e),
        }
    }

    fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        if self.config.follow_settings {
            self.refresh_from_settings();
        }

        let running = match self.store.scan_running() {
            Ok(scan) => scan,
            Err(e) => {
                log::error!("Failed to list running jobs: {}", e);
                return report;
            }
        };

        let mut still_running = running.jobs.len();
        for job in &running.jobs {
            let limit = self.config.timeouts.for_type(job.job_type());
            if self.sweep_timeout(job.id, job.job_type().as_str(), job.started_at, limit, now) {
                report.timed_out.push(job.id);
                still_running -= 1;
            }
        }
        for bad in &running.undecodable {
            if bad.started_at.is_none() {
                if self.reject(bad.id, &bad.job_type, &bad.reason, now) {
                    report.rejected.push(bad.id);
                    continue;
                }
            } else {
                let limit = self.config.timeouts.for_name(&bad.job_type);
                if self.sweep_timeout(bad.id, &bad.job_type, bad.started_at, limit, now) {
                    report.timed_out.push(bad.id);
                    continue;
                }
            }
            still_running += 1;
        }

        let max = self.max_parallel.load(Ordering::Acquire);
        let slots = max.saturating_sub(still_running);
        if slots > 0 {
            self.admit(slots, now, &mut report);
        }

        report.cleaned = self.maybe_cleanup(now);
        lock(&self.units).retain(|h| !h.is_finished());

        if !report.timed_out.is_empty()
            || !report.admitted.is_empty()
            || !report.rejected.is_empty()
        {
            log::debug!(
                "Tick: {} timed out, {} rejected, {} admitted, {} running before admission",
                report.timed_out.len(),
                report.rejected.len(),
                report.admitted.len(),
                still_running
            );
        }
        report
    }

    /// Returns `true` when the job was moved to `timeout`.
    fn sweep_timeout(
        &self,
        id: i64,
        job_type: &str,
        started_at: Option<DateTime<Utc>>,
        limit: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(started_at) = started_at else {
            return false;
        };
        let elapsed = (now - started_at).to_std().unwrap_or_default();
        if elapsed <= limit {
            return false;
        }

        let message = format!("Job timed out after {} seconds", limit.as_secs());
        match self
            .store
            .update_status_at(id, JobStatus::Timeout, Some(&message), None, now)
        {
            Ok(true) => {
                log::warn!(
                    "Job {} ({}) exceeded its {}s limit",
                    id,
                    job_type,
                    limit.as_secs()
                );
                if let Some(token) = lock(&self.in_flight).get(&id) {
                    token.cancel();
                }
                true
            }
            Ok(false) => false,
            Err(e) => {
                log::error!("Failed to mark job {} as timed out: {}", id, e);
                false
            }
        }
    }

    /// Fails a job whose row cannot be decoded. Returns `true` when the
    /// job was moved to `failed`.
    fn reject(&self, id: i64, job_type: &str, reason: &str, now: DateTime<Utc>) -> bool {
        match self.store.reject_at(id, reason, now) {
            Ok(applied) => {
                if applied {
                    log::error!("Job {} ({}) cannot run: {}", id, job_type, reason);
                }
                applied
            }
            Err(e) => {
                log::error!("Failed to reject job {}: {}", id, e);
                false
            }
        }
    }

    fn admit(self: &Arc<Self>, slots: usize, now: DateTime<Utc>, report: &mut TickReport) {
        loop {
            let wanted = slots - report.admitted.len();
            let scan = match self.store.scan_pending(wanted) {
                Ok(scan) => scan,
                Err(e) => {
                    log::error!("Failed to list pending jobs: {}", e);
                    return;
                }
            };

            let mut rejected_any = false;
            for bad in &scan.undecodable {
                if self.reject(bad.id, &bad.job_type, &bad.reason, now) {
                    report.rejected.push(bad.id);
                    rejected_any = true;
                }
            }

            for mut job in scan.jobs {
                match self
                    .store
                    .update_status_at(job.id, JobStatus::Running, None, None, now)
                {
                    Ok(true) => {}
                    // Deleted or picked up elsewhere since the listing.
                    Ok(false) => continue,
                    Err(e) => {
                        log::error!("Failed to admit job {}: {}", job.id, e);
                        continue;
                    }
                }
                job.status = JobStatus::Running;
                job.started_at = Some(now);

                log::info!("Starting {} job {}", job.job_type(), job.id);
                let id = job.id;
                self.spawn_unit(job, now);
                report.admitted.push(id);
            }

            // Rejected rows took listing room; look again behind them.
            if !rejected_any || report.admitted.len() >= slots {
                return;
            }
        }
    }

    fn spawn_unit(self: &Arc<Self>, job: Job, now: DateTime<Utc>) {
        let id = job.id;
        let token = CancellationToken::new();
        lock(&self.in_flight).insert(id, token.clone());

        let shared = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("subq-job-{}", id))
            .spawn(move || {
                shared.executor.execute(&job, &token);
                lock(&shared.in_flight).remove(&job.id);
                let _ = shared.wake_tx.send(());
            });

        match spawned {
            Ok(handle) => lock(&self.units).push(handle),
            Err(e) => {
                lock(&self.in_flight).remove(&id);
                log::error!("Failed to spawn execution unit for job {}: {}", id, e);
                let message = format!("Failed to start job: {}", e);
                if let Err(e) =
                    self.store
                        .update_status_at(id, JobStatus::Failed, Some(&message), None, now)
                {
                    log::error!("Failed to record spawn failure for job {}: {}", id, e);
                }
            }
        }
    }

    fn maybe_cleanup(&self, now: DateTime<Utc>) -> Option<usize> {
        let mut last = lock(&self.last_cleanup);
        let due = match *last {
            None => true,
            Some(previous) => (now - previous)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= self.config.cleanup_interval),
        };
        if !due {
            return None;
        }
        *last = Some(now);
        drop(last);

        match self.store.cleanup_at(self.config.retention, now) {
            Ok(removed) => Some(removed),
            Err(e) => {
                log::error!("Job cleanup failed: {}", e);
                None
            }
        }
    }
}
