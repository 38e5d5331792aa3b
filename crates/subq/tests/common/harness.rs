//! Isolated environment for driving the executor and dispatcher.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use subq::settings::{MemorySettingsStore, Settings};
use subq::{Database, Dispatcher, Job, JobExecutor, JobStore, SchedulerConfig, Toolbox};

pub struct TestHarness {
    temp_dir: TempDir,
    /// Library root; also `settings.root_dir`.
    pub root: PathBuf,
    pub settings: Arc<MemorySettingsStore>,
    /// Raw handle behind `store`, for writing rows the typed API refuses.
    pub db: Database,
    pub store: JobStore,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    /// Builds the harness, letting the caller adjust the default settings.
    pub fn with_settings(configure: impl FnOnce(&mut Settings)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().to_path_buf();

        let mut settings = Settings {
            root_dir: Some(root.clone()),
            ..Settings::default()
        };
        configure(&mut settings);

        let db = Database::open_in_memory().expect("Failed to open database");
        Self {
            temp_dir,
            root,
            settings: Arc::new(MemorySettingsStore::new(settings)),
            store: JobStore::new(db.clone()),
            db,
        }
    }

    /// Writes a file under the root, creating parent directories.
    pub fn write_file(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    pub fn settings_snapshot(&self) -> Settings {
        self.settings.snapshot().expect("Failed to read settings")
    }

    pub fn executor(&self, tools: Toolbox) -> JobExecutor {
        JobExecutor::new(self.store.clone(), self.settings.clone(), tools)
    }

    pub fn dispatcher(&self, tools: Toolbox, config: SchedulerConfig) -> Dispatcher {
        Dispatcher::new(self.store.clone(), self.executor(tools), config)
    }

    pub fn job(&self, id: i64) -> Job {
        self.store
            .get(id)
            .expect("Failed to load job")
            .expect("Job does not exist")
    }

    /// Polls until the job reaches a terminal status.
    pub fn wait_for_terminal(&self, id: i64, timeout: Duration) -> Job {
        let deadline = Instant::now() + timeout;
        loop {
            let job = self.job(id);
            if job.status.is_terminal() {
                return job;
            }
            assert!(
                Instant::now() < deadline,
                "job {} still {} after {:?}",
                id,
                job.status,
                timeout
            );
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }
}

/// Scheduler config with a short poll interval for loop-driven tests.
pub fn fast_config(max_parallel: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_parallel,
        poll_interval: Duration::from_millis(20),
        ..SchedulerConfig::default()
    }
}
