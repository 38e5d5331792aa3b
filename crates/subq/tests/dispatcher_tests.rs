//! Admission, timeouts, cleanup and deletion through the dispatcher.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{fast_config, FakeAligner, GatedPublisher, TestHarness};
use subq::db::job_repo::{self, NewJobRow};
use subq::db::format_timestamp;
use subq::jobs::{PublishSubtitlesParams, SyncSubtitlesParams};
use subq::{JobParams, JobStatus, SchedulerConfig, Toolbox};

const WAIT: Duration = Duration::from_secs(10);

fn publish() -> JobParams {
    JobParams::PublishSubtitles(PublishSubtitlesParams::default())
}

fn sync() -> JobParams {
    JobParams::SyncSubtitles(SyncSubtitlesParams::default())
}

fn manual(max_parallel: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_parallel,
        ..SchedulerConfig::default()
    }
}

#[test]
fn test_admission_is_fifo() {
    let harness = TestHarness::new();
    let publisher = Arc::new(GatedPublisher::closed());
    let dispatcher = harness.dispatcher(
        Toolbox::unavailable().with_publisher(publisher.clone()),
        manual(1),
    );

    let t0 = Utc::now() - chrono::Duration::minutes(5);
    let mut ids = Vec::new();
    // Created out of name order so FIFO is by created_at, not by path or id.
    for (offset, name) in [(2, "c.srt"), (0, "a.srt"), (1, "b.srt")] {
        harness.write_file(name, "x");
        ids.push((
            offset,
            harness
                .store
                .create_at(name, &publish(), t0 + chrono::Duration::seconds(offset))
                .unwrap(),
        ));
    }
    ids.sort();
    let ordered: Vec<i64> = ids.into_iter().map(|(_, id)| id).collect();

    let first = dispatcher.tick_at(Utc::now());
    assert_eq!(first.admitted, vec![ordered[0]]);

    // Slot is taken until the running job finishes.
    assert!(dispatcher.tick_at(Utc::now()).admitted.is_empty());

    publisher.release();
    assert!(dispatcher.wait_idle(WAIT));
    assert_eq!(dispatcher.tick_at(Utc::now()).admitted, vec![ordered[1]]);
    assert!(dispatcher.wait_idle(WAIT));
    assert_eq!(dispatcher.tick_at(Utc::now()).admitted, vec![ordered[2]]);
    assert!(dispatcher.wait_idle(WAIT));

    assert_eq!(publisher.order(), vec!["a.srt", "b.srt", "c.srt"]);
    for id in ordered {
        assert_eq!(harness.job(id).status, JobStatus::Completed);
    }
}

#[test]
fn test_running_count_never_exceeds_max_parallel() {
    let harness = TestHarness::new();
    let publisher = Arc::new(GatedPublisher::slow(Duration::from_millis(40)));
    let dispatcher = harness.dispatcher(
        Toolbox::unavailable().with_publisher(publisher.clone()),
        fast_config(2),
    );

    let mut ids = Vec::new();
    for i in 0..6 {
        let name = format!("ep{}.srt", i);
        harness.write_file(&name, "x");
        ids.push(harness.store.create(&name, &publish()).unwrap());
    }

    dispatcher.start().unwrap();
    let mut peak_running = 0;
    for id in &ids {
        loop {
            let running = harness.store.count_by_status(JobStatus::Running).unwrap();
            peak_running = peak_running.max(running);
            if harness.job(*id).status.is_terminal() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
    dispatcher.stop();

    assert!(peak_running <= 2, "saw {} running jobs", peak_running);
    assert!(publisher.peak() <= 2);
    for id in ids {
        assert_eq!(harness.job(id).status, JobStatus::Completed);
    }
}

#[test]
fn test_max_parallel_is_live_tunable() {
    let harness = TestHarness::new();
    let publisher = Arc::new(GatedPublisher::closed());
    let dispatcher = harness.dispatcher(
        Toolbox::unavailable().with_publisher(publisher.clone()),
        manual(1),
    );
    for i in 0..4 {
        let name = format!("s{}.srt", i);
        harness.write_file(&name, "x");
        harness.store.create(&name, &publish()).unwrap();
    }

    assert_eq!(dispatcher.tick_at(Utc::now()).admitted.len(), 1);
    dispatcher.set_max_parallel(3);
    assert_eq!(dispatcher.tick_at(Utc::now()).admitted.len(), 2);
    assert_eq!(
        harness.store.count_by_status(JobStatus::Running).unwrap(),
        3
    );

    publisher.release();
    assert!(dispatcher.wait_idle(WAIT));
}

#[test]
fn test_timeout_sweep_cancels_running_job() {
    let harness = TestHarness::new();
    harness.write_file("ep1.srt", "x");
    harness.write_file("ep1.mkv", "");

    let aligner = Arc::new(FakeAligner::blocking());
    let dispatcher = harness.dispatcher(
        Toolbox::unavailable().with_aligner(aligner.clone()),
        manual(1),
    );
    let id = harness.store.create("ep1.srt", &sync()).unwrap();

    let t0 = Utc::now();
    assert_eq!(dispatcher.tick_at(t0).admitted, vec![id]);

    // Within the 30 minute limit nothing happens.
    let early = dispatcher.tick_at(t0 + chrono::Duration::minutes(29));
    assert!(early.timed_out.is_empty());
    assert_eq!(harness.job(id).status, JobStatus::Running);

    let late = dispatcher.tick_at(t0 + chrono::Duration::minutes(31));
    assert_eq!(late.timed_out, vec![id]);
    assert!(dispatcher.wait_idle(WAIT));

    assert!(aligner.saw_cancel.load(Ordering::SeqCst));
    let job = harness.job(id);
    assert_eq!(job.status, JobStatus::Timeout);
    assert_eq!(
        job.error_message.as_deref(),
        Some("Job timed out after 1800 seconds")
    );
    assert!(job.result.is_none());
}

#[test]
fn test_sync_without_matching_video_fails() {
    let harness = TestHarness::new();
    harness.write_file("Show/ep1.srt", "x");
    harness.write_file("Show/readme.txt", "not a video");
    harness.write_file("Show/zzzz qqqq.mp4", "");

    let aligner = Arc::new(FakeAligner::default());
    let dispatcher = harness.dispatcher(
        Toolbox::unavailable().with_aligner(aligner.clone()),
        fast_config(1),
    );
    dispatcher.start().unwrap();
    let id = dispatcher.enqueue("Show/ep1.srt", &sync()).unwrap();
    let job = harness.wait_for_terminal(id, WAIT);
    dispatcher.stop();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error_message.as_deref(),
        Some("No matching video file found for Show/ep1.srt")
    );
    assert_eq!(aligner.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_sync_aligns_against_best_video() {
    let harness = TestHarness::new();
    harness.write_file("Show/Show.S01E02.en.srt", "x");
    harness.write_file("Show/Show.S01E01.mkv", "");
    harness.write_file("Show/Show.S01E02.mkv", "");

    let dispatcher = harness.dispatcher(
        Toolbox::unavailable().with_aligner(Arc::new(FakeAligner::default())),
        manual(1),
    );
    let id = harness
        .store
        .create("Show/Show.S01E02.en.srt", &sync())
        .unwrap();
    dispatcher.tick_at(Utc::now());
    assert!(dispatcher.wait_idle(WAIT));

    let job = harness.job(id);
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
    let result = job.result.unwrap();
    assert_eq!(result["video"], "Show/Show.S01E02.mkv");
    assert_eq!(result["output_file"], "Show/Show.S01E02.en.synced.srt");
    assert!(harness.path("Show/Show.S01E02.en.synced.srt").exists());
}

#[test]
fn test_delete_only_removes_pending_jobs() {
    let harness = TestHarness::new();
    let dispatcher = harness.dispatcher(Toolbox::unavailable(), manual(1));

    let pending = harness.store.create("a.srt", &publish()).unwrap();
    let running = harness.store.create("b.srt", &publish()).unwrap();
    harness
        .store
        .update_status(running, JobStatus::Running, None, None)
        .unwrap();

    assert!(dispatcher.delete(pending).unwrap());
    assert!(harness.store.get(pending).unwrap().is_none());

    assert!(!dispatcher.delete(running).unwrap());
    assert_eq!(harness.job(running).status, JobStatus::Running);

    assert!(!dispatcher.delete(9999).unwrap());
}

#[test]
fn test_first_tick_cleans_up_old_jobs() {
    let harness = TestHarness::new();
    let dispatcher = harness.dispatcher(Toolbox::unavailable(), manual(1));
    let now = Utc::now();

    let finish = |name: &str, days_ago: i64| {
        let at = now - chrono::Duration::days(days_ago);
        let id = harness.store.create_at(name, &publish(), at).unwrap();
        harness
            .store
            .update_status_at(id, JobStatus::Running, None, None, at)
            .unwrap();
        harness
            .store
            .update_status_at(id, JobStatus::Completed, None, None, at)
            .unwrap();
        id
    };
    let old = finish("old.srt", 10);
    let recent = finish("recent.srt", 3);

    let report = dispatcher.tick_at(now);
    assert_eq!(report.cleaned, Some(1));
    assert!(harness.store.get(old).unwrap().is_none());
    assert_eq!(harness.job(recent).status, JobStatus::Completed);
}

#[test]
fn test_loop_restarts_after_stop() {
    let harness = TestHarness::new();
    harness.write_file("a.srt", "x");
    harness.write_file("b.srt", "x");
    let dispatcher = harness.dispatcher(
        Toolbox::unavailable().with_publisher(Arc::new(GatedPublisher::open())),
        fast_config(1),
    );

    dispatcher.start().unwrap();
    let a = dispatcher.enqueue("a.srt", &publish()).unwrap();
    assert_eq!(harness.wait_for_terminal(a, WAIT).status, JobStatus::Completed);
    dispatcher.stop();
    assert!(!dispatcher.is_running());

    let b = dispatcher.enqueue("b.srt", &publish()).unwrap();
    dispatcher.start().unwrap();
    assert_eq!(harness.wait_for_terminal(b, WAIT).status, JobStatus::Completed);
    dispatcher.stop();
}

fn insert_raw(harness: &TestHarness, job_type: &str, params: Option<&str>) -> i64 {
    job_repo::insert(
        &harness.db,
        &NewJobRow {
            job_type,
            file_path: "old.mkv",
            params,
            created_at: &format_timestamp(Utc::now() - chrono::Duration::minutes(1)),
        },
    )
    .unwrap()
}

#[test]
fn test_undecodable_rows_fail_without_blocking_the_queue() {
    let harness = TestHarness::new();
    harness.write_file("y.srt", "x");
    let dispatcher = harness.dispatcher(
        Toolbox::unavailable().with_publisher(Arc::new(GatedPublisher::open())),
        manual(1),
    );

    let unknown = insert_raw(&harness, "transcode", None);
    let garbled = insert_raw(&harness, "publish_subtitles", Some("[1, 2"));
    let good = dispatcher.enqueue("y.srt", &publish()).unwrap();

    let report = dispatcher.tick_at(Utc::now());
    assert_eq!(report.rejected, vec![unknown, garbled]);
    assert_eq!(report.admitted, vec![good]);
    assert!(dispatcher.wait_idle(WAIT));
    assert_eq!(harness.job(good).status, JobStatus::Completed);

    let unknown_row = job_repo::find_by_id(&harness.db, unknown).unwrap().unwrap();
    assert_eq!(unknown_row.status, "failed");
    assert_eq!(
        unknown_row.error_message.as_deref(),
        Some("Unknown job type: transcode")
    );
    let garbled_row = job_repo::find_by_id(&harness.db, garbled).unwrap().unwrap();
    assert_eq!(garbled_row.status, "failed");

    // Once failed they no longer show up as pending work.
    let next = dispatcher.tick_at(Utc::now());
    assert!(next.rejected.is_empty());
    assert!(next.admitted.is_empty());
}

#[test]
fn test_loop_survives_store_errors() {
    let harness = TestHarness::new();
    harness.write_file("after.srt", "x");
    let dispatcher = harness.dispatcher(
        Toolbox::unavailable().with_publisher(Arc::new(GatedPublisher::open())),
        fast_config(1),
    );

    let rename = |from: &str, to: &str| {
        let sql = format!("ALTER TABLE {} RENAME TO {}", from, to);
        harness
            .db
            .with_conn(|conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .unwrap();
    };

    dispatcher.start().unwrap();
    rename("jobs", "jobs_offline");
    assert!(harness.store.list_pending(10).is_err());
    // Several ticks fail against the missing table.
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(dispatcher.tick_at(Utc::now()), subq::TickReport::default());
    assert!(dispatcher.is_running());

    rename("jobs_offline", "jobs");
    let id = dispatcher.enqueue("after.srt", &publish()).unwrap();
    assert_eq!(harness.wait_for_terminal(id, WAIT).status, JobStatus::Completed);
    dispatcher.stop();
}
