#![cfg(unix)]

use scorepipe::engine::{AdmissionPolicy, SupervisorOpts, WaitStrategy, read_manifest, run_pool};
use scorepipe::{Job, JobStatus, PipelineError};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

fn opts(pool: usize, max_retry: u32, results: &Path) -> SupervisorOpts {
    SupervisorOpts {
        pool_size: Some(pool),
        max_retry_count: max_retry,
        tick: Duration::from_millis(5),
        results_dir: Some(results.to_path_buf()),
        ..SupervisorOpts::default()
    }
}

/// Jobs whose second payload slot is a per-job counter file.
fn counted_jobs(dir: &Path, n: usize) -> Vec<Job> {
    (0..n)
        .map(|i| {
            let input = dir.join(format!("in_{i}.mid"));
            let counter = dir.join(format!("count_{i}"));
            Job::with_payload(
                &input,
                dir.join(format!("out_{i}.abc")),
                vec![
                    input.to_string_lossy().into_owned(),
                    counter.to_string_lossy().into_owned(),
                ],
            )
        })
        .collect()
}

fn invocations(dir: &Path, i: usize) -> usize {
    fs::read_to_string(dir.join(format!("count_{i}")))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[test]
fn test_succeeding_jobs_have_no_retries() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = counted_jobs(dir.path(), 4);
    let report = run_pool("ok", "echo x >> {1}", &jobs, &opts(2, 3, dir.path())).unwrap();

    assert_eq!(report.succeeded, 4);
    assert!(report.failed.is_empty());
    for (i, record) in report.records.iter().enumerate() {
        assert_eq!(record.status, JobStatus::Succeeded);
        assert_eq!(record.attempt_count, 0);
        assert_eq!(invocations(dir.path(), i), 1);
    }
    let manifest = report.manifest_path.unwrap();
    assert!(read_manifest(&manifest).unwrap().is_empty());
}

#[test]
fn test_always_failing_jobs_exhaust_budget_once() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = counted_jobs(dir.path(), 3);
    let report = run_pool(
        "fail",
        "echo x >> {1}; exit 1",
        &jobs,
        &opts(2, 2, dir.path()),
    )
    .unwrap();

    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed.len(), 3);
    for i in 0..3 {
        assert_eq!(invocations(dir.path(), i), 3);
        assert_eq!(report.records[i].status, JobStatus::FailedTerminal);
        assert_eq!(report.records[i].invocations(), 3);
    }
    let manifest = read_manifest(&dir.path().join("failed_jobs_fail.json")).unwrap();
    assert_eq!(manifest.len(), 3);
    let mut inputs: Vec<_> = manifest.iter().map(|f| f.input.clone()).collect();
    inputs.sort();
    inputs.dedup();
    assert_eq!(inputs.len(), 3);
}

#[test]
fn test_fail_once_jobs_recover_within_budget() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = counted_jobs(dir.path(), 5);
    let template = "if [ -e {1} ]; then exit 0; else touch {1}; exit 1; fi";
    let report = run_pool("flaky", template, &jobs, &opts(2, 1, dir.path())).unwrap();

    assert_eq!(report.succeeded, 5);
    assert!(report.failed.is_empty());
    assert!(report.peak_running <= 2);
    assert!(report.records.iter().all(|r| r.attempt_count == 1));
    assert!(read_manifest(&report.manifest_path.unwrap()).unwrap().is_empty());
}

#[test]
fn test_pool_bound_is_respected() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = counted_jobs(dir.path(), 8);
    let report = run_pool("bound", "sleep 0.05", &jobs, &opts(3, 0, dir.path())).unwrap();
    assert_eq!(report.succeeded, 8);
    assert!(report.peak_running <= 3);
    assert!(report.peak_running >= 1);
}

#[test]
fn test_fifo_and_poll_reach_same_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = counted_jobs(dir.path(), 4);
    let template = "if [ -e {1} ]; then exit 0; else touch {1}; exit 1; fi";
    let o = SupervisorOpts {
        admission: AdmissionPolicy::Fifo,
        wait: WaitStrategy::Poll,
        tick: Duration::ZERO,
        ..opts(2, 1, dir.path())
    };
    let report = run_pool("fifo", template, &jobs, &o).unwrap();
    assert_eq!(report.succeeded, 4);
    assert!(report.peak_running <= 2);
}

#[test]
fn test_stdout_written_to_payload_file_and_captured() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("song.abc");
    let jobs = vec![Job::new(dir.path().join("song.mid"), &out)];
    let o = SupervisorOpts {
        capture_stdout: true,
        stdout_to_payload: Some(1),
        ..opts(1, 0, dir.path())
    };
    let report = run_pool("stdout", "echo X:1", &jobs, &o).unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(fs::read_to_string(&out).unwrap(), "X:1\n");
    assert_eq!(report.output(0).unwrap().stdout, b"X:1\n");
}

#[test]
fn test_short_payload_is_rejected_before_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let jobs = vec![Job::with_payload("a", "b", vec!["a".into()])];
    let template = format!("touch {} {{}} {{}}", marker.display());
    let err = run_pool("short", &template, &jobs, &opts(1, 0, dir.path())).unwrap_err();
    assert!(matches!(err, PipelineError::Configuration { .. }));
    assert!(!marker.exists());
    assert!(!dir.path().join("failed_jobs_short.json").exists());
}

#[test]
fn test_zero_pool_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = counted_jobs(dir.path(), 1);
    let err = run_pool("zero", "true", &jobs, &opts(0, 0, dir.path())).unwrap_err();
    assert!(matches!(err, PipelineError::Configuration { .. }));
}

#[test]
fn test_empty_job_list_writes_empty_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let report = run_pool("empty", "true", &[], &opts(2, 0, dir.path())).unwrap();
    assert_eq!(report.submitted, 0);
    assert!(read_manifest(&report.manifest_path.unwrap()).unwrap().is_empty());
}

/// Jobs whose first payload slot is the whole command line.
fn scripted_jobs(dir: &Path, commands: &[&str]) -> Vec<Job> {
    commands
        .iter()
        .enumerate()
        .map(|(i, cmd)| {
            Job::with_payload(
                dir.join(format!("in_{i}")),
                dir.join(format!("out_{i}")),
                vec![cmd.to_string()],
            )
        })
        .collect()
}

#[test]
fn test_open_pipe_does_not_stall_other_slots() {
    let dir = tempfile::tempdir().unwrap();
    // Job 0 exits at once but leaves a background sleeper holding its stdout pipe.
    let jobs = scripted_jobs(
        dir.path(),
        &["sleep 2 & exit 0", "sleep 0.5", "sleep 0.5", "sleep 0.5", "sleep 0.5"],
    );
    let timed = |wait: WaitStrategy| {
        let o = SupervisorOpts {
            capture_stdout: true,
            wait,
            ..opts(2, 0, dir.path())
        };
        let start = Instant::now();
        let report = run_pool("drain", "{0}", &jobs, &o).unwrap();
        assert_eq!(report.succeeded, 5);
        start.elapsed()
    };
    let events = timed(WaitStrategy::Events);
    let poll = timed(WaitStrategy::Poll);
    assert!(poll < Duration::from_millis(2700), "poll took {poll:?}");
    assert!(poll < events + Duration::from_millis(500), "poll {poll:?}, events {events:?}");
}

fn start_order(dir: &Path, admission: AdmissionPolicy) -> Vec<String> {
    let order = dir.join(format!("order_{admission:?}"));
    let jobs: Vec<Job> = (0..3)
        .map(|i| {
            let marker = dir.join(format!("failed_once_{admission:?}_{i}"));
            Job::with_payload(
                dir.join(format!("in_{i}")),
                dir.join(format!("out_{i}")),
                vec![i.to_string(), marker.to_string_lossy().into_owned()],
            )
        })
        .collect();
    // Job 0 fails on its first run only.
    let template = format!(
        "echo {{0}} >> {}; if [ {{0}} = 0 ] && [ ! -e {{1}} ]; then touch {{1}}; exit 1; fi",
        order.display()
    );
    let o = SupervisorOpts {
        admission,
        ..opts(1, 1, dir)
    };
    let report = run_pool("order", &template, &jobs, &o).unwrap();
    assert_eq!(report.succeeded, 3);
    fs::read_to_string(&order)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_retry_first_runs_retries_before_unstarted_jobs() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(
        start_order(dir.path(), AdmissionPolicy::RetryFirst),
        vec!["0", "0", "1", "2"]
    );
}

#[test]
fn test_fifo_sends_retries_to_the_back() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(
        start_order(dir.path(), AdmissionPolicy::Fifo),
        vec!["0", "1", "2", "0"]
    );
}
