// tests/process_worker.rs
#![cfg(unix)]

use std::error::Error;
use std::path::Path;

use aslrun::engine::{RunEvent, StudyControl};
use aslrun::exec::command::Invocation;
use aslrun::exec::{worker_log_path, ProcessWorker, WorkerSpec, WorkerState};
use aslrun::types::PipelineModule;
use aslrun_test_utils::{init_tracing, with_timeout};
use tokio::sync::mpsc;

type TestResult = Result<(), Box<dyn Error>>;

fn shell_spec(dir: &Path, script: &str) -> WorkerSpec {
    WorkerSpec {
        study: 0,
        study_dir: dir.to_path_buf(),
        iworker: 1,
        nworkers: 1,
        modules: vec![PipelineModule::Structural],
        invocation: Invocation::new("sh").args(["-c", script]),
    }
}

async fn collect(mut rx: mpsc::Receiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn zero_exit_with_reported_errors_still_finishes() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let script = "echo 'Processing sub-001'; \
                  echo 'ERROR in xASL_module_Structural for sub-001: T1w not found'; \
                  echo '----------------------------------------'; \
                  echo 'done'";
    let (tx, rx) = mpsc::channel(16);
    let control = StudyControl::new();

    let worker = ProcessWorker::new(shell_spec(dir.path(), script), tx, control.subscribe());
    let state = with_timeout(worker.run()).await;
    let events = collect(rx).await;

    assert_eq!(state, WorkerState::Finished);
    assert!(matches!(events.first(), Some(RunEvent::WorkerStarted { iworker: 1, .. })));
    let errors = events.iter().find_map(|e| match e {
        RunEvent::StdoutErrors { errors, .. } => Some(errors.clone()),
        _ => None,
    });
    let errors = errors.ok_or("stdout errors expected")?;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].subject, "sub-001");
    assert_eq!(errors[0].message, "T1w not found");
    assert!(matches!(events.last(), Some(RunEvent::WorkerFinished { study: 0, iworker: 1 })));

    let log = std::fs::read_to_string(worker_log_path(dir.path(), 1))?;
    assert!(log.starts_with("Processing sub-001\n"), "{log}");
    assert!(log.ends_with("done\n"), "{log}");
    Ok(())
}

#[tokio::test]
async fn non_zero_exit_reports_stderr_then_failure() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let (tx, rx) = mpsc::channel(16);
    let control = StudyControl::new();

    let worker = ProcessWorker::new(
        shell_spec(dir.path(), "echo 'license checkout failed' >&2; exit 3"),
        tx,
        control.subscribe(),
    );
    let state = with_timeout(worker.run()).await;
    let events = collect(rx).await;

    assert_eq!(state, WorkerState::Failed);
    let n = events.len();
    assert!(n >= 3, "{events:?}");
    match &events[n - 2] {
        RunEvent::StderrError { stderr, .. } => assert!(stderr.contains("license checkout failed")),
        other => panic!("expected StderrError, got {other:?}"),
    }
    assert!(matches!(events[n - 1], RunEvent::WorkerFailed { code: 3, .. }));
    Ok(())
}

#[tokio::test]
async fn missing_program_fails_without_starting() -> TestResult {
    let dir = tempfile::tempdir()?;
    let (tx, rx) = mpsc::channel(16);
    let control = StudyControl::new();
    let mut spec = shell_spec(dir.path(), "");
    spec.invocation = Invocation::new("/nonexistent/aslrun-launcher");

    let state = with_timeout(ProcessWorker::new(spec, tx, control.subscribe()).run()).await;
    let events = collect(rx).await;

    assert_eq!(state, WorkerState::Failed);
    assert_eq!(events.len(), 2, "{events:?}");
    assert!(matches!(events[0], RunEvent::StderrError { .. }));
    assert!(matches!(events[1], RunEvent::WorkerFailed { code: -1, .. }));
    Ok(())
}

#[tokio::test]
async fn stop_kills_a_running_worker() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let (tx, mut rx) = mpsc::channel(16);
    let control = StudyControl::new();

    let worker = ProcessWorker::new(
        shell_spec(dir.path(), "echo started; sleep 30"),
        tx,
        control.subscribe(),
    );
    let handle = tokio::spawn(worker.run());

    let first = with_timeout(rx.recv()).await;
    assert!(matches!(first, Some(RunEvent::WorkerStarted { .. })));

    // Pausing and resuming must not end the worker.
    control.pause();
    control.resume();
    assert_eq!(control.stop(), 1);

    let state = with_timeout(handle).await?;
    assert_eq!(state, WorkerState::Failed);

    let mut rest = Vec::new();
    while let Some(event) = rx.recv().await {
        rest.push(event);
    }
    assert!(matches!(rest.last(), Some(RunEvent::WorkerFailed { .. })), "{rest:?}");
    Ok(())
}

fn log_lines(dir: &Path) -> usize {
    std::fs::read_to_string(worker_log_path(dir, 1))
        .map(|log| log.lines().count())
        .unwrap_or(0)
}

async fn settle(ms: u64) {
    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
}

#[tokio::test]
async fn paused_worker_makes_no_progress_until_resumed() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let (tx, mut rx) = mpsc::channel(256);
    let control = StudyControl::new();

    let worker = ProcessWorker::new(
        shell_spec(dir.path(), "while true; do echo tick; sleep 0.05; done"),
        tx,
        control.subscribe(),
    );
    let handle = tokio::spawn(worker.run());
    let first = with_timeout(rx.recv()).await;
    assert!(matches!(first, Some(RunEvent::WorkerStarted { .. })));

    settle(300).await;
    assert!(log_lines(dir.path()) > 0);

    assert_eq!(control.pause(), 1);
    settle(150).await;
    let paused_at = log_lines(dir.path());
    settle(400).await;
    assert_eq!(log_lines(dir.path()), paused_at);

    control.resume();
    settle(400).await;
    let resumed_at = log_lines(dir.path());
    assert!(resumed_at > paused_at, "{resumed_at} <= {paused_at}");

    // Stopping a suspended tree still ends the worker.
    control.pause();
    settle(150).await;
    control.stop();
    let state = with_timeout(handle).await?;
    assert_eq!(state, WorkerState::Failed);

    let mut rest = Vec::new();
    while let Some(event) = rx.recv().await {
        rest.push(event);
    }
    assert!(matches!(rest.last(), Some(RunEvent::WorkerFailed { .. })), "{rest:?}");
    Ok(())
}
