// tests/orchestrator.rs

use std::error::Error;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aslrun::config::RunConfig;
use aslrun::engine::{ControlSignal, Diagnoser, Orchestrator, RunEvent, Runtime};
use aslrun::errors::{AslrunError, Result as AslResult};
use aslrun::exec::{WorkerBackend, WorkerSpec};
use aslrun::fs::mock::MockFileSystem;
use aslrun::fs::FileSystem;
use aslrun::plan::{lock_root, MarkerLocation, MarkerTables};
use aslrun::watch::{MarkerSource, MarkerSubscription};
use aslrun_test_utils::fixtures::mock_study;
use aslrun_test_utils::{
    init_tracing, with_timeout, ChannelMarkerSource, DataParBuilder, FakeOutcome,
    FakeWorkerBackend, RunConfigBuilder, StudyRowBuilder,
};
use tokio::sync::{broadcast, mpsc};

type TestResult = Result<(), Box<dyn Error>>;

fn add_study(fs: &MockFileSystem, root: &str, subjects: &[&str]) {
    let root = Path::new(root);
    mock_study(fs, root, subjects, &DataParBuilder::new(root).build());
}

fn run_config(studies: &[(&str, &str, usize)]) -> RunConfig {
    let mut builder = RunConfigBuilder::new()
        .with_matlab_version("R2021a")
        .with_debt_check_interval_ms(20);
    for (name, root, cores) in studies {
        builder = builder.with_study(name, StudyRowBuilder::new(*root).cores(*cores).build());
    }
    builder.build()
}

fn orchestrator(fs: &MockFileSystem, cfg: &RunConfig) -> Result<Orchestrator, AslrunError> {
    let tables = Arc::new(MarkerTables::builtin()?);
    Ok(Orchestrator::new(
        Arc::new(fs.clone()),
        tables,
        cfg.config().clone(),
    ))
}

/// Subscribes normally until `fail_at` subscriptions have been made.
struct FlakySource {
    inner: ChannelMarkerSource,
    fail_at: usize,
    calls: AtomicUsize,
}

impl MarkerSource for FlakySource {
    fn subscribe(&self, root: &Path) -> anyhow::Result<MarkerSubscription> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.fail_at {
            anyhow::bail!("cannot watch {root:?}");
        }
        self.inner.subscribe(root)
    }
}

/// Starts `limit` workers through the fake backend, then refuses.
struct LimitedBackend {
    inner: FakeWorkerBackend,
    limit: usize,
}

impl WorkerBackend for LimitedBackend {
    fn launch(
        &mut self,
        spec: WorkerSpec,
        control: broadcast::Receiver<ControlSignal>,
    ) -> Pin<Box<dyn Future<Output = AslResult<()>> + Send + '_>> {
        if self.limit == 0 {
            return Box::pin(async { Err(AslrunError::ConfigError("no more workers".into())) });
        }
        self.limit -= 1;
        self.inner.launch(spec, control)
    }
}

fn two_studies(fs: &MockFileSystem) -> RunConfig {
    add_study(fs, "/data/a", &["sub-001", "sub-002"]);
    add_study(fs, "/data/b", &["sub-001"]);
    run_config(&[("a", "/data/a", 2), ("b", "/data/b", 1)])
}

fn under(fs: &MockFileSystem, dir: &Path) -> Vec<PathBuf> {
    fs.paths().into_iter().filter(|p| p.starts_with(dir)).collect()
}

#[tokio::test]
async fn launch_starts_one_worker_per_core_with_negative_debt() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    add_study(&fs, "/data/a", &["sub-001", "sub-002"]);
    add_study(&fs, "/data/b", &["sub-001"]);
    let cfg = run_config(&[("a", "/data/a", 2), ("b", "/data/b", 1)]);
    let orch = orchestrator(&fs, &cfg)?;

    let studies = orch.prepare_all(&cfg)?;
    orch.initialize_locks(&studies)?;
    assert!(fs.is_dir(&MarkerLocation::structural("sub-002").dir(Path::new("/data/a"))));

    let (tx, _rx) = mpsc::channel(64);
    let mut backend = FakeWorkerBackend::new(tx.clone(), FakeOutcome::WaitForStop);
    let source = ChannelMarkerSource::new();
    let launched = orch.launch(studies, &mut backend, &source, tx).await?;

    assert_eq!(
        source.roots(),
        vec![lock_root(Path::new("/data/a")), lock_root(Path::new("/data/b"))]
    );

    let debts: Vec<i64> = launched.debts().iter().map(|d| d.get()).collect();
    assert_eq!(debts, vec![-2, -1]);
    assert_eq!(launched.tally().global_debt(), -3);

    let specs = backend.launched().lock().unwrap().clone();
    let workers: Vec<(usize, usize, usize)> = specs
        .iter()
        .map(|s| (s.study, s.iworker, s.nworkers))
        .collect();
    assert_eq!(workers, vec![(0, 1, 2), (0, 2, 2), (1, 1, 1)]);
    let call = specs[1].invocation.to_string();
    assert!(call.contains("-batch"), "{call}");
    assert!(call.contains("ExploreASL('/data/a/DataPar.json', [0 0 0], [1 0 0], 0, 2, 2)"), "{call}");
    Ok(())
}

#[test]
fn a_bad_study_aborts_before_anything_is_created() -> TestResult {
    let fs = MockFileSystem::new();
    add_study(&fs, "/data/a", &["sub-001"]);
    // Parameter file of b points elsewhere.
    mock_study(
        &fs,
        Path::new("/data/b"),
        &["sub-001"],
        &DataParBuilder::new(Path::new("/data/elsewhere")).build(),
    );
    let cfg = run_config(&[("a", "/data/a", 1), ("b", "/data/b", 1)]);
    let orch = orchestrator(&fs, &cfg)?;

    let result = orch.prepare_all(&cfg);
    assert!(matches!(result, Err(AslrunError::RootMismatch { .. })), "{result:?}");
    assert!(under(&fs, &lock_root(Path::new("/data/a"))).is_empty());
    assert!(under(&fs, &lock_root(Path::new("/data/b"))).is_empty());
    Ok(())
}

#[test]
fn study_without_subjects_is_rejected() -> TestResult {
    let fs = MockFileSystem::new();
    add_study(&fs, "/data/a", &["notes", "backup"]);
    let cfg = run_config(&[("a", "/data/a", 1)]);

    let result = orchestrator(&fs, &cfg)?.prepare_all(&cfg);
    assert!(matches!(result, Err(AslrunError::NoSubjects(_))), "{result:?}");
    Ok(())
}

#[test]
fn old_interpreter_fails_preflight() -> TestResult {
    let fs = MockFileSystem::new();
    add_study(&fs, "/data/a", &["sub-001"]);
    let cfg = RunConfigBuilder::new()
        .with_matlab_version("R2015b")
        .with_study("a", StudyRowBuilder::new("/data/a").build())
        .build();

    let result = orchestrator(&fs, &cfg)?.prepare_all(&cfg);
    assert!(matches!(result, Err(AslrunError::UnsupportedInterpreter(_))), "{result:?}");
    Ok(())
}

#[tokio::test]
async fn finished_run_is_diagnosed_complete() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    add_study(&fs, "/data/a", &["sub-001"]);
    let cfg = run_config(&[("a", "/data/a", 2)]);
    let orch = orchestrator(&fs, &cfg)?;

    let studies = orch.prepare_all(&cfg)?;
    orch.initialize_locks(&studies)?;
    let plan = Arc::clone(&studies[0].plan);

    let (tx, rx) = mpsc::channel(64);
    let mut backend = FakeWorkerBackend::new(tx.clone(), FakeOutcome::Finish);
    let source = ChannelMarkerSource::new();
    let launched = orch.launch(studies, &mut backend, &source, tx).await?;

    // The pipeline writes every expected marker.
    for (path, _) in plan.markers.iter() {
        fs.add_file(path, "");
        assert_eq!(source.emit(path), 1);
    }

    let diagnoser = Diagnoser::new(Arc::new(fs.clone()), Arc::clone(orch.tables()));
    let summary = with_timeout(Runtime::new(&launched, rx, diagnoser).run()).await;

    assert!(summary.is_success(), "{summary:?}");
    let study = &summary.studies[0];
    assert_eq!(study.achieved, plan.total_workload());
    assert!(study.progress_complete());
    assert!(study.report_path.is_none());
    assert!(launched.debts()[0].is_repaid());
    Ok(())
}

#[tokio::test]
async fn shutdown_stops_workers_and_still_diagnoses() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    add_study(&fs, "/data/a", &["sub-001"]);
    let cfg = run_config(&[("a", "/data/a", 2)]);
    let orch = orchestrator(&fs, &cfg)?;

    let studies = orch.prepare_all(&cfg)?;
    orch.initialize_locks(&studies)?;

    let (tx, rx) = mpsc::channel(64);
    let mut backend = FakeWorkerBackend::new(tx.clone(), FakeOutcome::WaitForStop);
    let signals = backend.signals();
    let source = ChannelMarkerSource::new();
    let launched = orch.launch(studies, &mut backend, &source, tx.clone()).await?;

    tx.send(RunEvent::ShutdownRequested).await?;
    let diagnoser = Diagnoser::new(Arc::new(fs.clone()), Arc::clone(orch.tables()));
    let summary = with_timeout(Runtime::new(&launched, rx, diagnoser).run()).await;

    let mut stopped: Vec<usize> = signals
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, s)| *s == ControlSignal::Stop)
        .map(|(i, _)| *i)
        .collect();
    stopped.sort_unstable();
    assert_eq!(stopped, vec![1, 2]);

    assert!(!summary.is_success());
    let study = &summary.studies[0];
    assert!(study.missing_markers > 0);
    assert_eq!(study.missing_steps[0].marker, "010_LinearReg_T1w2MNI.status");

    let report = study.report_path.clone().ok_or("report expected")?;
    assert!(fs.is_file(&report));
    Ok(())
}

#[tokio::test]
async fn failed_subscription_starts_no_worker() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    let cfg = two_studies(&fs);
    let orch = orchestrator(&fs, &cfg)?;
    let studies = orch.prepare_all(&cfg)?;
    orch.initialize_locks(&studies)?;

    let (tx, _rx) = mpsc::channel(64);
    let mut backend = FakeWorkerBackend::new(tx.clone(), FakeOutcome::WaitForStop);
    let source = FlakySource {
        inner: ChannelMarkerSource::new(),
        fail_at: 1,
        calls: AtomicUsize::new(0),
    };

    let result = orch.launch(studies, &mut backend, &source, tx).await;
    assert!(result.is_err());
    assert!(backend.launched().lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_worker_start_stops_studies_already_running() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    let cfg = two_studies(&fs);
    let orch = orchestrator(&fs, &cfg)?;
    let studies = orch.prepare_all(&cfg)?;
    orch.initialize_locks(&studies)?;

    let (tx, mut rx) = mpsc::channel(64);
    let inner = FakeWorkerBackend::new(tx.clone(), FakeOutcome::WaitForStop);
    let launched = inner.launched();
    let mut backend = LimitedBackend { inner, limit: 2 };
    let source = ChannelMarkerSource::new();

    let result = orch.launch(studies, &mut backend, &source, tx).await;
    assert!(matches!(result, Err(AslrunError::ConfigError(_))), "{result:?}");
    assert_eq!(launched.lock().unwrap().len(), 2);

    // Both workers of study a were told to stop and report it.
    let mut failed = Vec::new();
    with_timeout(async {
        while failed.len() < 2 {
            match rx.recv().await {
                Some(RunEvent::WorkerFailed { study, iworker, .. }) => failed.push((study, iworker)),
                Some(_) => {}
                None => break,
            }
        }
    })
    .await;
    failed.sort_unstable();
    assert_eq!(failed, vec![(0, 1), (0, 2)]);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rx.try_recv().is_err());
    Ok(())
}
