// tests/directory_watcher.rs

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aslrun::config::{load_study_config, ConfigSection};
use aslrun::engine::RunEvent;
use aslrun::fs::mock::MockFileSystem;
use aslrun::fs::FileSystem;
use aslrun::plan::markers::{classify, LockEntry};
use aslrun::plan::{LockDirectoryInitializer, MarkerLocation, MarkerTables, StudyPlan, WorkloadPlanner};
use aslrun::types::ModuleSelection;
use aslrun::watch::{DirectoryWatcher, MarkerSource, WatcherDebt, WatcherState};
use aslrun_test_utils::fixtures::mock_study;
use aslrun_test_utils::{init_tracing, with_timeout, ChannelMarkerSource, DataParBuilder, StudyRowBuilder};
use tokio::sync::mpsc;

type TestResult = Result<(), Box<dyn Error>>;

fn root() -> PathBuf {
    PathBuf::from("/data/study")
}

fn setup(fs: &MockFileSystem, selection: ModuleSelection) -> (Arc<StudyPlan>, Arc<MarkerTables>) {
    let data_par = DataParBuilder::new(&root()).build();
    mock_study(fs, &root(), &["sub-001", "sub-002"], &data_par);
    let row = StudyRowBuilder::new(root()).module(selection).build();
    let study = load_study_config(fs, &row, &ConfigSection::default()).expect("valid study");
    let tables = MarkerTables::builtin().expect("builtin tables");
    let plan = WorkloadPlanner::new(fs, &tables)
        .plan(&study, selection, None)
        .expect("plan");
    LockDirectoryInitializer::new(fs)
        .initialize(&study, selection)
        .expect("lock dirs");
    (Arc::new(plan), Arc::new(tables))
}

fn watcher(
    fs: &MockFileSystem,
    workers: usize,
) -> (DirectoryWatcher, Arc<WatcherDebt>, mpsc::Receiver<RunEvent>) {
    let (plan, tables) = setup(fs, ModuleSelection::Structural);
    let debt = Arc::new(WatcherDebt::new(workers));
    let (tx, rx) = mpsc::channel(64);
    let fs: Arc<dyn FileSystem> = Arc::new(fs.clone());
    let w = DirectoryWatcher::new(0, plan, tables, Arc::clone(&debt), fs, tx)
        .with_check_interval(Duration::from_millis(10));
    (w, debt, rx)
}

fn progress_weights(events: &[RunEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            RunEvent::WorkloadProgress { weight, .. } => Some(*weight),
            _ => None,
        })
        .collect()
}

fn messages(events: &[RunEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            RunEvent::ProgressMessage { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn expected_marker_emits_message_and_weight() {
    init_tracing();
    let fs = MockFileSystem::new();
    let (mut w, _debt, _rx) = watcher(&fs, 1);

    let path = MarkerLocation::structural("sub-001").marker_path(&root(), "060_Segment_T1w.status");
    let events = w.on_created(&path);

    assert_eq!(progress_weights(&events), vec![10]);
    let msgs = messages(&events);
    assert_eq!(msgs.len(), 1);
    assert!(msgs[0].starts_with("Completed "), "{}", msgs[0]);
    assert!(msgs[0].ends_with("for sub-001"), "{}", msgs[0]);
}

#[test]
fn duplicate_path_is_reported_once() {
    let fs = MockFileSystem::new();
    let (mut w, _debt, _rx) = watcher(&fs, 1);
    let path = MarkerLocation::structural("sub-002").marker_path(&root(), "999_ready.status");

    let first = w.on_created(&path);
    let second = w.on_created(&path);

    assert_eq!(progress_weights(&first), vec![1]);
    assert!(second.is_empty());
}

#[test]
fn unexpected_marker_never_moves_progress() {
    let fs = MockFileSystem::new();
    let (mut w, _debt, _rx) = watcher(&fs, 1);

    // A FLAIR step for a subject without FLAIR is not in the expected set.
    let flair = MarkerLocation::structural("sub-001").marker_path(&root(), "020_LinearReg_FLAIR2T1w.status");
    let unknown = MarkerLocation::structural("sub-001").marker_path(&root(), "555_Bogus.status");
    let stranger = MarkerLocation::structural("sub-999").marker_path(&root(), "999_ready.status");

    for path in [&flair, &unknown, &stranger] {
        let events = w.on_created(path);
        assert!(progress_weights(&events).is_empty(), "{path:?}");
        assert_eq!(messages(&events).len(), 1, "{path:?}");
    }

    let msgs = messages(&w.on_created(&root().join("lock").join("notes.txt")));
    assert!(msgs.is_empty());
    let msgs = messages(&w.on_created(&root().join("sub-001").join("T1.nii")));
    assert!(msgs.is_empty());
}

#[test]
fn locked_directory_announces_module_start() {
    let fs = MockFileSystem::new();
    let (mut w, _debt, _rx) = watcher(&fs, 1);
    let dir = MarkerLocation::structural("sub-001").dir(&root());

    // Pre-created by the lock initializer, so it says nothing on its own.
    assert!(w.on_created(&dir).is_empty());

    let msgs = messages(&w.on_created(&dir.join("locked")));
    assert_eq!(msgs, vec!["Started Structural module for sub-001".to_string()]);
    assert!(progress_weights(&w.on_created(&dir.join("locked"))).is_empty());
}

#[test]
fn locked_directory_of_a_finished_module_is_quiet() {
    let fs = MockFileSystem::new();
    let (mut w, _debt, _rx) = watcher(&fs, 1);
    let location = MarkerLocation::structural("sub-002");
    let tables = MarkerTables::builtin().expect("builtin tables");
    let table = tables.select(location.module, None, false);
    for entry in table.entries() {
        fs.add_file(location.marker_path(&root(), &entry.marker), "");
    }

    assert!(w.on_created(&location.dir(&root()).join("locked")).is_empty());
}

#[test]
fn classify_only_accepts_locked_inside_marker_directories() {
    let lock = root().join("lock");
    let location = MarkerLocation::asl("sub-001", "ASL_1");
    let dir = location.dir(&root());

    assert_eq!(
        classify(&lock, &dir.join("locked")),
        Some(LockEntry::ModuleStarted(location.clone()))
    );
    assert_eq!(classify(&lock, &dir.join("locked").join("tmp.status")), None);
    assert_eq!(
        classify(&lock, &lock.join("xASL_module_ASL").join("sub-001").join("locked")),
        None
    );
    assert_eq!(classify(&lock, &dir), Some(LockEntry::MarkerDir(location)));
}

#[tokio::test]
async fn watcher_stops_once_debt_is_repaid() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    let (w, debt, mut rx) = watcher(&fs, 2);
    let source = ChannelMarkerSource::new();
    let subscription = source.subscribe(&root().join("lock"))?;
    let handle = tokio::spawn(w.run(subscription));

    let path = MarkerLocation::structural("sub-001").marker_path(&root(), "999_ready.status");
    assert_eq!(source.emit(&path), 1);
    assert_eq!(source.emit(&path), 1);

    debt.repay();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());
    debt.repay();

    let state = with_timeout(handle).await?;
    assert_eq!(state, WatcherState::Stopped);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(progress_weights(&events), vec![1]);
    assert!(matches!(events.last(), Some(RunEvent::WatcherStopped { study: 0 })));
    Ok(())
}
