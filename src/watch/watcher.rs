// src/watch/watcher.rs

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::{RunEvent, StudyId};
use crate::fs::FileSystem;
use crate::plan::markers::{classify, lock_root, LockEntry, MarkerLocation, MARKER_EXTENSION};
use crate::plan::{MarkerTables, StudyPlan};
use crate::watch::debt::WatcherDebt;
use crate::watch::path_utils::file_name_str;
use crate::watch::source::MarkerSubscription;

pub const DEFAULT_DEBT_CHECK_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Created,
    /// No worker has reported yet.
    Observing,
    /// Some, not all, workers have reported.
    Draining,
    Stopped,
}

/// Turns STATUS-file creations under one study's lock tree into progress
/// notifications, until every worker of the study has reported.
pub struct DirectoryWatcher {
    study: StudyId,
    plan: Arc<StudyPlan>,
    tables: Arc<MarkerTables>,
    lock_root: PathBuf,
    debt: Arc<WatcherDebt>,
    fs: Arc<dyn FileSystem>,
    events: mpsc::Sender<RunEvent>,
    check_interval: Duration,
    seen: HashSet<PathBuf>,
    state: WatcherState,
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("study", &self.study)
            .field("lock_root", &self.lock_root)
            .field("state", &self.state)
            .field("debt", &self.debt.get())
            .field("seen", &self.seen.len())
            .finish_non_exhaustive()
    }
}

impl DirectoryWatcher {
    pub fn new(
        study: StudyId,
        plan: Arc<StudyPlan>,
        tables: Arc<MarkerTables>,
        debt: Arc<WatcherDebt>,
        fs: Arc<dyn FileSystem>,
        events: mpsc::Sender<RunEvent>,
    ) -> Self {
        let lock_root = lock_root(&plan.root);
        Self {
            study,
            plan,
            tables,
            lock_root,
            debt,
            fs,
            events,
            check_interval: DEFAULT_DEBT_CHECK_INTERVAL,
            seen: HashSet::new(),
            state: WatcherState::Created,
        }
    }

    pub fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    pub fn lock_root(&self) -> &Path {
        &self.lock_root
    }

    /// React to one created path. Returns the notifications to send.
    ///
    /// Only the first delivery of a path counts.
    pub fn on_created(&mut self, path: &Path) -> Vec<RunEvent> {
        if !self.seen.insert(path.to_path_buf()) {
            debug!(study = self.study, ?path, "duplicate creation event");
            return Vec::new();
        }

        let Some(entry) = classify(&self.lock_root, path) else {
            debug!(study = self.study, ?path, "ignoring path outside the marker tree");
            return Vec::new();
        };

        match entry {
            LockEntry::ModuleStarted(location) => self.on_module_started(&location),
            LockEntry::MarkerFile { location, marker } => self.on_marker_file(&location, &marker),
            // Created up front by the lock initializer.
            LockEntry::ModuleRoot(_) | LockEntry::SubjectDir { .. } | LockEntry::MarkerDir(_) => {
                Vec::new()
            }
        }
    }

    fn on_module_started(&self, location: &MarkerLocation) -> Vec<RunEvent> {
        let table = self.plan.table_for(&self.tables, location);
        let present = self.present_markers(&location.dir(&self.plan.root));
        if present >= table.len() {
            debug!(study = self.study, %location, present, "marker directory already complete");
            return Vec::new();
        }
        vec![RunEvent::ProgressMessage {
            study: self.study,
            message: format!("Started {} module for {location}", location.module.label()),
        }]
    }

    fn on_marker_file(&self, location: &MarkerLocation, marker: &str) -> Vec<RunEvent> {
        let table = self.plan.table_for(&self.tables, location);
        let message = match table.describe(marker) {
            Some(description) => format!("Completed {description} for {location}"),
            None => format!("Unexpected marker {marker} for {location}"),
        };

        let mut out = vec![RunEvent::ProgressMessage {
            study: self.study,
            message,
        }];

        let key = location.marker_path(&self.plan.root, marker);
        if let Some(weight) = self.plan.markers.weight(&key) {
            out.push(RunEvent::WorkloadProgress {
                study: self.study,
                weight,
            });
        }
        out
    }

    fn present_markers(&self, dir: &Path) -> usize {
        match self.fs.read_dir(dir) {
            Ok(entries) => entries
                .iter()
                .filter(|p| file_name_str(p).is_some_and(|n| n.ends_with(MARKER_EXTENSION)))
                .count(),
            Err(err) => {
                debug!(?dir, error = %err, "could not list marker directory");
                0
            }
        }
    }

    /// Observe `subscription` until the debt is repaid, then drain what is
    /// still in flight and stop. Always ends with `WatcherStopped`.
    pub async fn run(mut self, mut subscription: MarkerSubscription) -> WatcherState {
        self.state = WatcherState::Observing;
        info!(study = self.study, root = ?self.lock_root, workers = self.debt.workers(), "watching lock tree");

        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        loop {
            tokio::select! {
                maybe = subscription.events.recv(), if events_open => match maybe {
                    Some(path) => self.handle(&path).await,
                    None => {
                        warn!(study = self.study, "file watcher closed; waiting for workers only");
                        events_open = false;
                    }
                },
                _ = ticker.tick() => {
                    if self.debt.is_repaid() {
                        break;
                    }
                    if self.state == WatcherState::Observing && self.debt.is_draining() {
                        debug!(study = self.study, debt = self.debt.get(), "watcher draining");
                        self.state = WatcherState::Draining;
                    }
                }
            }
        }

        // Creation events can trail the process exit that repaid the debt.
        while events_open {
            match timeout(self.check_interval, subscription.events.recv()).await {
                Ok(Some(path)) => self.handle(&path).await,
                Ok(None) | Err(_) => events_open = false,
            }
        }
        drop(subscription);

        self.state = WatcherState::Stopped;
        info!(study = self.study, seen = self.seen.len(), "watcher stopped");
        if let Err(err) = self.events.send(RunEvent::WatcherStopped { study: self.study }).await {
            warn!(study = self.study, "failed to send watcher stop: {err}");
        }
        self.state
    }

    async fn handle(&mut self, path: &Path) {
        for event in self.on_created(path) {
            if let Err(err) = self.events.send(event).await {
                warn!(study = self.study, "failed to send watcher event: {err}");
            }
        }
    }
}
