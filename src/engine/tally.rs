// src/engine/tally.rs

//! Run-wide bookkeeping, owned by the core and mutated one event at a time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::engine::StudyId;
use crate::exec::stdout_scan::SubjectError;

/// Captured stderr of one failed worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStderr {
    pub iworker: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyTally {
    pub name: String,
    pub root: PathBuf,
    /// Total workload of the study's plan.
    pub planned: u64,
    /// Workload of expected markers seen so far.
    pub achieved: u64,
    pub workers: usize,
    pub finished: usize,
    pub failed: usize,
    pub watcher_stopped: bool,
}

impl StudyTally {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, planned: u64, workers: usize) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            planned,
            achieved: 0,
            workers,
            finished: 0,
            failed: 0,
            watcher_stopped: false,
        }
    }

    /// Workers that have not reported a terminal outcome yet.
    pub fn outstanding(&self) -> usize {
        self.workers.saturating_sub(self.finished + self.failed)
    }

    pub fn progress_complete(&self) -> bool {
        self.achieved >= self.planned
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunTally {
    global_debt: i64,
    studies: Vec<StudyTally>,
    stdout_errors: BTreeMap<PathBuf, Vec<SubjectError>>,
    stderr_errors: BTreeMap<PathBuf, Vec<WorkerStderr>>,
}

impl RunTally {
    /// Global debt starts at minus the number of workers across all studies.
    pub fn new(studies: Vec<StudyTally>) -> Self {
        let workers: usize = studies.iter().map(|s| s.workers).sum();
        Self {
            global_debt: -i64::try_from(workers).unwrap_or(i64::MAX),
            studies,
            stdout_errors: BTreeMap::new(),
            stderr_errors: BTreeMap::new(),
        }
    }

    pub fn global_debt(&self) -> i64 {
        self.global_debt
    }

    pub fn studies(&self) -> &[StudyTally] {
        &self.studies
    }

    pub fn study(&self, id: StudyId) -> Option<&StudyTally> {
        self.studies.get(id)
    }

    pub fn all_watchers_stopped(&self) -> bool {
        self.studies.iter().all(|s| s.watcher_stopped)
    }

    /// Record a worker's terminal notification. Returns false if the study is
    /// unknown or all of its workers had already reported.
    pub fn record_terminal(&mut self, id: StudyId, failed: bool) -> bool {
        let Some(study) = self.studies.get_mut(id) else {
            warn!(study = id, "terminal notification for unknown study");
            return false;
        };
        if study.outstanding() == 0 {
            warn!(study = id, "more terminal notifications than workers");
            return false;
        }
        if failed {
            study.failed += 1;
        } else {
            study.finished += 1;
        }
        self.global_debt = (self.global_debt + 1).min(0);
        true
    }

    pub fn record_watcher_stopped(&mut self, id: StudyId) {
        if let Some(study) = self.studies.get_mut(id) {
            study.watcher_stopped = true;
        }
    }

    /// Returns the study's (achieved, planned) after adding `weight`.
    pub fn add_progress(&mut self, id: StudyId, weight: u32) -> Option<(u64, u64)> {
        let study = self.studies.get_mut(id)?;
        study.achieved += u64::from(weight);
        Some((study.achieved, study.planned))
    }

    pub fn add_stdout_errors(&mut self, id: StudyId, errors: Vec<SubjectError>) {
        let Some(study) = self.studies.get(id) else {
            return;
        };
        self.stdout_errors
            .entry(study.root.clone())
            .or_default()
            .extend(errors);
    }

    pub fn add_stderr(&mut self, id: StudyId, iworker: usize, text: String) {
        let Some(study) = self.studies.get(id) else {
            return;
        };
        self.stderr_errors
            .entry(study.root.clone())
            .or_default()
            .push(WorkerStderr { iworker, text });
    }

    pub fn stdout_errors_for(&self, root: &Path) -> &[SubjectError] {
        self.stdout_errors.get(root).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn stderr_errors_for(&self, root: &Path) -> &[WorkerStderr] {
        self.stderr_errors.get(root).map(Vec::as_slice).unwrap_or_default()
    }
}
