// src/engine/mod.rs

//! Run orchestration.
//!
//! This module ties together:
//! - per-study preparation and launch ([`orchestrator`])
//! - the run-wide tally of debt, errors and progress ([`tally`])
//! - the pure core state machine that reacts to worker/watcher
//!   notifications ([`core`])
//! - the async shell that drives the core and performs IO ([`runtime`])
//! - post-run diagnosis and reports ([`diagnosis`])
//! - per-study pause/resume/stop controls ([`control`])

use crate::exec::stdout_scan::SubjectError;

/// Index of a study in the run (order of the run plan).
pub type StudyId = usize;

/// Control requests for the workers of one study.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Pause,
    Resume,
    Stop,
}

/// Notifications flowing into the runtime from workers and watchers.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A worker's subprocess was spawned.
    WorkerStarted {
        study: StudyId,
        iworker: usize,
        pid: Option<u32>,
    },
    /// A worker's subprocess exited with code 0.
    WorkerFinished { study: StudyId, iworker: usize },
    /// A worker's subprocess failed to start or exited non-zero.
    WorkerFailed {
        study: StudyId,
        iworker: usize,
        code: i32,
    },
    /// Failed iterations mined from a worker's stdout after it exited.
    StdoutErrors {
        study: StudyId,
        iworker: usize,
        errors: Vec<SubjectError>,
    },
    /// Captured stderr of a failed worker.
    StderrError {
        study: StudyId,
        iworker: usize,
        stderr: String,
    },
    /// Human-readable progress line from a directory watcher.
    ProgressMessage { study: StudyId, message: String },
    /// An expected STATUS file appeared.
    WorkloadProgress { study: StudyId, weight: u32 },
    /// A directory watcher stopped observing.
    WatcherStopped { study: StudyId },
    /// Ctrl-C: stop every study.
    ShutdownRequested,
}

pub mod control;
pub mod core;
pub mod diagnosis;
pub mod orchestrator;
pub mod runtime;
pub mod tally;

pub use control::{parse_control_line, StudyControl};
pub use core::{CoreCommand, CoreStep, RunCore};
pub use diagnosis::{Diagnoser, MissingStep, RunSummary, StudyDiagnosis};
pub use orchestrator::{Launcher, LaunchedRun, LaunchedStudy, Orchestrator, PreparedStudy};
pub use runtime::Runtime;
pub use tally::{RunTally, StudyTally, WorkerStderr};
