// src/engine/core.rs

//! Pure core state machine of a run.
//!
//! Consumes [`RunEvent`]s and produces:
//! - an updated [`RunTally`]
//! - a list of commands describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::Runtime`) owns the watcher debts,
//! the study controls and the filesystem; this type owns none of them and
//! can be unit tested without Tokio, channels or processes.

use tracing::{debug, info, warn};

use crate::engine::tally::RunTally;
use crate::engine::{RunEvent, StudyId};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Increment the study's watcher debt by one.
    RepayWatcherDebt(StudyId),
    /// Show a progress line for the study.
    Announce { study: StudyId, message: String },
    /// The study's progress indicator moved.
    ReportProgress {
        study: StudyId,
        achieved: u64,
        planned: u64,
    },
    /// Terminate every worker of the study.
    StopStudy(StudyId),
    /// Run post-run diagnosis. Issued at most once per run.
    Diagnose,
}

/// Decision returned by the core after handling a single `RunEvent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    fn continue_with(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }
}

#[derive(Debug)]
pub struct RunCore {
    tally: RunTally,
    diagnosed: bool,
    shutdown_requests: usize,
}

impl RunCore {
    pub fn new(tally: RunTally) -> Self {
        Self {
            tally,
            diagnosed: false,
            shutdown_requests: 0,
        }
    }

    pub fn tally(&self) -> &RunTally {
        &self.tally
    }

    pub fn is_diagnosed(&self) -> bool {
        self.diagnosed
    }

    /// Handle a single event, updating the tally and returning the commands
    /// for the IO shell.
    pub fn step(&mut self, event: RunEvent) -> CoreStep {
        match event {
            RunEvent::WorkerStarted { study, iworker, pid } => {
                debug!(study, iworker, ?pid, "worker started");
                let workers = self.tally.study(study).map_or(0, |s| s.workers);
                CoreStep::continue_with(vec![CoreCommand::Announce {
                    study,
                    message: format!("worker {iworker}/{workers} started"),
                }])
            }
            RunEvent::WorkerFinished { study, iworker } => {
                self.on_terminal(study, iworker, None)
            }
            RunEvent::WorkerFailed {
                study,
                iworker,
                code,
            } => self.on_terminal(study, iworker, Some(code)),
            RunEvent::StdoutErrors {
                study,
                iworker,
                errors,
            } => {
                debug!(study, iworker, count = errors.len(), "stdout errors recorded");
                self.tally.add_stdout_errors(study, errors);
                CoreStep::continue_with(Vec::new())
            }
            RunEvent::StderrError {
                study,
                iworker,
                stderr,
            } => {
                self.tally.add_stderr(study, iworker, stderr);
                CoreStep::continue_with(Vec::new())
            }
            RunEvent::ProgressMessage { study, message } => {
                CoreStep::continue_with(vec![CoreCommand::Announce { study, message }])
            }
            RunEvent::WorkloadProgress { study, weight } => {
                let commands = match self.tally.add_progress(study, weight) {
                    Some((achieved, planned)) => vec![CoreCommand::ReportProgress {
                        study,
                        achieved,
                        planned,
                    }],
                    None => Vec::new(),
                };
                CoreStep::continue_with(commands)
            }
            RunEvent::WatcherStopped { study } => {
                self.tally.record_watcher_stopped(study);
                self.maybe_diagnose(Vec::new())
            }
            RunEvent::ShutdownRequested => self.on_shutdown(),
        }
    }

    fn on_terminal(&mut self, study: StudyId, iworker: usize, code: Option<i32>) -> CoreStep {
        if !self.tally.record_terminal(study, code.is_some()) {
            return CoreStep::continue_with(Vec::new());
        }

        let message = match code {
            None => format!("worker {iworker} finished"),
            Some(code) => format!("worker {iworker} failed (exit code {code})"),
        };
        let commands = vec![
            CoreCommand::RepayWatcherDebt(study),
            CoreCommand::Announce { study, message },
        ];

        debug!(study, iworker, global_debt = self.tally.global_debt(), "worker reported");
        self.maybe_diagnose(commands)
    }

    /// Diagnosis waits for every worker to report and every watcher to stop,
    /// so no notification is still in flight when reports are written.
    fn maybe_diagnose(&mut self, mut commands: Vec<CoreCommand>) -> CoreStep {
        if self.diagnosed
            || self.tally.global_debt() != 0
            || !self.tally.all_watchers_stopped()
        {
            return CoreStep::continue_with(commands);
        }

        info!("all workers reported; running diagnosis");
        self.diagnosed = true;
        commands.push(CoreCommand::Diagnose);
        CoreStep {
            commands,
            keep_running: false,
        }
    }

    fn on_shutdown(&mut self) -> CoreStep {
        self.shutdown_requests += 1;
        if self.shutdown_requests > 1 {
            warn!("second shutdown request; exiting without waiting for workers");
            return CoreStep {
                commands: Vec::new(),
                keep_running: false,
            };
        }

        let commands = self
            .tally
            .studies()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.outstanding() > 0)
            .map(|(id, _)| CoreCommand::StopStudy(id))
            .collect();
        info!("shutdown requested; stopping every study");
        CoreStep::continue_with(commands)
    }
}
