// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use chrono::Local;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::control::StudyControl;
use crate::engine::core::{CoreCommand, RunCore};
use crate::engine::diagnosis::{Diagnoser, RunSummary};
use crate::engine::orchestrator::LaunchedRun;
use crate::engine::{RunEvent, StudyId};
use crate::plan::StudyPlan;
use crate::watch::WatcherDebt;

/// Drives [`RunCore`] in response to `RunEvent`s and performs the IO it asks
/// for: repaying watcher debts, signalling studies, printing progress and
/// running diagnosis.
pub struct Runtime {
    core: RunCore,
    event_rx: mpsc::Receiver<RunEvent>,
    names: Vec<String>,
    debts: Vec<Arc<WatcherDebt>>,
    controls: Vec<StudyControl>,
    plans: Vec<Arc<StudyPlan>>,
    diagnoser: Diagnoser,
    summary: Option<RunSummary>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("studies", &self.names)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(launched: &LaunchedRun, event_rx: mpsc::Receiver<RunEvent>, diagnoser: Diagnoser) -> Self {
        Self {
            core: RunCore::new(launched.tally()),
            event_rx,
            names: launched.studies.iter().map(|s| s.name.clone()).collect(),
            debts: launched.debts(),
            controls: launched.controls(),
            plans: launched.plans(),
            diagnoser,
            summary: None,
        }
    }

    /// Main event loop. Returns once diagnosis has run.
    pub async fn run(mut self) -> RunSummary {
        info!(studies = self.names.len(), "aslrun runtime started");

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(event);
            for command in step.commands {
                self.execute_command(command);
            }

            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                break;
            }
        }

        // Forced exit (second Ctrl-C or closed channel): report what we have.
        match self.summary.take() {
            Some(summary) => summary,
            None => {
                warn!("run ended before every worker reported");
                self.diagnose()
            }
        }
    }

    fn execute_command(&mut self, command: CoreCommand) {
        match command {
            CoreCommand::RepayWatcherDebt(study) => {
                if let Some(debt) = self.debts.get(study) {
                    let value = debt.repay();
                    debug!(study, debt = value, "watcher debt repaid");
                }
            }
            CoreCommand::Announce { study, message } => {
                println!("[aslrun] {}: {message}", self.name(study));
            }
            CoreCommand::ReportProgress {
                study,
                achieved,
                planned,
            } => {
                let pct = if planned == 0 {
                    100
                } else {
                    achieved.saturating_mul(100) / planned
                };
                println!("[aslrun] {}: progress {achieved}/{planned} ({pct}%)", self.name(study));
            }
            CoreCommand::StopStudy(study) => {
                if let Some(control) = self.controls.get(study) {
                    let reached = control.stop();
                    info!(study, reached, "stop sent");
                }
            }
            CoreCommand::Diagnose => {
                let summary = self.diagnose();
                self.summary = Some(summary);
            }
        }
    }

    fn diagnose(&self) -> RunSummary {
        self.diagnoser
            .finalize(&self.plans, self.core.tally(), Local::now())
    }

    fn name(&self, study: StudyId) -> &str {
        self.names.get(study).map_or("?", String::as_str)
    }
}
