// src/engine/diagnosis.rs

//! Post-run diagnosis: what did not get done, and why.
//!
//! For every study the expected markers are re-checked on disk. Per marker
//! directory only the earliest missing step (in canonical order) is
//! reported, since later steps never run once one fails. Errors mined from
//! stdout and captured stderr are merged in, and a dated report is written
//! into each study directory that did not complete.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::engine::tally::{RunTally, StudyTally, WorkerStderr};
use crate::exec::stdout_scan::SubjectError;
use crate::exec::worker::worker_log_path;
use crate::fs::FileSystem;
use crate::plan::markers::MarkerLocation;
use crate::plan::{MarkerTables, StudyPlan};

pub const REPORT_PREFIX: &str = "aslrun_errors_";
pub const RUN_LOG_PREFIX: &str = "aslrun_log_";

pub fn timestamp(now: &DateTime<Local>) -> String {
    now.format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// The first step of a marker directory that never completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingStep {
    pub location: MarkerLocation,
    pub marker: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct StudyDiagnosis {
    pub name: String,
    pub root: PathBuf,
    pub planned: u64,
    pub achieved: u64,
    /// Expected markers still absent after the run.
    pub missing_markers: usize,
    pub missing_steps: Vec<MissingStep>,
    pub stdout_errors: Vec<SubjectError>,
    pub stderr_errors: Vec<WorkerStderr>,
    pub report_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
}

impl StudyDiagnosis {
    pub fn is_complete(&self) -> bool {
        self.missing_markers == 0 && self.stdout_errors.is_empty() && self.stderr_errors.is_empty()
    }

    /// The progress indicator reached its planned maximum.
    pub fn progress_complete(&self) -> bool {
        self.achieved >= self.planned
    }

    pub fn render_report(&self, now: &DateTime<Local>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "aslrun error report for {}", self.root.display());
        let _ = writeln!(out, "generated {}", now.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(
            out,
            "workload completed: {}/{} ({} expected step(s) missing)",
            self.achieved, self.planned, self.missing_markers
        );

        if !self.missing_steps.is_empty() {
            let _ = writeln!(out, "\nIncomplete steps:");
            for step in &self.missing_steps {
                let _ = writeln!(
                    out,
                    "  {} module, {}: failed at \"{}\" ({})",
                    step.location.module.label(),
                    step.location,
                    step.description,
                    step.marker
                );
            }
        }

        if !self.stdout_errors.is_empty() {
            let _ = writeln!(out, "\nErrors reported by the pipeline:");
            for err in &self.stdout_errors {
                let _ = writeln!(out, "  {} module, {}: {}", err.module.label(), err.subject, err.message);
            }
        }

        if !self.stderr_errors.is_empty() {
            let _ = writeln!(out, "\nProcess errors:");
            for err in &self.stderr_errors {
                let _ = writeln!(out, "  worker {}:", err.iworker);
                let text = err.text.trim();
                if text.is_empty() {
                    let _ = writeln!(out, "    (no stderr output)");
                }
                for line in text.lines() {
                    let _ = writeln!(out, "    {line}");
                }
            }
        }

        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub studies: Vec<StudyDiagnosis>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.studies.iter().all(StudyDiagnosis::is_complete)
    }

    pub fn incomplete(&self) -> impl Iterator<Item = &StudyDiagnosis> {
        self.studies.iter().filter(|s| !s.is_complete())
    }
}

/// Earliest missing expected step of every marker directory in `plan`.
pub fn missing_steps(
    fs: &dyn FileSystem,
    plan: &StudyPlan,
    tables: &MarkerTables,
) -> (usize, Vec<MissingStep>) {
    let mut missing = 0;
    let mut steps = Vec::new();

    for location in plan.locations() {
        let table = plan.table_for(tables, &location);
        let mut first: Option<MissingStep> = None;
        for entry in table.entries() {
            let path = location.marker_path(&plan.root, &entry.marker);
            if !plan.markers.contains(&path) || fs.exists(&path) {
                continue;
            }
            missing += 1;
            if first.is_none() {
                first = Some(MissingStep {
                    location: location.clone(),
                    marker: entry.marker.clone(),
                    description: entry.description.clone(),
                });
            }
        }
        steps.extend(first);
    }

    (missing, steps)
}

/// Writes reports and consolidates worker logs once a run is over.
#[derive(Debug, Clone)]
pub struct Diagnoser {
    fs: Arc<dyn FileSystem>,
    tables: Arc<MarkerTables>,
}

impl Diagnoser {
    pub fn new(fs: Arc<dyn FileSystem>, tables: Arc<MarkerTables>) -> Self {
        Self { fs, tables }
    }

    pub fn diagnose_study(&self, plan: &StudyPlan, study: &StudyTally, run: &RunTally) -> StudyDiagnosis {
        let (missing_markers, missing_steps) = missing_steps(&*self.fs, plan, &self.tables);
        StudyDiagnosis {
            name: study.name.clone(),
            root: study.root.clone(),
            planned: study.planned,
            achieved: study.achieved,
            missing_markers,
            missing_steps,
            stdout_errors: run.stdout_errors_for(&study.root).to_vec(),
            stderr_errors: run.stderr_errors_for(&study.root).to_vec(),
            report_path: None,
            log_path: None,
        }
    }

    /// Diagnose every study, write reports for incomplete ones and merge the
    /// worker logs. IO failures are logged, never fatal.
    pub fn finalize(&self, plans: &[Arc<StudyPlan>], run: &RunTally, now: DateTime<Local>) -> RunSummary {
        let mut summary = RunSummary::default();

        for (plan, study) in plans.iter().zip(run.studies()) {
            let mut diagnosis = self.diagnose_study(plan, study, run);

            if !diagnosis.is_complete() {
                match self.write_report(&diagnosis, &now) {
                    Ok(path) => diagnosis.report_path = Some(path),
                    Err(err) => warn!(root = ?diagnosis.root, error = %err, "could not write error report"),
                }
            }

            match self.consolidate_logs(&study.root, study.workers, &now) {
                Ok(path) => diagnosis.log_path = path,
                Err(err) => warn!(root = ?study.root, error = %err, "could not consolidate worker logs"),
            }

            info!(
                study = %diagnosis.name,
                complete = diagnosis.is_complete(),
                missing = diagnosis.missing_markers,
                "study diagnosed"
            );
            summary.studies.push(diagnosis);
        }

        summary
    }

    pub fn write_report(&self, diagnosis: &StudyDiagnosis, now: &DateTime<Local>) -> anyhow::Result<PathBuf> {
        let path = diagnosis
            .root
            .join(format!("{REPORT_PREFIX}{}.txt", timestamp(now)));
        self.fs.write(&path, diagnosis.render_report(now).as_bytes())?;
        Ok(path)
    }

    /// Merge `tmp_aslrun_worker_<i>.log` for `i` in `1..=workers` into one
    /// dated run log and delete them. Returns `None` if there was nothing to
    /// merge.
    pub fn consolidate_logs(
        &self,
        root: &Path,
        workers: usize,
        now: &DateTime<Local>,
    ) -> anyhow::Result<Option<PathBuf>> {
        let mut merged = String::new();
        let mut sources = Vec::new();

        for iworker in 1..=workers {
            let path = worker_log_path(root, iworker);
            if !self.fs.is_file(&path) {
                continue;
            }
            let contents = self.fs.read_to_string(&path)?;
            let _ = writeln!(merged, "===== worker {iworker}/{workers} =====");
            merged.push_str(&contents);
            if !contents.ends_with('\n') {
                merged.push('\n');
            }
            sources.push(path);
        }

        if sources.is_empty() {
            return Ok(None);
        }

        let target = root.join(format!("{RUN_LOG_PREFIX}{}.log", timestamp(now)));
        self.fs.write(&target, merged.as_bytes())?;
        for source in sources {
            if let Err(err) = self.fs.remove_file(&source) {
                warn!(path = ?source, error = %err, "could not delete worker log");
            }
        }
        Ok(Some(target))
    }
}
