// src/engine/orchestrator.rs

//! Per-study preparation and launch.
//!
//! Launch happens in three phases so that nothing touches the disk or spawns
//! a process until every study has passed its checks:
//! 1. [`Orchestrator::prepare_all`]: parameter file, subjects, scenario
//!    preflight and workload plan for every study.
//! 2. [`Orchestrator::initialize_locks`]: marker directories for every study.
//! 3. [`Orchestrator::launch`]: one watcher and N workers per study.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{load_study_config, ConfigSection, RunConfig, StudyConfig, StudyRow};
use crate::engine::control::StudyControl;
use crate::engine::tally::{RunTally, StudyTally};
use crate::engine::{RunEvent, StudyId};
use crate::errors::{AslrunError, Result};
use crate::exec::command::{
    compiled_invocation, detect_interpreter_version, invocation_style, resolve_runtime_env,
    uncompiled_invocation, HostOs, Invocation, InvocationStyle, PipelineArgs, RuntimeEnv,
};
use crate::exec::{WorkerBackend, WorkerSpec};
use crate::fs::FileSystem;
use crate::plan::markers::lock_root;
use crate::plan::subjects::list_subjects;
use crate::plan::{detect_pipeline_version, LockDirectoryInitializer, MarkerTables, StudyPlan, WorkloadPlanner};
use crate::types::Scenario;
use crate::watch::{DirectoryWatcher, MarkerSource, WatcherDebt, WatcherState};

/// How a study's workers are started, decided during preflight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launcher {
    Uncompiled {
        matlab_cmd: String,
        style: InvocationStyle,
    },
    Compiled {
        runtime: RuntimeEnv,
        os: HostOs,
    },
}

impl Launcher {
    pub fn invocation(&self, study: &StudyConfig, args: &PipelineArgs) -> Invocation {
        match self {
            Launcher::Uncompiled { matlab_cmd, style } => {
                uncompiled_invocation(matlab_cmd, *style, &study.pipeline_dir, args)
            }
            Launcher::Compiled { runtime, os } => {
                compiled_invocation(&study.pipeline_dir, runtime, *os, args)
            }
        }
    }
}

/// A study that passed every pre-launch check.
#[derive(Debug, Clone)]
pub struct PreparedStudy {
    pub id: StudyId,
    pub name: String,
    pub row: StudyRow,
    pub config: StudyConfig,
    pub plan: Arc<StudyPlan>,
    pub launcher: Launcher,
}

impl PreparedStudy {
    /// One spec per allocated core, `iworker` in `1..=cores`.
    pub fn worker_specs(&self) -> Vec<WorkerSpec> {
        let nworkers = self.row.cores;
        (1..=nworkers)
            .map(|iworker| {
                let args = PipelineArgs {
                    data_par: self.config.source.clone(),
                    selection: self.row.module,
                    iworker,
                    nworkers,
                };
                WorkerSpec {
                    study: self.id,
                    study_dir: self.plan.root.clone(),
                    iworker,
                    nworkers,
                    modules: self.row.module.modules(),
                    invocation: self.launcher.invocation(&self.config, &args),
                }
            })
            .collect()
    }
}

/// A study whose watcher and workers are running.
#[derive(Debug)]
pub struct LaunchedStudy {
    pub id: StudyId,
    pub name: String,
    pub plan: Arc<StudyPlan>,
    pub workers: usize,
    pub debt: Arc<WatcherDebt>,
    pub control: StudyControl,
    pub watcher: JoinHandle<WatcherState>,
}

#[derive(Debug, Default)]
pub struct LaunchedRun {
    pub studies: Vec<LaunchedStudy>,
}

impl LaunchedRun {
    /// Fresh tally with global debt at minus the total worker count.
    pub fn tally(&self) -> RunTally {
        RunTally::new(
            self.studies
                .iter()
                .map(|s| StudyTally::new(&s.name, &s.plan.root, s.plan.total_workload(), s.workers))
                .collect(),
        )
    }

    pub fn controls(&self) -> Vec<StudyControl> {
        self.studies.iter().map(|s| s.control.clone()).collect()
    }

    pub fn debts(&self) -> Vec<Arc<WatcherDebt>> {
        self.studies.iter().map(|s| Arc::clone(&s.debt)).collect()
    }

    pub fn plans(&self) -> Vec<Arc<StudyPlan>> {
        self.studies.iter().map(|s| Arc::clone(&s.plan)).collect()
    }

    /// Stop every worker started so far and drop the watchers.
    pub fn abort(self) {
        for study in self.studies {
            let stopped = study.control.stop();
            warn!(study = %study.name, workers = stopped, "launch aborted; stopping study");
            study.watcher.abort();
        }
    }
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    fs: Arc<dyn FileSystem>,
    tables: Arc<MarkerTables>,
    settings: ConfigSection,
    os: HostOs,
}

impl Orchestrator {
    pub fn new(fs: Arc<dyn FileSystem>, tables: Arc<MarkerTables>, settings: ConfigSection) -> Self {
        Self {
            fs,
            tables,
            settings,
            os: HostOs::current(),
        }
    }

    /// Override the host OS used for invocation decisions.
    pub fn with_host_os(mut self, os: HostOs) -> Self {
        self.os = os;
        self
    }

    pub fn tables(&self) -> &Arc<MarkerTables> {
        &self.tables
    }

    /// Run every pre-launch check for one study. Touches nothing on disk.
    pub fn prepare_study(&self, id: StudyId, name: &str, row: &StudyRow) -> Result<PreparedStudy> {
        let fs = &*self.fs;

        let config = load_study_config(fs, row, &self.settings)?;

        if list_subjects(fs, &config)?.is_empty() {
            return Err(AslrunError::NoSubjects(config.root.clone()));
        }

        let launcher = self.preflight(&config)?;

        let version = detect_pipeline_version(fs, &config.pipeline_dir);
        debug!(study = name, version = ?version, "pipeline version");

        let plan = WorkloadPlanner::new(fs, &self.tables).plan(&config, row.module, version.as_ref())?;

        info!(
            study = name,
            root = ?config.root,
            cores = row.cores,
            module = %row.module,
            workload = plan.total_workload(),
            "study prepared"
        );

        Ok(PreparedStudy {
            id,
            name: name.to_string(),
            row: row.clone(),
            config,
            plan: Arc::new(plan),
            launcher,
        })
    }

    /// Prepare every study of the run plan; the first failure aborts the run.
    pub fn prepare_all(&self, run: &RunConfig) -> Result<Vec<PreparedStudy>> {
        run.studies()
            .iter()
            .enumerate()
            .map(|(id, (name, row))| self.prepare_study(id, name, row))
            .collect()
    }

    fn preflight(&self, config: &StudyConfig) -> Result<Launcher> {
        match config.scenario {
            Scenario::LocalUncompiled => {
                let version = detect_interpreter_version(
                    &self.settings.matlab_cmd,
                    self.settings.matlab_version.as_deref(),
                )?;
                let style = invocation_style(version, self.os)?;
                debug!(%version, ?style, "interpreter accepted");
                Ok(Launcher::Uncompiled {
                    matlab_cmd: self.settings.matlab_cmd.clone(),
                    style,
                })
            }
            Scenario::LocalCompiled => {
                let runtime_dir: PathBuf = config
                    .runtime_dir
                    .clone()
                    .ok_or_else(|| AslrunError::RuntimeNotFound(PathBuf::new()))?;
                let inherited: Option<OsString> = std::env::var_os(self.os.library_path_var());
                let runtime = resolve_runtime_env(&*self.fs, &runtime_dir, self.os, inherited)?;
                Ok(Launcher::Compiled {
                    runtime,
                    os: self.os,
                })
            }
        }
    }

    /// Create the marker directories of every study and clear stale locks.
    pub fn initialize_locks(&self, studies: &[PreparedStudy]) -> Result<()> {
        let init = LockDirectoryInitializer::new(&*self.fs);
        for study in studies {
            init.initialize(&study.config, study.row.module)?;
        }
        Ok(())
    }

    /// Start one watcher and `cores` workers per study.
    ///
    /// Every study's watcher is subscribed before any worker starts, so no
    /// early marker is missed and a failed subscription leaves nothing
    /// running. If a worker fails to start, every study launched so far is
    /// stopped before the error is returned. Does not wait for the workers.
    pub async fn launch<B: WorkerBackend>(
        &self,
        studies: Vec<PreparedStudy>,
        backend: &mut B,
        source: &dyn MarkerSource,
        events: mpsc::Sender<RunEvent>,
    ) -> Result<LaunchedRun> {
        let check_interval = Duration::from_millis(self.settings.debt_check_interval_ms);

        let mut subscribed = Vec::with_capacity(studies.len());
        for study in studies {
            let subscription = source.subscribe(&lock_root(&study.plan.root))?;
            subscribed.push((study, subscription));
        }

        let mut run = LaunchedRun::default();
        for (study, subscription) in subscribed {
            let specs = study.worker_specs();
            let debt = Arc::new(WatcherDebt::new(specs.len()));
            let control = StudyControl::new();

            let watcher = DirectoryWatcher::new(
                study.id,
                Arc::clone(&study.plan),
                Arc::clone(&self.tables),
                Arc::clone(&debt),
                Arc::clone(&self.fs),
                events.clone(),
            )
            .with_check_interval(check_interval);
            let watcher = tokio::spawn(watcher.run(subscription));

            info!(study = %study.name, workers = specs.len(), debt = debt.get(), "launching study");
            println!(
                "[aslrun] {}: launching {} worker(s), workload {}",
                study.name,
                specs.len(),
                study.plan.total_workload()
            );

            run.studies.push(LaunchedStudy {
                id: study.id,
                name: study.name,
                plan: study.plan,
                workers: specs.len(),
                debt,
                control: control.clone(),
                watcher,
            });

            for spec in specs {
                let iworker = spec.iworker;
                if let Err(err) = backend.launch(spec, control.subscribe()).await {
                    error!(study = study.id, iworker, error = %err, "worker failed to start");
                    run.abort();
                    return Err(err);
                }
            }
        }

        Ok(run)
    }
}
