// src/exec/worker.rs

//! One pipeline subprocess: worker `iworker` of `nworkers` for one study.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::engine::{ControlSignal, RunEvent, StudyId};
use crate::exec::command::Invocation;
use crate::exec::process_tree::{signal_tree, TreeSignal};
use crate::exec::stdout_scan::{mine_errors, CapturedError, ErrorCapture};
use crate::types::PipelineModule;

/// Prefix of the per-worker log files written into the study directory.
pub const WORKER_LOG_PREFIX: &str = "tmp_aslrun_worker_";

/// How long to keep reading stdout after the process exited, in case a
/// descendant still holds the pipe.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub fn worker_log_path(study_dir: &Path, iworker: usize) -> PathBuf {
    study_dir.join(format!("{WORKER_LOG_PREFIX}{iworker}.log"))
}

/// Everything needed to run one worker.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub study: StudyId,
    pub study_dir: PathBuf,
    /// 1-based.
    pub iworker: usize,
    pub nworkers: usize,
    pub modules: Vec<PipelineModule>,
    pub invocation: Invocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Running,
    Paused,
    Finished,
    Failed,
}

struct ExitReport {
    code: i32,
    success: bool,
    stdout: String,
    stderr: String,
}

/// Owns exactly one subprocess and reports on it through `RunEvent`s.
///
/// Whatever happens (spawn failure, non-zero exit, stop request) exactly one
/// terminal event is sent: `WorkerFinished` or `WorkerFailed`.
pub struct ProcessWorker {
    spec: WorkerSpec,
    state: WorkerState,
    events: mpsc::Sender<RunEvent>,
    control: broadcast::Receiver<ControlSignal>,
    control_open: bool,
    pid: Option<u32>,
    log: Option<File>,
}

impl std::fmt::Debug for ProcessWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessWorker")
            .field("study", &self.spec.study)
            .field("iworker", &self.spec.iworker)
            .field("state", &self.state)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl ProcessWorker {
    pub fn new(
        spec: WorkerSpec,
        events: mpsc::Sender<RunEvent>,
        control: broadcast::Receiver<ControlSignal>,
    ) -> Self {
        Self {
            spec,
            state: WorkerState::Created,
            events,
            control,
            control_open: true,
            pid: None,
            log: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Run the subprocess to completion and report the outcome.
    pub async fn run(mut self) -> WorkerState {
        let study = self.spec.study;
        let iworker = self.spec.iworker;

        match self.run_inner().await {
            Ok(report) => {
                let mined = mine_errors(&report.stdout, &self.spec.modules);
                if !mined.is_empty() {
                    warn!(study, iworker, count = mined.len(), "pipeline reported failed iterations");
                    self.emit(RunEvent::StdoutErrors {
                        study,
                        iworker,
                        errors: mined,
                    })
                    .await;
                }

                if report.success {
                    self.state = WorkerState::Finished;
                    info!(study, iworker, "worker finished");
                    self.emit(RunEvent::WorkerFinished { study, iworker }).await;
                } else {
                    self.state = WorkerState::Failed;
                    error!(study, iworker, exit_code = report.code, "worker failed");
                    self.emit(RunEvent::StderrError {
                        study,
                        iworker,
                        stderr: report.stderr,
                    })
                    .await;
                    self.emit(RunEvent::WorkerFailed {
                        study,
                        iworker,
                        code: report.code,
                    })
                    .await;
                }
            }
            Err(err) => {
                self.state = WorkerState::Failed;
                error!(study, iworker, error = %err, "worker execution error");
                self.emit(RunEvent::StderrError {
                    study,
                    iworker,
                    stderr: format!("{err:#}"),
                })
                .await;
                self.emit(RunEvent::WorkerFailed {
                    study,
                    iworker,
                    code: -1,
                })
                .await;
            }
        }

        self.state
    }

    async fn run_inner(&mut self) -> Result<ExitReport> {
        let study = self.spec.study;
        let iworker = self.spec.iworker;

        info!(
            study,
            iworker,
            nworkers = self.spec.nworkers,
            cmd = %self.spec.invocation,
            "starting worker process"
        );

        let mut cmd = self.spec.invocation.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "spawning worker {iworker} for {:?} ({})",
                self.spec.study_dir, self.spec.invocation
            )
        })?;

        self.pid = child.id();
        self.state = WorkerState::Running;
        self.emit(RunEvent::WorkerStarted {
            study,
            iworker,
            pid: self.pid,
        })
        .await;

        self.open_log().await;

        let stdout = child.stdout.take().context("worker stdout was not captured")?;
        let stderr_task = child.stderr.take().map(|s| tokio::spawn(collect_stream(s)));

        let mut lines = BufReader::new(stdout).lines();
        let mut capture = ErrorCapture::new();
        let mut captured = String::new();
        let mut stdout_open = true;

        let status = loop {
            tokio::select! {
                biased;

                line = lines.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => self.handle_line(line, &mut capture, &mut captured).await,
                    Ok(None) => stdout_open = false,
                    Err(err) => {
                        warn!(study, iworker, error = %err, "error reading worker stdout");
                        stdout_open = false;
                    }
                },
                signal = self.control.recv(), if self.control_open => {
                    self.handle_control(signal).await;
                }
                status = child.wait() => {
                    break status.with_context(|| format!("waiting for worker {iworker}"))?;
                }
            }
        };

        while stdout_open {
            match timeout(DRAIN_TIMEOUT, lines.next_line()).await {
                Ok(Ok(Some(line))) => self.handle_line(line, &mut capture, &mut captured).await,
                Ok(_) => stdout_open = false,
                Err(_) => {
                    debug!(study, iworker, "stdout still held open after exit; giving up");
                    stdout_open = false;
                }
            }
        }

        if let Some(block) = capture.finish() {
            self.report_block(&block);
        }
        self.close_log().await;

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        let code = status.code().unwrap_or(-1);
        info!(
            study,
            iworker,
            exit_code = code,
            success = status.success(),
            "worker process exited"
        );

        Ok(ExitReport {
            code,
            success: status.success(),
            stdout: captured,
            stderr,
        })
    }

    async fn handle_line(&mut self, line: String, capture: &mut ErrorCapture, captured: &mut String) {
        debug!(study = self.spec.study, iworker = self.spec.iworker, "stdout: {}", line);

        if let Some(log) = self.log.as_mut() {
            let write = async {
                log.write_all(line.as_bytes()).await?;
                log.write_all(b"\n").await
            };
            if let Err(err) = write.await {
                warn!(iworker = self.spec.iworker, error = %err, "could not write worker log; disabling it");
                self.log = None;
            }
        }

        if let Some(block) = capture.feed(&line) {
            self.report_block(&block);
        }

        captured.push_str(&line);
        captured.push('\n');
    }

    fn report_block(&self, block: &CapturedError) {
        error!(
            study = self.spec.study,
            iworker = self.spec.iworker,
            module = ?block.module,
            subject = ?block.subject,
            run = ?block.run,
            "pipeline error:\n{}",
            block.text()
        );
    }

    async fn handle_control(&mut self, signal: std::result::Result<ControlSignal, RecvError>) {
        let signal = match signal {
            Ok(signal) => signal,
            Err(RecvError::Closed) => {
                self.control_open = false;
                return;
            }
            Err(RecvError::Lagged(n)) => {
                warn!(iworker = self.spec.iworker, skipped = n, "missed control signals");
                return;
            }
        };

        let Some(pid) = self.pid else {
            return;
        };

        match (signal, self.state) {
            (ControlSignal::Pause, WorkerState::Running) => {
                signal_tree_async(pid, TreeSignal::Suspend).await;
                self.state = WorkerState::Paused;
                info!(study = self.spec.study, iworker = self.spec.iworker, "worker paused");
            }
            (ControlSignal::Resume, WorkerState::Paused) => {
                signal_tree_async(pid, TreeSignal::Resume).await;
                self.state = WorkerState::Running;
                info!(study = self.spec.study, iworker = self.spec.iworker, "worker resumed");
            }
            (ControlSignal::Stop, state) => {
                if state == WorkerState::Paused {
                    // Stopped processes don't act on a kill until continued on some platforms.
                    signal_tree_async(pid, TreeSignal::Resume).await;
                    self.state = WorkerState::Running;
                }
                let killed = signal_tree_async(pid, TreeSignal::Kill).await;
                info!(study = self.spec.study, iworker = self.spec.iworker, killed, "worker stop requested");
            }
            (signal, state) => {
                debug!(iworker = self.spec.iworker, ?signal, ?state, "control signal ignored in this state");
            }
        }
    }

    async fn open_log(&mut self) {
        let path = worker_log_path(&self.spec.study_dir, self.spec.iworker);
        match File::create(&path).await {
            Ok(file) => self.log = Some(file),
            Err(err) => warn!(path = ?path, error = %err, "could not create worker log"),
        }
    }

    async fn close_log(&mut self) {
        if let Some(mut log) = self.log.take() {
            if let Err(err) = log.flush().await {
                warn!(iworker = self.spec.iworker, error = %err, "could not flush worker log");
            }
        }
    }

    async fn emit(&self, event: RunEvent) {
        if let Err(err) = self.events.send(event).await {
            warn!(iworker = self.spec.iworker, "failed to send worker event: {err}");
        }
    }
}

async fn signal_tree_async(pid: u32, signal: TreeSignal) -> usize {
    tokio::task::spawn_blocking(move || signal_tree(pid, signal))
        .await
        .unwrap_or(0)
}

async fn collect_stream<R: AsyncRead + Unpin>(mut stream: R) -> String {
    let mut buf = Vec::new();
    if let Err(err) = stream.read_to_end(&mut buf).await {
        debug!(error = %err, "error reading worker stderr");
    }
    String::from_utf8_lossy(&buf).into_owned()
}
