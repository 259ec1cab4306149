// src/exec/backend.rs

//! Pluggable worker backend.
//!
//! The orchestrator hands every worker to a `WorkerBackend` instead of
//! spawning processes itself, so tests can swap in a fake that emits
//! `RunEvent`s directly.
//!
//! - `RealWorkerBackend` runs a [`ProcessWorker`] per spec on the tokio
//!   runtime.
//! - Test backends typically record the specs and report completion
//!   without any subprocess.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::engine::{ControlSignal, RunEvent};
use crate::errors::Result;

use super::worker::{ProcessWorker, WorkerSpec, WorkerState};

/// Trait abstracting how workers are run.
pub trait WorkerBackend: Send {
    /// Start one worker. `control` carries the study's pause/resume/stop
    /// signals; the worker reports back through the run's event channel.
    fn launch(
        &mut self,
        spec: WorkerSpec,
        control: broadcast::Receiver<ControlSignal>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production backend: one tokio task per worker subprocess.
pub struct RealWorkerBackend {
    events: mpsc::Sender<RunEvent>,
    handles: Vec<JoinHandle<WorkerState>>,
}

impl RealWorkerBackend {
    pub fn new(events: mpsc::Sender<RunEvent>) -> Self {
        Self {
            events,
            handles: Vec::new(),
        }
    }

    /// Workers launched so far whose task has not completed.
    pub fn running(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }
}

impl WorkerBackend for RealWorkerBackend {
    fn launch(
        &mut self,
        spec: WorkerSpec,
        control: broadcast::Receiver<ControlSignal>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        debug!(study = spec.study, iworker = spec.iworker, "launching worker task");
        let worker = ProcessWorker::new(spec, self.events.clone(), control);
        self.handles.push(tokio::spawn(worker.run()));
        Box::pin(async { Ok(()) })
    }
}
