use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use aslrun::engine::{ControlSignal, RunEvent};
use aslrun::errors::Result;
use aslrun::exec::{WorkerBackend, WorkerSpec};
use tokio::sync::{broadcast, mpsc};

/// What a fake worker reports after starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeOutcome {
    Finish,
    Fail(i32),
    /// Nothing; the worker reports `WorkerFailed { code: -9 }` only once a
    /// `Stop` arrives on its control channel.
    WaitForStop,
}

/// A fake backend that:
/// - records which workers were launched
/// - reports `WorkerStarted` and then the configured outcome, without
///   spawning any process.
pub struct FakeWorkerBackend {
    events: mpsc::Sender<RunEvent>,
    outcome: FakeOutcome,
    launched: Arc<Mutex<Vec<WorkerSpec>>>,
    signals: Arc<Mutex<Vec<(usize, ControlSignal)>>>,
}

impl FakeWorkerBackend {
    pub fn new(events: mpsc::Sender<RunEvent>, outcome: FakeOutcome) -> Self {
        Self {
            events,
            outcome,
            launched: Arc::new(Mutex::new(Vec::new())),
            signals: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn launched(&self) -> Arc<Mutex<Vec<WorkerSpec>>> {
        Arc::clone(&self.launched)
    }

    /// Control signals received, as `(iworker, signal)`.
    pub fn signals(&self) -> Arc<Mutex<Vec<(usize, ControlSignal)>>> {
        Arc::clone(&self.signals)
    }
}

impl WorkerBackend for FakeWorkerBackend {
    fn launch(
        &mut self,
        spec: WorkerSpec,
        mut control: broadcast::Receiver<ControlSignal>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.launched.lock().unwrap().push(spec.clone());

        let tx = self.events.clone();
        let outcome = self.outcome;
        let signals = Arc::clone(&self.signals);

        tokio::spawn(async move {
            let (study, iworker) = (spec.study, spec.iworker);
            let _ = tx
                .send(RunEvent::WorkerStarted {
                    study,
                    iworker,
                    pid: None,
                })
                .await;

            let terminal = match outcome {
                FakeOutcome::Finish => RunEvent::WorkerFinished { study, iworker },
                FakeOutcome::Fail(code) => RunEvent::WorkerFailed {
                    study,
                    iworker,
                    code,
                },
                FakeOutcome::WaitForStop => loop {
                    match control.recv().await {
                        Ok(signal) => {
                            signals.lock().unwrap().push((iworker, signal));
                            if signal == ControlSignal::Stop {
                                break RunEvent::WorkerFailed {
                                    study,
                                    iworker,
                                    code: -9,
                                };
                            }
                        }
                        Err(_) => return,
                    }
                },
            };
            let _ = tx.send(terminal).await;
        });

        Box::pin(async { Ok(()) })
    }
}
