// src/watch/debt.rs

use std::sync::atomic::{AtomicI64, Ordering};

use tracing::warn;

/// Outstanding terminal notifications of one study's workers.
///
/// Starts at `-workers` and moves up by exactly one per finished or failed
/// worker. It never goes above zero.
#[derive(Debug)]
pub struct WatcherDebt {
    value: AtomicI64,
    workers: usize,
}

impl WatcherDebt {
    pub fn new(workers: usize) -> Self {
        let initial = i64::try_from(workers).unwrap_or(i64::MAX);
        Self {
            value: AtomicI64::new(-initial),
            workers,
        }
    }

    /// Number of workers this debt was created for.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Record one worker's terminal notification; returns the new value.
    pub fn repay(&self) -> i64 {
        match self
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| (v < 0).then_some(v + 1))
        {
            Ok(previous) => previous + 1,
            Err(current) => {
                warn!(workers = self.workers, "debt repaid more often than workers were launched");
                current
            }
        }
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn is_repaid(&self) -> bool {
        self.get() >= 0
    }

    /// At least one worker has reported.
    pub fn is_draining(&self) -> bool {
        let initial = -i64::try_from(self.workers).unwrap_or(i64::MAX);
        self.get() > initial
    }
}
