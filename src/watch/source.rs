// src/watch/source.rs

//! Streams of created paths under a directory.
//!
//! The watcher only needs "this path was created" with at-least-once
//! delivery; duplicates are filtered downstream.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::types::WatchBackend;

/// Live subscription; dropping it stops the underlying watcher.
pub struct MarkerSubscription {
    pub events: mpsc::UnboundedReceiver<PathBuf>,
    _guard: Box<dyn Any + Send>,
}

impl MarkerSubscription {
    pub fn new(events: mpsc::UnboundedReceiver<PathBuf>, guard: impl Any + Send) -> Self {
        Self {
            events,
            _guard: Box::new(guard),
        }
    }
}

impl std::fmt::Debug for MarkerSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkerSubscription").finish_non_exhaustive()
    }
}

/// Capability to subscribe to creation events under a root, recursively.
pub trait MarkerSource: Send + Sync {
    fn subscribe(&self, root: &Path) -> Result<MarkerSubscription>;
}

/// Native OS notifications (inotify, FSEvents, ReadDirectoryChangesW).
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifySource;

/// Periodic directory scans, for network shares where native events are
/// unreliable.
#[derive(Debug, Clone, Copy)]
pub struct PollSource {
    interval: Duration,
}

impl PollSource {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

pub fn source_for(backend: WatchBackend, poll_interval: Duration) -> Arc<dyn MarkerSource> {
    match backend {
        WatchBackend::Native => Arc::new(NotifySource),
        WatchBackend::Poll => Arc::new(PollSource::new(poll_interval)),
    }
}

/// Closure called synchronously by notify; forwards created paths.
fn forwarder(tx: mpsc::UnboundedSender<PathBuf>) -> impl Fn(notify::Result<Event>) + Send + 'static {
    move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if !matches!(event.kind, EventKind::Create(_)) {
                return;
            }
            for path in event.paths {
                if tx.send(path).is_err() {
                    // Receiver dropped: the watcher is shutting down.
                    return;
                }
            }
        }
        Err(err) => {
            // No tracing context on notify's thread.
            eprintln!("aslrun: file watch error: {err}");
        }
    }
}

impl MarkerSource for NotifySource {
    fn subscribe(&self, root: &Path) -> Result<MarkerSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(forwarder(tx), Config::default())
            .context("creating native file watcher")?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("watching {root:?}"))?;
        info!("native file watcher started on {:?}", root);
        Ok(MarkerSubscription::new(rx, watcher))
    }
}

impl MarkerSource for PollSource {
    fn subscribe(&self, root: &Path) -> Result<MarkerSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = Config::default().with_poll_interval(self.interval);
        let mut watcher =
            PollWatcher::new(forwarder(tx), config).context("creating polling file watcher")?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("watching {root:?}"))?;
        debug!(interval_ms = self.interval.as_millis() as u64, "polling watcher configured");
        info!("polling file watcher started on {:?}", root);
        Ok(MarkerSubscription::new(rx, watcher))
    }
}
