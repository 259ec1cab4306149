use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use aslrun::watch::{MarkerSource, MarkerSubscription};
use tokio::sync::mpsc;

/// A `MarkerSource` driven by the test: paths passed to [`emit`] are
/// delivered to every subscription whose root contains them.
///
/// [`emit`]: ChannelMarkerSource::emit
#[derive(Clone, Default)]
pub struct ChannelMarkerSource {
    subscribers: Arc<Mutex<Vec<(PathBuf, mpsc::UnboundedSender<PathBuf>)>>>,
}

impl ChannelMarkerSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Roots subscribed so far.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|(root, _)| root.clone())
            .collect()
    }

    /// Returns how many subscriptions received the path.
    pub fn emit(&self, path: impl AsRef<Path>) -> usize {
        let path = path.as_ref();
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|(root, _)| path.starts_with(root))
            .filter(|(_, tx)| tx.send(path.to_path_buf()).is_ok())
            .count()
    }
}

impl MarkerSource for ChannelMarkerSource {
    fn subscribe(&self, root: &Path) -> anyhow::Result<MarkerSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap()
            .push((root.to_path_buf(), tx));
        Ok(MarkerSubscription::new(rx, ()))
    }
}
