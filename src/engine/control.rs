// src/engine/control.rs

use tokio::sync::broadcast;
use tracing::debug;

use crate::engine::ControlSignal;

/// Pause / resume / stop for the workers of one study.
///
/// Every worker of the study subscribes before it starts; a signal reaches
/// all of them and no other study's workers.
#[derive(Debug, Clone)]
pub struct StudyControl {
    tx: broadcast::Sender<ControlSignal>,
}

impl Default for StudyControl {
    fn default() -> Self {
        Self::new()
    }
}

impl StudyControl {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(16);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlSignal> {
        self.tx.subscribe()
    }

    /// Send `signal`; returns how many workers are listening.
    pub fn send(&self, signal: ControlSignal) -> usize {
        match self.tx.send(signal) {
            Ok(n) => n,
            Err(_) => {
                debug!(?signal, "no running workers to signal");
                0
            }
        }
    }

    pub fn pause(&self) -> usize {
        self.send(ControlSignal::Pause)
    }

    pub fn resume(&self) -> usize {
        self.send(ControlSignal::Resume)
    }

    pub fn stop(&self) -> usize {
        self.send(ControlSignal::Stop)
    }
}

/// Parse an interactive control line: `pause <study>`, `resume <study>` or
/// `stop <study>`. Study names may contain spaces.
pub fn parse_control_line(line: &str) -> Option<(ControlSignal, String)> {
    let line = line.trim();
    let (verb, study) = line.split_once(char::is_whitespace)?;
    let signal = match verb.to_ascii_lowercase().as_str() {
        "pause" => ControlSignal::Pause,
        "resume" => ControlSignal::Resume,
        "stop" => ControlSignal::Stop,
        _ => return None,
    };
    let study = study.trim();
    if study.is_empty() {
        return None;
    }
    Some((signal, study.to_string()))
}
