// src/exec/stdout_scan.rs

//! Error detection in the pipeline's stdout.
//!
//! The pipeline keeps going after a failed iteration, so a zero exit code
//! does not mean every subject succeeded. Failures show up on stdout as:
//!
//! ```text
//! Processing sub-003, ASL_1
//! ERROR in xASL_module_ASL for sub-003: M0 image missing
//!   ...stack lines...
//! ----------------------------------------
//! ```
//!
//! [`ErrorCapture`] follows those blocks while the process runs;
//! [`mine_errors`] re-scans the whole output once it has exited.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::PipelineModule;

/// Lines collected per block before it is force-closed.
pub const MAX_ERROR_LINES: usize = 50;

static ERROR_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*ERROR in xASL_module_(Structural|ASL|Population)\b").expect("static regex")
});

static ERROR_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*-{10,}\s*$").expect("static regex"));

static TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Processing\s+(?P<subject>[^\s,]+)(?:,\s*(?P<run>\S+))?").expect("static regex")
});

static MINED: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    PipelineModule::ALL.map(|module| {
        Regex::new(&format!(
            r"(?m)^\s*ERROR in {} for (?P<subject>[^\s:]+):[ \t]*(?P<message>.*?)\s*$",
            module.dir_name()
        ))
        .expect("static regex")
    })
});

/// One error block seen while streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedError {
    pub module: Option<PipelineModule>,
    pub subject: Option<String>,
    pub run: Option<String>,
    pub lines: Vec<String>,
}

impl CapturedError {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

#[derive(Debug)]
enum CaptureState {
    Idle,
    Collecting(CapturedError),
}

/// Two-state scanner fed one stdout line at a time.
#[derive(Debug)]
pub struct ErrorCapture {
    state: CaptureState,
    subject: Option<String>,
    run: Option<String>,
}

impl Default for ErrorCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorCapture {
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            subject: None,
            run: None,
        }
    }

    pub fn is_collecting(&self) -> bool {
        matches!(self.state, CaptureState::Collecting(_))
    }

    /// Feed one line; returns a block when it closes.
    pub fn feed(&mut self, line: &str) -> Option<CapturedError> {
        match &mut self.state {
            CaptureState::Idle => {
                if let Some(caps) = TARGET.captures(line) {
                    self.subject = caps.name("subject").map(|m| m.as_str().to_string());
                    self.run = caps.name("run").map(|m| m.as_str().to_string());
                    return None;
                }
                if let Some(caps) = ERROR_START.captures(line) {
                    let module = caps.get(1).and_then(|m| PipelineModule::from_label(m.as_str()));
                    self.state = CaptureState::Collecting(CapturedError {
                        module,
                        subject: self.subject.clone(),
                        run: self.run.clone(),
                        lines: vec![line.to_string()],
                    });
                }
                None
            }
            CaptureState::Collecting(block) => {
                if ERROR_END.is_match(line) {
                    return self.close();
                }
                block.lines.push(line.to_string());
                if block.lines.len() > MAX_ERROR_LINES {
                    return self.close();
                }
                None
            }
        }
    }

    /// Flush a block left open at end of stream.
    pub fn finish(&mut self) -> Option<CapturedError> {
        self.close()
    }

    fn close(&mut self) -> Option<CapturedError> {
        match std::mem::replace(&mut self.state, CaptureState::Idle) {
            CaptureState::Collecting(block) => Some(block),
            CaptureState::Idle => None,
        }
    }
}

/// A failed iteration reported on stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectError {
    pub module: PipelineModule,
    pub subject: String,
    pub message: String,
}

/// Extract (subject, message) pairs for the given modules from a complete
/// stdout capture.
pub fn mine_errors(stdout: &str, modules: &[PipelineModule]) -> Vec<SubjectError> {
    let mut errors = Vec::new();
    for module in modules {
        let idx = PipelineModule::ALL
            .iter()
            .position(|m| m == module)
            .unwrap_or_default();
        for caps in MINED[idx].captures_iter(stdout) {
            let (Some(subject), Some(message)) = (caps.name("subject"), caps.name("message"))
            else {
                continue;
            };
            errors.push(SubjectError {
                module: *module,
                subject: subject.as_str().to_string(),
                message: message.as_str().to_string(),
            });
        }
    }
    errors
}
