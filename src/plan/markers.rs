// src/plan/markers.rs

//! Shape of the STATUS-file tree under `<study>/lock`.
//!
//! ```text
//! lock/xASL_module_Structural/<subject>/xASL_module_Structural/010_LinearReg_T1w2MNI.status
//! lock/xASL_module_ASL/<subject>/xASL_module_ASL_<session>/020_RealignASL.status
//! lock/xASL_module_Population/xASL_module_Population/010_CreatePopulationTemplates.status
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::types::PipelineModule;
use crate::watch::path_utils::relative_str;

pub const LOCK_DIR: &str = "lock";
pub const MARKER_EXTENSION: &str = ".status";

/// Directory the pipeline creates inside a marker directory when a module
/// starts on it; leftovers come from interrupted runs.
pub const STALE_LOCK_DIR: &str = "locked";

static MODULE_DIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^xASL_module_(Structural|ASL|Population)(?:_(.+))?$").expect("static regex")
});

pub fn lock_root(study_root: &Path) -> PathBuf {
    study_root.join(LOCK_DIR)
}

/// Which marker directory a STATUS file belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerLocation {
    pub module: PipelineModule,
    pub subject: Option<String>,
    pub session: Option<String>,
}

impl MarkerLocation {
    pub fn population() -> Self {
        Self {
            module: PipelineModule::Population,
            subject: None,
            session: None,
        }
    }

    pub fn structural(subject: &str) -> Self {
        Self {
            module: PipelineModule::Structural,
            subject: Some(subject.to_string()),
            session: None,
        }
    }

    pub fn asl(subject: &str, session: &str) -> Self {
        Self {
            module: PipelineModule::Asl,
            subject: Some(subject.to_string()),
            session: Some(session.to_string()),
        }
    }

    /// Absolute marker directory for this location.
    pub fn dir(&self, study_root: &Path) -> PathBuf {
        let module_dir = self.module.dir_name();
        let base = lock_root(study_root).join(module_dir);
        match (&self.subject, &self.session) {
            (None, _) => base.join(module_dir),
            (Some(subject), None) => base.join(subject).join(module_dir),
            (Some(subject), Some(session)) => {
                base.join(subject).join(format!("{module_dir}_{session}"))
            }
        }
    }

    pub fn marker_path(&self, study_root: &Path, marker: &str) -> PathBuf {
        self.dir(study_root).join(marker)
    }
}

impl fmt::Display for MarkerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.subject, &self.session) {
            (Some(subject), Some(session)) => write!(f, "{subject}, {session}"),
            (Some(subject), None) => f.write_str(subject),
            (None, _) => f.write_str("population"),
        }
    }
}

/// Classification of a path observed under the lock tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEntry {
    ModuleRoot(PipelineModule),
    SubjectDir {
        module: PipelineModule,
        subject: String,
    },
    MarkerDir(MarkerLocation),
    /// `<marker-dir>/locked`: a worker has begun this module here.
    ModuleStarted(MarkerLocation),
    MarkerFile {
        location: MarkerLocation,
        marker: String,
    },
}

fn parse_module_dir(name: &str) -> Option<(PipelineModule, Option<String>)> {
    let caps = MODULE_DIR.captures(name)?;
    let module = PipelineModule::from_label(caps.get(1)?.as_str())?;
    let suffix = caps.get(2).map(|m| m.as_str().to_string());
    Some((module, suffix))
}

/// Classify `path` relative to `lock_root`.
///
/// Returns `None` for anything outside the known shape, including paths
/// inside a `locked` directory and non-`.status` files.
pub fn classify(lock_root: &Path, path: &Path) -> Option<LockEntry> {
    let rel = relative_str(lock_root, path)?;
    let parts: Vec<&str> = rel.split('/').filter(|p| !p.is_empty()).collect();

    if parts.is_empty() {
        return None;
    }
    if let Some(pos) = parts.iter().position(|p| *p == STALE_LOCK_DIR) {
        if pos + 1 != parts.len() {
            return None;
        }
        return match classify(lock_root, path.parent()?)? {
            LockEntry::MarkerDir(location) => Some(LockEntry::ModuleStarted(location)),
            _ => None,
        };
    }

    let (module, suffix) = parse_module_dir(parts[0])?;
    if suffix.is_some() {
        return None;
    }
    if parts.len() == 1 {
        return Some(LockEntry::ModuleRoot(module));
    }

    if !module.is_per_subject() {
        let (inner, inner_suffix) = parse_module_dir(parts[1])?;
        if inner != module || inner_suffix.is_some() {
            return None;
        }
        return match parts.len() {
            2 => Some(LockEntry::MarkerDir(MarkerLocation::population())),
            3 if parts[2].ends_with(MARKER_EXTENSION) => Some(LockEntry::MarkerFile {
                location: MarkerLocation::population(),
                marker: parts[2].to_string(),
            }),
            _ => None,
        };
    }

    let subject = parts[1].to_string();
    if parts.len() == 2 {
        return Some(LockEntry::SubjectDir { module, subject });
    }

    let (inner, session) = parse_module_dir(parts[2])?;
    if inner != module {
        return None;
    }
    // Structural directories never carry a session suffix; ASL ones always do.
    if (module == PipelineModule::Asl) != session.is_some() {
        return None;
    }
    let location = MarkerLocation {
        module,
        subject: Some(subject),
        session,
    };

    match parts.len() {
        3 => Some(LockEntry::MarkerDir(location)),
        4 if parts[3].ends_with(MARKER_EXTENSION) => Some(LockEntry::MarkerFile {
            location,
            marker: parts[3].to_string(),
        }),
        _ => None,
    }
}
