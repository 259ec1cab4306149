// src/config/study.rs

//! Per-study parameter file (the JSON written by the parameter form).
//!
//! ```json
//! {
//!   "subject_regexp": "^sub-\\d{3}$",
//!   "EXPLOREASL_TYPE": "LOCAL_UNCOMPILED",
//!   "MyPath": "/opt/ExploreASL",
//!   "D": { "ROOT": "/data/study" },
//!   "exclusion": ["sub-013"],
//!   "SESSIONS": ["ASL_1"]
//! }
//! ```
//!
//! Unknown keys are ignored.

use std::path::{Path, PathBuf};

use globset::Glob;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::model::{ConfigSection, StudyRow};
use crate::errors::{AslrunError, Result};
use crate::fs::{canonical_or_self, FileSystem};
use crate::types::Scenario;

/// Session used for ASL when the parameter file lists none.
pub const DEFAULT_SESSION: &str = "ASL_1";

#[derive(Debug, Clone, Deserialize)]
pub struct RawStudyConfig {
    pub subject_regexp: String,

    #[serde(rename = "EXPLOREASL_TYPE")]
    pub exploreasl_type: Scenario,

    /// Pipeline directory: sources (uncompiled) or the compiled launcher.
    #[serde(rename = "MyPath", default)]
    pub my_path: Option<PathBuf>,

    /// Runtime library root for the compiled scenario.
    #[serde(rename = "MCRPath", default)]
    pub mcr_path: Option<PathBuf>,

    #[serde(rename = "D")]
    pub directories: DirectorySection,

    #[serde(default)]
    pub exclusion: Vec<String>,

    #[serde(rename = "SESSIONS", default)]
    pub sessions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectorySection {
    #[serde(rename = "ROOT")]
    pub root: PathBuf,
}

/// Validated study configuration; immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct StudyConfig {
    /// The parameter file this was read from.
    pub source: PathBuf,
    pub root: PathBuf,
    pub subject_pattern: Regex,
    pub scenario: Scenario,
    pub pipeline_dir: PathBuf,
    pub runtime_dir: Option<PathBuf>,
    pub exclusion: Vec<String>,
    pub sessions: Vec<String>,
}

impl StudyConfig {
    /// Validate a raw parameter file read from `source`.
    pub fn from_raw(raw: RawStudyConfig, source: &Path) -> Result<Self> {
        let study_err = |message: String| AslrunError::StudyConfig {
            path: source.to_path_buf(),
            message,
        };

        let subject_pattern = compile_subject_pattern(&raw.subject_regexp)
            .map_err(|e| study_err(format!("invalid subject_regexp: {e}")))?;

        let pipeline_dir = match raw.my_path {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => return Err(study_err("missing required key `MyPath`".to_string())),
        };

        let runtime_dir = match (raw.exploreasl_type, raw.mcr_path) {
            (Scenario::LocalCompiled, Some(p)) if !p.as_os_str().is_empty() => Some(p),
            (Scenario::LocalCompiled, _) => {
                return Err(study_err(
                    "missing required key `MCRPath` for LOCAL_COMPILED".to_string(),
                ));
            }
            (Scenario::LocalUncompiled, p) => p,
        };

        if raw.directories.root.as_os_str().is_empty() {
            return Err(study_err("`D.ROOT` must not be empty".to_string()));
        }

        let sessions = if raw.sessions.is_empty() {
            vec![DEFAULT_SESSION.to_string()]
        } else {
            raw.sessions
        };

        Ok(Self {
            source: source.to_path_buf(),
            root: raw.directories.root,
            subject_pattern,
            scenario: raw.exploreasl_type,
            pipeline_dir,
            runtime_dir,
            exclusion: raw.exclusion,
            sessions,
        })
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclusion.iter().any(|e| e == name)
    }
}

/// Strip `^`/`$` anchors from the user's pattern and compile it so that it
/// must match a whole directory name.
pub fn compile_subject_pattern(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    let mut core = pattern.trim();
    core = core.strip_prefix('^').unwrap_or(core);
    if core.ends_with('$') && !core.ends_with("\\$") {
        core = &core[..core.len() - 1];
    }
    Regex::new(&format!("^(?:{core})$"))
}

/// Locate, parse and check the parameter file of one allocation row.
///
/// Fails when no file is found, the JSON is malformed or lacks required
/// keys, or `D.ROOT` does not resolve to the row's directory.
pub fn load_study_config(
    fs: &dyn FileSystem,
    row: &StudyRow,
    settings: &ConfigSection,
) -> Result<StudyConfig> {
    let source = discover_data_par(fs, row, &settings.data_par_glob)?;
    debug!(study = ?row.path, source = ?source, "loading study configuration");

    let contents = fs.read_to_string(&source).map_err(|e| AslrunError::StudyConfig {
        path: source.clone(),
        message: format!("could not read file: {e}"),
    })?;

    let raw: RawStudyConfig =
        serde_json::from_str(&contents).map_err(|e| AslrunError::StudyConfig {
            path: source.clone(),
            message: e.to_string(),
        })?;

    let mut study = StudyConfig::from_raw(raw, &source)?;

    let configured = canonical_or_self(fs, &study.root);
    let supplied = canonical_or_self(fs, &row.path);
    if configured != supplied {
        return Err(AslrunError::RootMismatch {
            configured: study.root.clone(),
            supplied: row.path.clone(),
        });
    }
    study.root = supplied;

    Ok(study)
}

fn discover_data_par(fs: &dyn FileSystem, row: &StudyRow, glob: &str) -> Result<PathBuf> {
    if let Some(explicit) = &row.data_par {
        let path = if explicit.is_absolute() {
            explicit.clone()
        } else {
            row.path.join(explicit)
        };
        if !fs.is_file(&path) {
            return Err(AslrunError::StudyConfig {
                path,
                message: "configured data_par file does not exist".to_string(),
            });
        }
        return Ok(path);
    }

    let matcher = Glob::new(glob)
        .map_err(|e| AslrunError::ConfigError(format!("invalid data_par_glob {glob:?}: {e}")))?
        .compile_matcher();

    let entries = fs.read_dir(&row.path).map_err(|e| AslrunError::StudyConfig {
        path: row.path.clone(),
        message: format!("study directory is not readable: {e}"),
    })?;

    let mut candidates: Vec<PathBuf> = entries
        .into_iter()
        .filter(|p| fs.is_file(p))
        .filter(|p| p.file_name().is_some_and(|n| matcher.is_match(n)))
        .collect();
    candidates.sort();

    match candidates.len() {
        0 => Err(AslrunError::StudyConfig {
            path: row.path.clone(),
            message: format!("no parameter file matching {glob:?} was found"),
        }),
        1 => Ok(candidates.remove(0)),
        n => {
            warn!(
                study = ?row.path,
                count = n,
                chosen = ?candidates[0],
                "several parameter files found; using the first"
            );
            Ok(candidates.remove(0))
        }
    }
}
