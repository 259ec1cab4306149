// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::types::{ModuleSelection, WatchBackend};

/// Run plan as read from a TOML file.
///
/// ```toml
/// [config]
/// matlab_cmd = "matlab"
/// matlab_version = "R2021a"
///
/// [study.alpha]
/// path = "/data/alpha"
/// cores = 2
/// module = "both"
/// ```
///
/// This is the unvalidated form; convert it with `RunConfig::try_from`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRunConfig {
    /// Global behaviour config from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// One allocation row per `[study.<name>]` table.
    #[serde(default)]
    pub study: BTreeMap<String, StudyRow>,
}

/// Validated run plan.
///
/// Only constructed through `TryFrom<RawRunConfig>` (see `validate.rs`), so
/// holders can rely on the allocation invariants.
#[derive(Debug, Clone)]
pub struct RunConfig {
    config: ConfigSection,
    study: BTreeMap<String, StudyRow>,
}

impl RunConfig {
    pub(crate) fn new_unchecked(config: ConfigSection, study: BTreeMap<String, StudyRow>) -> Self {
        Self { config, study }
    }

    pub fn config(&self) -> &ConfigSection {
        &self.config
    }

    pub fn studies(&self) -> &BTreeMap<String, StudyRow> {
        &self.study
    }

    /// Sum of allocated cores across every row.
    pub fn total_cores(&self) -> usize {
        self.study.values().map(|row| row.cores).sum()
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Interpreter command for the uncompiled scenario.
    #[serde(default = "default_matlab_cmd")]
    pub matlab_cmd: String,

    /// Interpreter release such as `"R2021a"`.
    ///
    /// If `None`, the release is inferred from the resolved interpreter path.
    #[serde(default)]
    pub matlab_version: Option<String>,

    /// Optional JSON file replacing the built-in marker tables.
    #[serde(default)]
    pub marker_tables: Option<PathBuf>,

    /// Glob used to discover a study's parameter file inside its directory.
    #[serde(default = "default_data_par_glob")]
    pub data_par_glob: String,

    #[serde(default)]
    pub watch_backend: WatchBackend,

    /// Scan period of the poll backend.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How often a directory watcher checks whether its workers are done.
    #[serde(default = "default_debt_check_interval_ms")]
    pub debt_check_interval_ms: u64,
}

fn default_matlab_cmd() -> String {
    "matlab".to_string()
}

fn default_data_par_glob() -> String {
    "*Par*.json".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_debt_check_interval_ms() -> u64 {
    250
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            matlab_cmd: default_matlab_cmd(),
            matlab_version: None,
            marker_tables: None,
            data_par_glob: default_data_par_glob(),
            watch_backend: WatchBackend::default(),
            poll_interval_ms: default_poll_interval_ms(),
            debt_check_interval_ms: default_debt_check_interval_ms(),
        }
    }
}

/// `[study.<name>]` section: one allocation row.
#[derive(Debug, Clone, Deserialize)]
pub struct StudyRow {
    /// Analysis directory; must equal `D.ROOT` in the study's parameter file.
    pub path: PathBuf,

    /// Number of cores (one worker process per core).
    pub cores: usize,

    pub module: ModuleSelection,

    /// Explicit parameter file, relative to `path` unless absolute.
    ///
    /// If `None`, `[config].data_par_glob` is used to discover it.
    #[serde(default)]
    pub data_par: Option<PathBuf>,
}
