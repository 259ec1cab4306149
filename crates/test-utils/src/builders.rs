#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use aslrun::config::{validate_with_cores, ConfigSection, RawRunConfig, RunConfig, StudyRow};
use aslrun::errors::Result;
use aslrun::types::ModuleSelection;
use serde_json::{json, Value};

/// Builder for `RunConfig` to simplify test setup.
pub struct RunConfigBuilder {
    config: RawRunConfig,
}

impl RunConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RawRunConfig {
                config: ConfigSection::default(),
                study: BTreeMap::new(),
            },
        }
    }

    pub fn with_study(mut self, name: &str, row: StudyRow) -> Self {
        self.config.study.insert(name.to_string(), row);
        self
    }

    pub fn with_matlab_version(mut self, version: &str) -> Self {
        self.config.config.matlab_version = Some(version.to_string());
        self
    }

    pub fn with_debt_check_interval_ms(mut self, ms: u64) -> Self {
        self.config.config.debt_check_interval_ms = ms;
        self
    }

    pub fn raw(self) -> RawRunConfig {
        self.config
    }

    /// Validate as if the host had `logical_cores` CPUs.
    pub fn build_with_cores(self, logical_cores: usize) -> Result<RunConfig> {
        validate_with_cores(self.config, logical_cores)
    }

    pub fn build(self) -> RunConfig {
        self.build_with_cores(64)
            .expect("Failed to build valid run config from builder")
    }
}

impl Default for RunConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `StudyRow`.
pub struct StudyRowBuilder {
    row: StudyRow,
}

impl StudyRowBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            row: StudyRow {
                path: path.into(),
                cores: 1,
                module: ModuleSelection::Structural,
                data_par: None,
            },
        }
    }

    pub fn cores(mut self, cores: usize) -> Self {
        self.row.cores = cores;
        self
    }

    pub fn module(mut self, module: ModuleSelection) -> Self {
        self.row.module = module;
        self
    }

    pub fn data_par(mut self, path: impl Into<PathBuf>) -> Self {
        self.row.data_par = Some(path.into());
        self
    }

    pub fn build(self) -> StudyRow {
        self.row
    }
}

/// Builder for a study's JSON parameter file.
pub struct DataParBuilder {
    value: Value,
}

impl DataParBuilder {
    /// Uncompiled scenario rooted at `root`, subjects `sub-\d+`.
    pub fn new(root: &Path) -> Self {
        Self {
            value: json!({
                "subject_regexp": "^sub-\\d+$",
                "EXPLOREASL_TYPE": "LOCAL_UNCOMPILED",
                "MyPath": "/opt/ExploreASL",
                "D": { "ROOT": root.to_string_lossy() },
                "exclusion": [],
            }),
        }
    }

    pub fn subject_regexp(self, pattern: &str) -> Self {
        self.set("subject_regexp", json!(pattern))
    }

    pub fn compiled(self, mcr_path: &Path) -> Self {
        self.set("EXPLOREASL_TYPE", json!("LOCAL_COMPILED"))
            .set("MCRPath", json!(mcr_path.to_string_lossy()))
    }

    pub fn my_path(self, path: &Path) -> Self {
        self.set("MyPath", json!(path.to_string_lossy()))
    }

    pub fn exclusion(self, names: &[&str]) -> Self {
        self.set("exclusion", json!(names))
    }

    pub fn sessions(self, sessions: &[&str]) -> Self {
        self.set("SESSIONS", json!(sessions))
    }

    pub fn remove(mut self, key: &str) -> Self {
        if let Some(map) = self.value.as_object_mut() {
            map.remove(key);
        }
        self
    }

    pub fn set(mut self, key: &str, value: Value) -> Self {
        if let Some(map) = self.value.as_object_mut() {
            map.insert(key.to_string(), value);
        }
        self
    }

    pub fn build(self) -> String {
        self.value.to_string()
    }
}
