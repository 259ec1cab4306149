use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// One ExploreASL processing module, as it appears in lock paths and in the
/// pipeline's stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipelineModule {
    Structural,
    Asl,
    Population,
}

impl PipelineModule {
    pub const ALL: [PipelineModule; 3] = [
        PipelineModule::Structural,
        PipelineModule::Asl,
        PipelineModule::Population,
    ];

    /// Directory name used by the pipeline under `<root>/lock`.
    pub fn dir_name(self) -> &'static str {
        match self {
            PipelineModule::Structural => "xASL_module_Structural",
            PipelineModule::Asl => "xASL_module_ASL",
            PipelineModule::Population => "xASL_module_Population",
        }
    }

    /// Short label, also the suffix of [`dir_name`](Self::dir_name).
    pub fn label(self) -> &'static str {
        match self {
            PipelineModule::Structural => "Structural",
            PipelineModule::Asl => "ASL",
            PipelineModule::Population => "Population",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        PipelineModule::ALL
            .into_iter()
            .find(|m| m.label().eq_ignore_ascii_case(label))
    }

    /// Whether marker directories for this module are nested per subject.
    pub fn is_per_subject(self) -> bool {
        !matches!(self, PipelineModule::Population)
    }
}

impl fmt::Display for PipelineModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Module selection of one allocation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleSelection {
    Structural,
    Asl,
    Both,
    Population,
}

impl ModuleSelection {
    pub fn modules(self) -> Vec<PipelineModule> {
        match self {
            ModuleSelection::Structural => vec![PipelineModule::Structural],
            ModuleSelection::Asl => vec![PipelineModule::Asl],
            ModuleSelection::Both => vec![PipelineModule::Structural, PipelineModule::Asl],
            ModuleSelection::Population => vec![PipelineModule::Population],
        }
    }

    /// `ProcessModules` vector passed to the pipeline: structural, ASL, population.
    pub fn process_vector(self) -> [u8; 3] {
        match self {
            ModuleSelection::Structural => [1, 0, 0],
            ModuleSelection::Asl => [0, 1, 0],
            ModuleSelection::Both => [1, 1, 0],
            ModuleSelection::Population => [0, 0, 1],
        }
    }

    /// MATLAB literal for [`process_vector`](Self::process_vector), e.g. `[1 1 0]`.
    pub fn vector_literal(self) -> String {
        let [a, b, c] = self.process_vector();
        format!("[{a} {b} {c}]")
    }
}

impl FromStr for ModuleSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "structural" => Ok(ModuleSelection::Structural),
            "asl" => Ok(ModuleSelection::Asl),
            "both" => Ok(ModuleSelection::Both),
            "population" => Ok(ModuleSelection::Population),
            other => Err(format!(
                "invalid module: {other} (expected \"structural\", \"asl\", \"both\" or \"population\")"
            )),
        }
    }
}

impl fmt::Display for ModuleSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleSelection::Structural => "structural",
            ModuleSelection::Asl => "asl",
            ModuleSelection::Both => "both",
            ModuleSelection::Population => "population",
        };
        f.write_str(s)
    }
}

/// How the pipeline is invoked for a study.
///
/// - `LocalUncompiled`: a MATLAB session runs the pipeline's `.m` sources.
/// - `LocalCompiled`: a compiled launcher runs against a bundled runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Scenario {
    #[serde(rename = "LOCAL_UNCOMPILED")]
    LocalUncompiled,
    #[serde(rename = "LOCAL_COMPILED")]
    LocalCompiled,
}

/// Backend used to observe STATUS file creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchBackend {
    /// Native OS file events (inotify, FSEvents, ReadDirectoryChangesW).
    #[default]
    Native,
    /// Periodic directory scans; slower but works on network shares.
    Poll,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scenario::LocalUncompiled => f.write_str("LOCAL_UNCOMPILED"),
            Scenario::LocalCompiled => f.write_str("LOCAL_COMPILED"),
        }
    }
}
