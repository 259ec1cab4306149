// src/plan/tables.rs

//! Marker translation tables.
//!
//! Each pipeline version range has its own ordered list of STATUS files per
//! module, with a human-readable description and a workload weight. The
//! tables are data owned by the pipeline, so they live in a JSON asset that
//! can be replaced via `[config].marker_tables`.

use std::path::Path;

use semver::Version;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::{AslrunError, Result};
use crate::fs::FileSystem;
use crate::types::PipelineModule;

const BUILTIN_TABLES: &str = include_str!("assets/marker_tables.json");

#[derive(Debug, Clone, Deserialize)]
struct RawTables {
    variants: Vec<RawVariant>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawVariant {
    name: String,
    #[serde(default)]
    min_version: Option<String>,
    #[serde(default)]
    max_version: Option<String>,
    #[serde(default)]
    flair_markers_always_written: bool,
    modules: RawModules,
}

#[derive(Debug, Clone, Deserialize)]
struct RawModules {
    #[serde(rename = "Structural", default)]
    structural: Vec<MarkerEntry>,
    #[serde(rename = "ASL", default)]
    asl: Vec<MarkerEntry>,
    #[serde(rename = "Population", default)]
    population: Vec<MarkerEntry>,
}

/// One expected STATUS file of a module.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MarkerEntry {
    pub marker: String,
    pub description: String,
    pub weight: u32,
    /// Only written when the subject has a FLAIR scan.
    #[serde(default)]
    pub requires_flair: bool,
}

#[derive(Debug, Clone)]
struct Variant {
    name: String,
    min_version: Option<Version>,
    max_version: Option<Version>,
    flair_markers_always_written: bool,
    structural: Vec<MarkerEntry>,
    asl: Vec<MarkerEntry>,
    population: Vec<MarkerEntry>,
}

impl Variant {
    fn contains(&self, version: &Version) -> bool {
        let above_min = self.min_version.as_ref().is_none_or(|min| version >= min);
        let below_max = self.max_version.as_ref().is_none_or(|max| version < max);
        above_min && below_max
    }

    fn entries(&self, module: PipelineModule) -> &[MarkerEntry] {
        match module {
            PipelineModule::Structural => &self.structural,
            PipelineModule::Asl => &self.asl,
            PipelineModule::Population => &self.population,
        }
    }
}

/// All table variants, ordered oldest to newest.
#[derive(Debug, Clone)]
pub struct MarkerTables {
    variants: Vec<Variant>,
}

impl MarkerTables {
    /// Tables shipped with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_TABLES)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawTables = serde_json::from_str(json)?;
        if raw.variants.is_empty() {
            return Err(AslrunError::ConfigError(
                "marker tables must define at least one variant".to_string(),
            ));
        }

        let mut variants = Vec::with_capacity(raw.variants.len());
        for v in raw.variants {
            let min_version = parse_bound(&v.name, v.min_version.as_deref())?;
            let max_version = parse_bound(&v.name, v.max_version.as_deref())?;
            let modules = v.modules;
            for (module, entries) in [
                (PipelineModule::Structural, &modules.structural),
                (PipelineModule::Asl, &modules.asl),
                (PipelineModule::Population, &modules.population),
            ] {
                if let Some(bad) = entries.iter().find(|e| e.weight == 0) {
                    return Err(AslrunError::ConfigError(format!(
                        "marker table '{}' gives {} marker {} a zero weight",
                        v.name, module, bad.marker
                    )));
                }
            }
            variants.push(Variant {
                name: v.name,
                min_version,
                max_version,
                flair_markers_always_written: v.flair_markers_always_written,
                structural: modules.structural,
                asl: modules.asl,
                population: modules.population,
            });
        }

        Ok(Self { variants })
    }

    /// Built-in tables, or the JSON file at `path` when one is configured.
    pub fn load(fs: &dyn FileSystem, path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                debug!(path = ?p, "loading marker tables");
                let json = fs.read_to_string(p)?;
                Self::from_json(&json)
            }
            None => Self::builtin(),
        }
    }

    fn variant_for(&self, version: Option<&Version>) -> &Variant {
        // `from_json` guarantees at least one variant.
        let newest = &self.variants[self.variants.len() - 1];
        let Some(version) = version else {
            return newest;
        };
        match self.variants.iter().find(|v| v.contains(version)) {
            Some(v) => v,
            None => {
                warn!(%version, variant = %newest.name, "no marker table covers this pipeline version; using the newest");
                newest
            }
        }
    }

    /// Concrete table for one module.
    ///
    /// `version = None` selects the newest variant. FLAIR-dependent markers
    /// are dropped when `flair_present` is false, unless the variant's
    /// pipeline writes them regardless.
    pub fn select(
        &self,
        module: PipelineModule,
        version: Option<&Version>,
        flair_present: bool,
    ) -> MarkerTable {
        let variant = self.variant_for(version);
        let keep_flair = flair_present || variant.flair_markers_always_written;
        let entries = variant
            .entries(module)
            .iter()
            .filter(|e| keep_flair || !e.requires_flair)
            .cloned()
            .collect();
        MarkerTable {
            module,
            variant: variant.name.clone(),
            entries,
        }
    }
}

fn parse_bound(variant: &str, bound: Option<&str>) -> Result<Option<Version>> {
    bound
        .map(|s| {
            Version::parse(s).map_err(|e| {
                AslrunError::ConfigError(format!(
                    "marker table '{variant}' has an invalid version bound {s:?}: {e}"
                ))
            })
        })
        .transpose()
}

/// Ordered STATUS files of one module for one pipeline version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerTable {
    module: PipelineModule,
    variant: String,
    entries: Vec<MarkerEntry>,
}

impl MarkerTable {
    pub fn module(&self) -> PipelineModule {
        self.module
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }

    pub fn entries(&self) -> &[MarkerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, marker: &str) -> Option<&MarkerEntry> {
        self.entries.iter().find(|e| e.marker == marker)
    }

    /// Canonical step order of `marker`.
    pub fn position(&self, marker: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.marker == marker)
    }

    pub fn describe(&self, marker: &str) -> Option<&str> {
        self.get(marker).map(|e| e.description.as_str())
    }
}
