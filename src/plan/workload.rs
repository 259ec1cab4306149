// src/plan/workload.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use semver::Version;
use tracing::{debug, info};

use crate::config::StudyConfig;
use crate::errors::{AslrunError, Result};
use crate::fs::FileSystem;
use crate::plan::markers::MarkerLocation;
use crate::plan::subjects::{has_flair, list_subjects};
use crate::plan::tables::{MarkerTable, MarkerTables};
use crate::types::{ModuleSelection, PipelineModule};

/// STATUS files a run is expected to create, with their workload weights.
///
/// Keys are absolute marker paths built from the study root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectedMarkerSet {
    weights: BTreeMap<PathBuf, u32>,
}

impl ExpectedMarkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if `path` was already present (its weight is kept).
    pub fn insert(&mut self, path: PathBuf, weight: u32) -> bool {
        if self.weights.contains_key(&path) {
            return false;
        }
        self.weights.insert(path, weight);
        true
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.weights.contains_key(path)
    }

    pub fn weight(&self, path: &Path) -> Option<u32> {
        self.weights.get(path).copied()
    }

    pub fn total(&self) -> u64 {
        self.weights.values().map(|w| u64::from(*w)).sum()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, u32)> {
        self.weights.iter().map(|(p, w)| (p.as_path(), *w))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectInfo {
    pub name: String,
    pub flair: bool,
}

/// Everything computed for one study right before launch.
#[derive(Debug, Clone)]
pub struct StudyPlan {
    pub root: PathBuf,
    pub selection: ModuleSelection,
    pub pipeline_version: Option<Version>,
    pub subjects: Vec<SubjectInfo>,
    pub sessions: Vec<String>,
    pub markers: ExpectedMarkerSet,
}

impl StudyPlan {
    pub fn total_workload(&self) -> u64 {
        self.markers.total()
    }

    pub fn modules(&self) -> Vec<PipelineModule> {
        self.selection.modules()
    }

    /// FLAIR presence of `subject`; unknown subjects count as having FLAIR so
    /// that no description is hidden from them.
    pub fn subject_has_flair(&self, subject: &str) -> bool {
        self.subjects
            .iter()
            .find(|s| s.name == subject)
            .is_none_or(|s| s.flair)
    }

    /// Every marker directory this plan covers.
    pub fn locations(&self) -> Vec<MarkerLocation> {
        planned_locations(self.selection, &self.subjects, &self.sessions)
    }

    /// Concrete marker table for a marker directory of this study.
    pub fn table_for(&self, tables: &MarkerTables, location: &MarkerLocation) -> MarkerTable {
        let flair = location
            .subject
            .as_deref()
            .is_none_or(|s| self.subject_has_flair(s));
        tables.select(location.module, self.pipeline_version.as_ref(), flair)
    }
}

/// Marker directories implied by a module selection.
pub fn planned_locations(
    selection: ModuleSelection,
    subjects: &[SubjectInfo],
    sessions: &[String],
) -> Vec<MarkerLocation> {
    let mut locations = Vec::new();
    for module in selection.modules() {
        match module {
            PipelineModule::Structural => {
                locations.extend(subjects.iter().map(|s| MarkerLocation::structural(&s.name)));
            }
            PipelineModule::Asl => {
                for subject in subjects {
                    locations.extend(
                        sessions
                            .iter()
                            .map(|session| MarkerLocation::asl(&subject.name, session)),
                    );
                }
            }
            PipelineModule::Population => locations.push(MarkerLocation::population()),
        }
    }
    locations
}

/// Computes the expected STATUS files and the workload of a study.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadPlanner<'a> {
    fs: &'a dyn FileSystem,
    tables: &'a MarkerTables,
}

impl<'a> WorkloadPlanner<'a> {
    pub fn new(fs: &'a dyn FileSystem, tables: &'a MarkerTables) -> Self {
        Self { fs, tables }
    }

    /// Plan one study.
    ///
    /// Markers already on disk are left out. Fails with `NoSubjects` when
    /// nothing matches the subject pattern and with `NoWorkload` when every
    /// expected marker already exists.
    pub fn plan(
        &self,
        study: &StudyConfig,
        selection: ModuleSelection,
        pipeline_version: Option<&Version>,
    ) -> Result<StudyPlan> {
        let subjects: Vec<SubjectInfo> = list_subjects(self.fs, study)?
            .into_iter()
            .map(|name| {
                let flair = has_flair(self.fs, &study.root, &name);
                SubjectInfo { name, flair }
            })
            .collect();

        if subjects.is_empty() {
            return Err(AslrunError::NoSubjects(study.root.clone()));
        }

        let mut plan = StudyPlan {
            root: study.root.clone(),
            selection,
            pipeline_version: pipeline_version.cloned(),
            subjects,
            sessions: study.sessions.clone(),
            markers: ExpectedMarkerSet::new(),
        };

        for location in plan.locations() {
            let table = plan.table_for(self.tables, &location);
            for entry in table.entries() {
                let path = location.marker_path(&study.root, &entry.marker);
                if self.fs.exists(&path) {
                    continue;
                }
                plan.markers.insert(path, entry.weight);
            }
        }

        let total = plan.total_workload();
        if total == 0 {
            return Err(AslrunError::NoWorkload(study.root.clone()));
        }

        debug!(
            root = ?study.root,
            markers = plan.markers.len(),
            "expected marker set computed"
        );
        info!(
            root = ?study.root,
            subjects = plan.subjects.len(),
            workload = total,
            "workload planned"
        );

        Ok(plan)
    }
}
