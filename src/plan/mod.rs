// src/plan/mod.rs

//! Pre-launch planning for a study.
//!
//! - [`markers`] knows the shape of the STATUS-file tree under `<root>/lock`.
//! - [`tables`] selects the version-specific marker tables.
//! - [`subjects`] enumerates subjects and detects FLAIR scans.
//! - [`workload`] computes the expected marker set and its total workload.
//! - [`lockdirs`] pre-creates the marker directories and clears stale locks.
//! - [`version`] reads the installed pipeline version.

pub mod lockdirs;
pub mod markers;
pub mod subjects;
pub mod tables;
pub mod version;
pub mod workload;

pub use lockdirs::LockDirectoryInitializer;
pub use markers::{classify, lock_root, LockEntry, MarkerLocation};
pub use tables::{MarkerEntry, MarkerTable, MarkerTables};
pub use version::detect_pipeline_version;
pub use workload::{ExpectedMarkerSet, StudyPlan, SubjectInfo, WorkloadPlanner};
