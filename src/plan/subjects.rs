// src/plan/subjects.rs

use std::path::Path;

use tracing::debug;

use crate::config::StudyConfig;
use crate::errors::Result;
use crate::fs::{subdirectory_names, FileSystem};
use crate::plan::markers::LOCK_DIR;

/// Directory names that live next to subjects but are never subjects.
pub const RESERVED_DIRS: [&str; 2] = [LOCK_DIR, "Population"];

/// Subjects of a study: directories under the root that fully match the
/// subject pattern, minus reserved and excluded names. Sorted.
pub fn list_subjects(fs: &dyn FileSystem, study: &StudyConfig) -> Result<Vec<String>> {
    let subjects: Vec<String> = subdirectory_names(fs, &study.root)?
        .into_iter()
        .filter(|name| !RESERVED_DIRS.contains(&name.as_str()))
        .filter(|name| !study.is_excluded(name))
        .filter(|name| study.subject_pattern.is_match(name))
        .collect();

    debug!(root = ?study.root, count = subjects.len(), "matched subjects");
    Ok(subjects)
}

/// Whether a subject has a FLAIR image (`FLAIR*.nii` / `FLAIR*.nii.gz`)
/// directly in its directory or in an `anat` subdirectory.
pub fn has_flair(fs: &dyn FileSystem, study_root: &Path, subject: &str) -> bool {
    let subject_dir = study_root.join(subject);
    [subject_dir.clone(), subject_dir.join("anat")]
        .iter()
        .filter(|dir| fs.is_dir(dir))
        .filter_map(|dir| fs.read_dir(dir).ok())
        .flatten()
        .any(|path| is_flair_image(&path))
}

fn is_flair_image(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
        return false;
    };
    let is_nifti = name.ends_with(".nii") || name.ends_with(".nii.gz");
    // BIDS-style names carry the suffix at the end (sub-001_FLAIR.nii.gz).
    let stem = name.trim_end_matches(".gz").trim_end_matches(".nii");
    is_nifti && (name.starts_with("flair") || stem.ends_with("_flair"))
}
