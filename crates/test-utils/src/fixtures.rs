#![allow(dead_code)]

//! On-disk and in-memory study layouts.

use std::path::{Path, PathBuf};

use aslrun::fs::mock::MockFileSystem;

use crate::builders::DataParBuilder;

pub const DATA_PAR: &str = "DataPar.json";

/// Create `<root>/<subject>` for every subject and a default parameter file.
/// Returns the parameter file path.
pub fn write_study(root: &Path, subjects: &[&str]) -> std::io::Result<PathBuf> {
    write_study_with(root, subjects, &DataParBuilder::new(root).build())
}

pub fn write_study_with(root: &Path, subjects: &[&str], data_par: &str) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(root)?;
    for subject in subjects {
        std::fs::create_dir_all(root.join(subject))?;
    }
    let path = root.join(DATA_PAR);
    std::fs::write(&path, data_par)?;
    Ok(path)
}

/// Same layout in a mock filesystem.
pub fn mock_study(fs: &MockFileSystem, root: &Path, subjects: &[&str], data_par: &str) -> PathBuf {
    fs.add_dir(root);
    for subject in subjects {
        fs.add_dir(root.join(subject));
    }
    let path = root.join(DATA_PAR);
    fs.add_file(&path, data_par);
    path
}

/// `sub-001` .. `sub-<n>`.
pub fn subject_names(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("sub-{i:03}")).collect()
}
