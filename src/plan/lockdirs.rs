// src/plan/lockdirs.rs

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::StudyConfig;
use crate::errors::Result;
use crate::fs::FileSystem;
use crate::plan::markers::STALE_LOCK_DIR;
use crate::plan::subjects::list_subjects;
use crate::plan::workload::{planned_locations, SubjectInfo};
use crate::types::ModuleSelection;

/// Prepares a study's lock tree before any worker starts, so one recursive
/// watch on `<root>/lock` sees every STATUS file from the first one on.
#[derive(Debug, Clone, Copy)]
pub struct LockDirectoryInitializer<'a> {
    fs: &'a dyn FileSystem,
}

impl<'a> LockDirectoryInitializer<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self { fs }
    }

    /// Create every marker directory implied by `selection` and clear out
    /// stale `locked` directories. Returns the directories that were created.
    pub fn initialize(
        &self,
        study: &StudyConfig,
        selection: ModuleSelection,
    ) -> Result<Vec<PathBuf>> {
        let subjects: Vec<SubjectInfo> = list_subjects(self.fs, study)?
            .into_iter()
            .map(|name| SubjectInfo { name, flair: false })
            .collect();

        let mut created = Vec::new();
        for location in planned_locations(selection, &subjects, &study.sessions) {
            let dir = location.dir(&study.root);
            if self.fs.is_dir(&dir) {
                continue;
            }
            self.fs.create_dir_all(&dir)?;
            created.push(dir);
        }

        let removed = self.remove_stale_locks(&study.root);
        info!(
            root = ?study.root,
            created = created.len(),
            stale_removed = removed,
            "lock directories prepared"
        );

        Ok(created)
    }

    /// Delete every directory named `locked` under `root`.
    ///
    /// Failures are logged and never propagated. Returns how many were removed.
    pub fn remove_stale_locks(&self, root: &Path) -> usize {
        let mut removed = 0;
        let mut stack = vec![root.to_path_buf()];

        while let Some(dir) = stack.pop() {
            let entries = match self.fs.read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    debug!(dir = ?dir, error = %err, "skipping unreadable directory");
                    continue;
                }
            };

            for path in entries {
                if !self.fs.is_dir(&path) {
                    continue;
                }
                let is_stale = path
                    .file_name()
                    .is_some_and(|n| n == STALE_LOCK_DIR);
                if !is_stale {
                    stack.push(path);
                    continue;
                }
                if self.remove_lock_dir(&path) {
                    removed += 1;
                }
            }
        }

        removed
    }

    fn remove_lock_dir(&self, path: &Path) -> bool {
        match self.fs.remove_dir(path) {
            Ok(()) => {
                debug!(path = ?path, "removed stale lock directory");
                true
            }
            Err(err) => {
                warn!(path = ?path, error = %err, "could not remove stale lock directory; retrying recursively");
                match self.fs.remove_dir_all(path) {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(path = ?path, error = %err, "recursive removal of stale lock directory failed");
                        false
                    }
                }
            }
        }
    }
}
