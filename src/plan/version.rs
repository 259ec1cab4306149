// src/plan/version.rs

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use semver::Version;
use tracing::debug;

use crate::fs::FileSystem;

static VERSION_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^VERSION_(\d+)\.(\d+)\.(\d+)").expect("static regex")
});

/// Pipeline version from the `VERSION_x.y.z` file the pipeline ships in its
/// top-level directory. `None` when absent or unreadable.
pub fn detect_pipeline_version(fs: &dyn FileSystem, pipeline_dir: &Path) -> Option<Version> {
    let entries = match fs.read_dir(pipeline_dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(dir = ?pipeline_dir, error = %err, "cannot list pipeline directory");
            return None;
        }
    };

    let mut versions: Vec<Version> = entries
        .iter()
        .filter_map(|p| p.file_name())
        .filter_map(|n| parse_version_file_name(&n.to_string_lossy()))
        .collect();
    versions.sort();
    let version = versions.pop();
    debug!(dir = ?pipeline_dir, ?version, "detected pipeline version");
    version
}

/// `VERSION_1.10.0` -> 1.10.0; trailing text after the patch number is ignored.
pub fn parse_version_file_name(name: &str) -> Option<Version> {
    let caps = VERSION_FILE.captures(name)?;
    let part = |i: usize| caps.get(i)?.as_str().parse::<u64>().ok();
    Some(Version::new(part(1)?, part(2)?, part(3)?))
}
