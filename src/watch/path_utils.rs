// src/watch/path_utils.rs

//! Path helpers for events coming out of the file watcher.

use std::path::Path;

/// `path` relative to `root`, with forward slashes.
///
/// Event paths may use a different absolute prefix than the configured
/// study root (symlinks, `/private/var` on macOS), so when a plain
/// `strip_prefix` fails both sides are canonicalized and compared again.
///
/// Returns `None` if `path` is not under `root`.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    if let Ok(rel) = path.strip_prefix(root) {
        return Some(to_slash(rel));
    }

    if let (Ok(root_canon), Ok(path_canon)) = (root.canonicalize(), path.canonicalize()) {
        if let Ok(rel) = path_canon.strip_prefix(&root_canon) {
            return Some(to_slash(rel));
        }
    }

    None
}

/// File name of `path` as UTF-8, if it has one.
pub fn file_name_str(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

fn to_slash(rel: &Path) -> String {
    rel.to_string_lossy().replace('\\', "/")
}
