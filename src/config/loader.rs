// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{RawRunConfig, RunConfig};
use crate::errors::Result;

/// Load a run plan from a given path and return the raw `RawRunConfig`.
///
/// This only performs TOML deserialization; it does **not** check the
/// allocation invariants. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawRunConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawRunConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a run plan from path and validate the allocation rows against the
/// host's logical core count.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<RunConfig> {
    let raw_config = load_from_path(&path)?;
    let config = RunConfig::try_from(raw_config)?;
    Ok(config)
}
