// src/config/validate.rs

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::model::{RawRunConfig, RunConfig, StudyRow};
use crate::errors::{AslrunError, Result};
use crate::types::ModuleSelection;

impl TryFrom<RawRunConfig> for RunConfig {
    type Error = crate::errors::AslrunError;

    fn try_from(raw: RawRunConfig) -> std::result::Result<Self, Self::Error> {
        validate_with_cores(raw, logical_cores())
    }
}

/// Validate a raw run plan against an explicit logical core count.
pub fn validate_with_cores(raw: RawRunConfig, logical_cores: usize) -> Result<RunConfig> {
    validate_raw_config(&raw, logical_cores)?;
    Ok(RunConfig::new_unchecked(raw.config, raw.study))
}

/// Logical CPUs of this host; 1 if it cannot be determined.
pub fn logical_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn validate_raw_config(cfg: &RawRunConfig, logical_cores: usize) -> Result<()> {
    ensure_has_studies(cfg)?;
    validate_global_config(cfg)?;
    validate_allocations(&cfg.study, logical_cores)?;
    Ok(())
}

fn ensure_has_studies(cfg: &RawRunConfig) -> Result<()> {
    if cfg.study.is_empty() {
        return Err(AslrunError::ConfigError(
            "run plan must contain at least one [study.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawRunConfig) -> Result<()> {
    if cfg.config.debt_check_interval_ms == 0 {
        return Err(AslrunError::ConfigError(
            "[config].debt_check_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.config.poll_interval_ms == 0 {
        return Err(AslrunError::ConfigError(
            "[config].poll_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.config.matlab_cmd.trim().is_empty() {
        return Err(AslrunError::ConfigError(
            "[config].matlab_cmd must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Check the per-row and whole-table core allocation rules.
///
/// - every row has at least one core
/// - a Population row has exactly one core
/// - the sum of cores does not exceed half of the logical cores
pub fn validate_allocations(
    rows: &BTreeMap<String, StudyRow>,
    logical_cores: usize,
) -> Result<()> {
    for (name, row) in rows.iter() {
        if row.path.as_os_str().is_empty() {
            return Err(AslrunError::ConfigError(format!(
                "study '{name}' has an empty `path`"
            )));
        }
        if row.cores == 0 {
            return Err(AslrunError::ConfigError(format!(
                "study '{name}' must be allocated at least one core"
            )));
        }
        if row.module == ModuleSelection::Population && row.cores != 1 {
            return Err(AslrunError::ConfigError(format!(
                "study '{name}' runs the Population module, which must use exactly 1 core (got {})",
                row.cores
            )));
        }
    }

    let total: usize = rows.values().map(|row| row.cores).sum();
    let budget = logical_cores / 2;
    debug!(total, budget, logical_cores, "checking core budget");

    if total > budget {
        return Err(AslrunError::ConfigError(format!(
            "{total} cores allocated but at most {budget} may be used ({logical_cores} logical cores / 2)"
        )));
    }

    Ok(())
}
