// src/config/mod.rs

//! Configuration loading and validation for aslrun.
//!
//! Responsibilities:
//! - Define the TOML-backed run plan (`model.rs`).
//! - Load a run plan from disk (`loader.rs`).
//! - Enforce the core allocation rules (`validate.rs`).
//! - Discover, parse and check each study's JSON parameter file (`study.rs`).

pub mod loader;
pub mod model;
pub mod study;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{ConfigSection, RawRunConfig, RunConfig, StudyRow};
pub use study::{load_study_config, RawStudyConfig, StudyConfig};
pub use validate::{logical_cores, validate_allocations, validate_with_cores};
