// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AslrunError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Study configuration error in {path:?}: {message}")]
    StudyConfig { path: PathBuf, message: String },

    #[error("D.ROOT {configured:?} does not match the study directory {supplied:?}")]
    RootMismatch {
        configured: PathBuf,
        supplied: PathBuf,
    },

    #[error("No subjects matching the subject pattern were found in {0:?}")]
    NoSubjects(PathBuf),

    #[error("Unsupported interpreter: {0}")]
    UnsupportedInterpreter(String),

    #[error("Runtime library directory could not be resolved: {0:?}")]
    RuntimeNotFound(PathBuf),

    #[error("No workload detected for {0:?}; every expected step is already complete")]
    NoWorkload(PathBuf),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, AslrunError>;
