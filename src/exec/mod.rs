// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`command`] builds the pipeline invocation for the host platform and
//!   interpreter release.
//! - [`worker`] owns one pipeline subprocess and its stdout/stderr.
//! - [`stdout_scan`] recognises error blocks in the pipeline's output.
//! - [`process_tree`] delivers suspend/resume/kill to a whole process tree.
//! - [`backend`] provides the `WorkerBackend` trait and the production
//!   `RealWorkerBackend`, which tests replace with a fake.

pub mod backend;
pub mod command;
pub mod process_tree;
pub mod stdout_scan;
pub mod worker;

pub use backend::{RealWorkerBackend, WorkerBackend};
pub use worker::{worker_log_path, ProcessWorker, WorkerSpec, WorkerState, WORKER_LOG_PREFIX};
