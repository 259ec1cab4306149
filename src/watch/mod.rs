// src/watch/mod.rs

//! Progress observation through the study's lock tree.
//!
//! This module is responsible for:
//! - Subscribing to path creations under `<study>/lock`, natively or by
//!   polling ([`source`]).
//! - Turning STATUS-file creations into progress messages and workload
//!   deltas ([`watcher`]).
//! - Counting outstanding worker notifications per study ([`debt`]).
//!
//! It does **not** launch or control processes.

pub mod debt;
pub mod path_utils;
pub mod source;
pub mod watcher;

pub use debt::WatcherDebt;
pub use source::{source_for, MarkerSource, MarkerSubscription, NotifySource, PollSource};
pub use watcher::{DirectoryWatcher, WatcherState, DEFAULT_DEBT_CHECK_INTERVAL};
