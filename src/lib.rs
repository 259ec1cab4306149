// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod plan;
pub mod types;
pub mod watch;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::RunConfig;
use crate::engine::{
    parse_control_line, Diagnoser, Orchestrator, PreparedStudy, RunEvent, RunSummary, Runtime,
    StudyControl,
};
use crate::exec::RealWorkerBackend;
use crate::fs::{FileSystem, RealFileSystem};
use crate::plan::MarkerTables;
use crate::watch::source_for;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - run plan loading and validation
/// - per-study preparation (nothing is touched until every study passes)
/// - lock directories, watchers and workers
/// - Ctrl-C and interactive per-study controls
/// - the runtime, until post-run diagnosis
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let settings = cfg.config().clone();

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let tables = Arc::new(MarkerTables::load(&*fs, settings.marker_tables.as_deref())?);
    let orchestrator = Orchestrator::new(Arc::clone(&fs), Arc::clone(&tables), settings.clone());

    let studies = orchestrator.prepare_all(&cfg)?;

    if args.dry_run {
        print_dry_run(&cfg, &studies);
        return Ok(());
    }

    orchestrator.initialize_locks(&studies)?;

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RunEvent>(64);

    let mut backend = RealWorkerBackend::new(rt_tx.clone());
    let source = source_for(
        settings.watch_backend,
        Duration::from_millis(settings.poll_interval_ms),
    );

    let launched = orchestrator
        .launch(studies, &mut backend, &*source, rt_tx.clone())
        .await?;
    info!(
        studies = launched.studies.len(),
        workers = cfg.total_cores(),
        "run launched"
    );

    // Ctrl-C → stop every study; a second Ctrl-C exits right away.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    eprintln!("failed to listen for Ctrl+C: {e}");
                    return;
                }
                println!("[aslrun] interrupt received; stopping all studies");
                if tx.send(RunEvent::ShutdownRequested).await.is_err() {
                    return;
                }
            }
        });
    }

    spawn_stdin_controls(
        launched.studies.iter().map(|s| s.name.clone()).collect(),
        launched.controls(),
    );

    let runtime = Runtime::new(&launched, rt_rx, Diagnoser::new(fs, tables));
    let summary = runtime.run().await;
    debug!(running = backend.running(), "runtime finished");

    print_summary(&summary);
    if !summary.is_success() {
        bail!(
            "{} of {} studies did not complete",
            summary.incomplete().count(),
            summary.studies.len()
        );
    }
    Ok(())
}

/// `pause|resume|stop <study>` on stdin.
///
/// Runs on a plain thread: a blocking stdin read must not hold up runtime
/// shutdown.
fn spawn_stdin_controls(names: Vec<String>, controls: Vec<StudyControl>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            let Some((signal, name)) = parse_control_line(&line) else {
                println!("[aslrun] expected: pause|resume|stop <study>");
                continue;
            };
            match names.iter().position(|n| *n == name) {
                Some(idx) => {
                    let reached = controls[idx].send(signal);
                    println!("[aslrun] {name}: {signal:?} sent to {reached} worker(s)");
                }
                None => {
                    warn!(study = %name, "control for unknown study");
                    println!("[aslrun] unknown study {name:?}");
                }
            }
        }
    });
}

fn print_summary(summary: &RunSummary) {
    println!();
    if summary.is_success() {
        println!("[aslrun] all studies completed");
    }
    for study in &summary.studies {
        if study.is_complete() {
            println!("[aslrun] {}: complete", study.name);
        } else {
            println!(
                "[aslrun] {}: INCOMPLETE ({} step(s) missing, {} pipeline error(s), {} failed worker(s))",
                study.name,
                study.missing_markers,
                study.stdout_errors.len(),
                study.stderr_errors.len()
            );
            if let Some(report) = &study.report_path {
                println!("          report: {}", report.display());
            }
        }
        if !study.progress_complete() {
            println!(
                "          progress stopped at {}/{}",
                study.achieved, study.planned
            );
        }
        if let Some(log) = &study.log_path {
            println!("          log: {}", log.display());
        }
    }
}

/// Print every study's plan and first worker command.
fn print_dry_run(cfg: &RunConfig, studies: &[PreparedStudy]) {
    println!("aslrun dry-run");
    println!("  config.matlab_cmd = {}", cfg.config().matlab_cmd);
    println!("  config.watch_backend = {:?}", cfg.config().watch_backend);
    println!("  total cores = {}", cfg.total_cores());
    println!();

    println!("studies ({}):", studies.len());
    for study in studies {
        println!("  - {}", study.name);
        println!("      root: {}", study.plan.root.display());
        println!("      parameters: {}", study.config.source.display());
        println!("      scenario: {}", study.config.scenario);
        println!("      module: {}", study.row.module);
        println!("      cores: {}", study.row.cores);
        println!("      subjects: {}", study.plan.subjects.len());
        if let Some(version) = &study.plan.pipeline_version {
            println!("      pipeline version: {version}");
        }
        println!(
            "      workload: {} ({} expected steps)",
            study.plan.total_workload(),
            study.plan.markers.len()
        );
        if let Some(spec) = study.worker_specs().first() {
            println!("      worker 1: {}", spec.invocation);
        }
    }

    debug!("dry-run complete (no execution)");
}
