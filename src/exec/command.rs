// src/exec/command.rs

//! Building the pipeline invocation for one worker.
//!
//! Two scenarios are supported:
//! - uncompiled: `matlab -nodesktop -nosplash -batch "cd('<dir>'); ExploreASL(...); exit"`
//!   (or `-nodisplay -r` for releases before R2019a)
//! - compiled: `<launcher> [<runtime root>] <args>` with the runtime library
//!   path injected into the environment.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::errors::{AslrunError, Result};
use crate::fs::{subdirectory_names, FileSystem};
use crate::types::ModuleSelection;

/// Oldest interpreter release the pipeline runs on.
pub const MIN_INTERPRETER_YEAR: u16 = 2016;

/// First release that understands `-batch`.
pub const BATCH_FLAG_YEAR: u16 = 2019;

static RELEASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)R?(\d{4})([ab])").expect("static regex"));

static RUNTIME_VERSION_DIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[vR]\d+[ab]?$").expect("static regex"));

/// Host operating system, as far as invocation details are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Linux,
    MacOs,
    Windows,
}

impl HostOs {
    pub fn current() -> Self {
        if cfg!(windows) {
            HostOs::Windows
        } else if cfg!(target_os = "macos") {
            HostOs::MacOs
        } else {
            HostOs::Linux
        }
    }

    /// Environment variable the dynamic loader reads.
    pub fn library_path_var(self) -> &'static str {
        match self {
            HostOs::Linux => "LD_LIBRARY_PATH",
            HostOs::MacOs => "DYLD_LIBRARY_PATH",
            HostOs::Windows => "PATH",
        }
    }

    pub fn path_separator(self) -> char {
        match self {
            HostOs::Windows => ';',
            _ => ':',
        }
    }

    /// Library subdirectories of one runtime version directory.
    fn runtime_subdirs(self) -> &'static [&'static str] {
        match self {
            HostOs::Linux => &[
                "runtime/glnxa64",
                "bin/glnxa64",
                "sys/os/glnxa64",
                "extern/bin/glnxa64",
            ],
            HostOs::MacOs => &["runtime/maci64", "bin/maci64", "sys/os/maci64", "extern/bin/maci64"],
            HostOs::Windows => &["runtime/win64", "bin/win64"],
        }
    }
}

/// An interpreter release such as R2021a.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct InterpreterVersion {
    pub year: u16,
    pub half: char,
}

impl fmt::Display for InterpreterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}{}", self.year, self.half)
    }
}

/// Parse `R2021a`, `2021b` or a path containing such a component.
pub fn parse_interpreter_version(s: &str) -> Option<InterpreterVersion> {
    let caps = RELEASE.captures(s)?;
    let year = caps.get(1)?.as_str().parse().ok()?;
    let half = caps.get(2)?.as_str().chars().next()?.to_ascii_lowercase();
    Some(InterpreterVersion { year, half })
}

/// Interpreter release from the configured value, or else from the resolved
/// location of `cmd` (installations live under `.../R2021a/bin/matlab`).
pub fn detect_interpreter_version(
    cmd: &str,
    configured: Option<&str>,
) -> Result<InterpreterVersion> {
    if let Some(value) = configured {
        return parse_interpreter_version(value).ok_or_else(|| {
            AslrunError::UnsupportedInterpreter(format!(
                "cannot parse configured interpreter version {value:?}"
            ))
        });
    }

    let resolved = which::which(cmd).map_err(|e| {
        AslrunError::UnsupportedInterpreter(format!("interpreter {cmd:?} not found: {e}"))
    })?;
    let resolved = resolved.canonicalize().unwrap_or(resolved);
    debug!(cmd, resolved = ?resolved, "resolved interpreter");

    parse_interpreter_version(&resolved.to_string_lossy()).ok_or_else(|| {
        AslrunError::UnsupportedInterpreter(format!(
            "cannot determine the release of {resolved:?}; set [config].matlab_version"
        ))
    })
}

/// Command-line flavour for the uncompiled scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStyle {
    /// `-batch "<expr>"`
    Batch,
    /// `-nodisplay -r "<expr>"`
    LegacyRun,
}

/// Pick the invocation style for an interpreter release on a host.
pub fn invocation_style(version: InterpreterVersion, os: HostOs) -> Result<InvocationStyle> {
    if version.year < MIN_INTERPRETER_YEAR {
        return Err(AslrunError::UnsupportedInterpreter(format!(
            "{version} is older than the minimum supported release R{MIN_INTERPRETER_YEAR}a"
        )));
    }
    if version.year >= BATCH_FLAG_YEAR {
        return Ok(InvocationStyle::Batch);
    }
    match os {
        HostOs::Windows => Err(AslrunError::UnsupportedInterpreter(format!(
            "{version} cannot run unattended batches on Windows; R{BATCH_FLAG_YEAR}a or newer is required"
        ))),
        _ => Ok(InvocationStyle::LegacyRun),
    }
}

/// Arguments of one pipeline call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineArgs {
    pub data_par: PathBuf,
    pub selection: ModuleSelection,
    pub iworker: usize,
    pub nworkers: usize,
}

impl PipelineArgs {
    /// Positional arguments shared by both scenarios: parameter file, import
    /// modules (always off), process modules, pause flag, worker index, worker count.
    fn positional(&self) -> Vec<String> {
        vec![
            self.data_par.to_string_lossy().into_owned(),
            "[0 0 0]".to_string(),
            self.selection.vector_literal(),
            "0".to_string(),
            self.iworker.to_string(),
            self.nworkers.to_string(),
        ]
    }

    /// `ExploreASL('<par>', [0 0 0], [1 0 0], 0, 1, 2)`
    pub fn matlab_call(&self) -> String {
        format!(
            "ExploreASL('{}', [0 0 0], {}, 0, {}, {})",
            matlab_quote(&self.data_par.to_string_lossy()),
            self.selection.vector_literal(),
            self.iworker,
            self.nworkers
        )
    }
}

fn matlab_quote(s: &str) -> String {
    s.replace('\'', "''")
}

/// A fully specified subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, OsString)>,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Build the Tokio command (stdio is left to the caller).
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Uncompiled scenario: a MATLAB session that changes into the pipeline
/// directory, runs the pipeline and exits.
pub fn uncompiled_invocation(
    matlab_cmd: &str,
    style: InvocationStyle,
    pipeline_dir: &Path,
    args: &PipelineArgs,
) -> Invocation {
    let expr = format!(
        "cd('{}'); {}; exit",
        matlab_quote(&pipeline_dir.to_string_lossy()),
        args.matlab_call()
    );
    let inv = Invocation::new(matlab_cmd).args(["-nodesktop", "-nosplash"]);
    match style {
        InvocationStyle::Batch => inv.args(["-batch".to_string(), expr]),
        InvocationStyle::LegacyRun => inv.args(["-nodisplay".to_string(), "-r".to_string(), expr]),
    }
}

/// Runtime library environment for the compiled scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnv {
    pub root: PathBuf,
    pub var: &'static str,
    pub value: OsString,
}

/// Resolve the runtime library path under `runtime_dir`.
///
/// Every version directory (`v97`, `R2019a`, ...) found beneath it
/// contributes its library subdirectories; if there are none, `runtime_dir`
/// is treated as a version directory itself. `inherited` is appended so the
/// subprocess still finds system libraries.
pub fn resolve_runtime_env(
    fs: &dyn FileSystem,
    runtime_dir: &Path,
    os: HostOs,
    inherited: Option<OsString>,
) -> Result<RuntimeEnv> {
    if !fs.is_dir(runtime_dir) {
        return Err(AslrunError::RuntimeNotFound(runtime_dir.to_path_buf()));
    }

    let mut version_dirs: Vec<PathBuf> = subdirectory_names(fs, runtime_dir)
        .map_err(|_| AslrunError::RuntimeNotFound(runtime_dir.to_path_buf()))?
        .into_iter()
        .filter(|name| RUNTIME_VERSION_DIR.is_match(name))
        .map(|name| runtime_dir.join(name))
        .collect();
    if version_dirs.is_empty() {
        version_dirs.push(runtime_dir.to_path_buf());
    }

    let mut parts: Vec<String> = Vec::new();
    for dir in &version_dirs {
        for sub in os.runtime_subdirs() {
            parts.push(dir.join(sub).to_string_lossy().into_owned());
        }
    }

    let sep = os.path_separator().to_string();
    let mut value = OsString::from(parts.join(&sep));
    if let Some(existing) = inherited.filter(|v| !v.is_empty()) {
        value.push(&sep);
        value.push(existing);
    }

    debug!(
        runtime = ?runtime_dir,
        versions = version_dirs.len(),
        var = os.library_path_var(),
        "resolved runtime library path"
    );

    Ok(RuntimeEnv {
        root: version_dirs[0].clone(),
        var: os.library_path_var(),
        value,
    })
}

/// Name of the compiled launcher inside the pipeline directory.
pub fn compiled_launcher(pipeline_dir: &Path, os: HostOs) -> PathBuf {
    match os {
        HostOs::Windows => pipeline_dir.join("xASL_latest.exe"),
        _ => pipeline_dir.join("run_xASL_latest.sh"),
    }
}

/// Compiled scenario: the launcher script takes the runtime root as its
/// first argument on Unix; the Windows executable finds it through `PATH`.
pub fn compiled_invocation(
    pipeline_dir: &Path,
    runtime: &RuntimeEnv,
    os: HostOs,
    args: &PipelineArgs,
) -> Invocation {
    let mut inv = Invocation::new(compiled_launcher(pipeline_dir, os));
    if os != HostOs::Windows {
        inv = inv.arg(runtime.root.to_string_lossy().into_owned());
    }
    inv.args(args.positional())
        .env(runtime.var, runtime.value.clone())
        .current_dir(pipeline_dir)
}
