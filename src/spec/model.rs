// src/spec/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::staging;

/// How the commands are handed to the operating system.
///
/// Modeling this as a tagged variant (rather than a pair of booleans and
/// an optional path) makes invalid combinations unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// A single argv vector executed directly, no shell involved.
    Direct,
    /// The assembled script is fed to `bash -s` over its stdin. Avoids
    /// both ARG_MAX limits and quoting hazards, since nothing is
    /// reinterpreted by the parent's own shell.
    ScriptInline,
    /// The assembled script is staged as a temp file under the staging
    /// directory and `bash <path>` is invoked. The file is removed on
    /// close.
    ScriptFile,
}

/// Where the child's output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    /// Engine-managed stdout/stderr pipes, drained via the output reader.
    Pipes,
    /// Both streams appended to one capture file at this path. Output
    /// survives abnormal termination; the exclusive runner relies on
    /// this to read back partial output after a failure.
    File(PathBuf),
}

/// Restart-on-error policy. Presence of a policy enables restarts; a
/// clean exit never restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Maximum number of restarts after the initial run.
    pub limit: u32,
    /// Wait between an error exit and the restart. A zero interval is
    /// normalized to [`RestartPolicy::DEFAULT_INTERVAL`] at build time.
    pub interval: Duration,
}

impl RestartPolicy {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
}

/// Immutable, validated execution specification. Produced by
/// [`super::SpecBuilder`], consumed by the process engine.
#[derive(Debug)]
pub struct ProcessSpec {
    pub(crate) mode: ExecMode,
    pub(crate) commands: Vec<Vec<String>>,
    pub(crate) script: Option<String>,
    pub(crate) envs: Vec<(String, String)>,
    pub(crate) sink: OutputSink,
    pub(crate) restart: Option<RestartPolicy>,
    pub(crate) staging_dir: PathBuf,
    pub(crate) file_pattern: String,
    pub(crate) detached: bool,
    pub(crate) labels: BTreeMap<String, String>,
}

impl ProcessSpec {
    pub fn builder() -> super::SpecBuilder {
        super::SpecBuilder::new()
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn sink(&self) -> &OutputSink {
        &self.sink
    }

    pub fn restart(&self) -> Option<RestartPolicy> {
        self.restart
    }

    pub fn detached(&self) -> bool {
        self.detached
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn file_pattern(&self) -> &str {
        &self.file_pattern
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Assemble the script body for the two script modes: the caller's
    /// complete script verbatim, or the generated safety header, with
    /// one line appended per command in either case.
    pub(crate) fn script_body(&self) -> String {
        let mut body = match &self.script {
            Some(script) => script.clone(),
            None => String::from(staging::SCRIPT_HEADER),
        };
        if !self.commands.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        for args in &self.commands {
            body.push_str(&args.join(" "));
            body.push('\n');
        }
        body
    }
}
