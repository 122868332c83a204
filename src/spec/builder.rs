// src/spec/builder.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::errors::{ProcError, Result};
use crate::spec::model::{ExecMode, OutputSink, ProcessSpec, RestartPolicy};
use crate::staging;

/// Builder for [`ProcessSpec`].
///
/// Collects caller options declaratively; all validation happens in
/// [`SpecBuilder::build`] so a partially-configured builder is never an
/// error by itself.
#[derive(Debug, Default)]
pub struct SpecBuilder {
    commands: Vec<Vec<String>>,
    script: Option<String>,
    script_mode: bool,
    inline: bool,
    envs: Vec<String>,
    output_path: Option<PathBuf>,
    restart: Option<RestartPolicy>,
    staging_dir: Option<PathBuf>,
    file_pattern: Option<String>,
    detached: bool,
    labels: BTreeMap<String, String>,
}

impl SpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one command argv vector. In direct mode exactly one command is
    /// allowed; script modes accept any number, one line each.
    pub fn command<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands.push(args.into_iter().map(Into::into).collect());
        self
    }

    /// Provide a complete script body. Implies script mode (file-backed
    /// unless [`SpecBuilder::inline_script`] is also set).
    pub fn script(mut self, contents: impl Into<String>) -> Self {
        self.script = Some(contents.into());
        self
    }

    /// Run the commands through the shell as a staged script file.
    pub fn script_mode(mut self) -> Self {
        self.script_mode = true;
        self
    }

    /// Run the script through the shell's stdin instead of a staged
    /// file; nothing is written to disk. Implies script mode.
    pub fn inline_script(mut self) -> Self {
        self.inline = true;
        self
    }

    /// Add one `KEY=VALUE` environment override.
    pub fn env(mut self, entry: impl Into<String>) -> Self {
        self.envs.push(entry.into());
        self
    }

    /// Add several `KEY=VALUE` environment overrides.
    pub fn envs<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.envs.extend(entries.into_iter().map(Into::into));
        self
    }

    /// Send both output streams to one capture file at this path instead
    /// of engine-managed pipes.
    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Restart on error exits, up to `policy.limit` times.
    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.restart = Some(policy);
        self
    }

    /// Directory for staged script files. Defaults to the system temp
    /// directory.
    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Filename glob for staged script files, e.g. `procherd-*.bash`.
    pub fn file_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.file_pattern = Some(pattern.into());
        self
    }

    /// Do not create a new process group; only the direct child receives
    /// stop signals, so intentionally backgrounded sub-commands may
    /// outlive this invocation.
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    /// Attach an opaque label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Validate and freeze into a [`ProcessSpec`].
    pub fn build(self) -> Result<ProcessSpec> {
        if self.commands.is_empty() && self.script.is_none() {
            return Err(ProcError::NoCommand);
        }

        // Supplying a script body auto-enables script mode.
        let script_mode = self.script_mode || self.inline || self.script.is_some();
        if self.commands.len() > 1 && !script_mode {
            return Err(ProcError::MultipleCommandsRequireScript);
        }

        let mode = if !script_mode {
            ExecMode::Direct
        } else if self.inline {
            ExecMode::ScriptInline
        } else {
            ExecMode::ScriptFile
        };

        // Every resolvable command's first token must exist on PATH. A
        // caller-supplied complete script is opaque and not checked.
        for args in &self.commands {
            let first = args.first().map(String::as_str).unwrap_or("");
            let token = first.split_whitespace().next().unwrap_or("");
            if token.is_empty() {
                return Err(ProcError::NoCommand);
            }
            if !command_on_path(token) {
                return Err(ProcError::CommandNotFound(token.to_string()));
            }
        }

        let mut envs = Vec::with_capacity(self.envs.len());
        let mut seen = BTreeMap::new();
        for entry in &self.envs {
            if entry.matches('=').count() != 1 {
                return Err(ProcError::InvalidEnvEntry(entry.clone()));
            }
            let (key, value) = entry.split_once('=').expect("checked above");
            if key.is_empty() {
                return Err(ProcError::InvalidEnvEntry(entry.clone()));
            }
            if seen.insert(key.to_string(), ()).is_some() {
                return Err(ProcError::DuplicateEnvVar(key.to_string()));
            }
            envs.push((key.to_string(), value.to_string()));
        }

        let restart = self.restart.map(|mut policy| {
            if policy.interval.is_zero() {
                policy.interval = RestartPolicy::DEFAULT_INTERVAL;
            }
            policy
        });

        Ok(ProcessSpec {
            mode,
            commands: self.commands,
            script: self.script,
            envs,
            sink: match self.output_path {
                Some(path) => OutputSink::File(path),
                None => OutputSink::Pipes,
            },
            restart,
            staging_dir: self.staging_dir.unwrap_or_else(std::env::temp_dir),
            file_pattern: self
                .file_pattern
                .unwrap_or_else(|| staging::DEFAULT_SCRIPT_PATTERN.to_string()),
            detached: self.detached,
            labels: self.labels,
        })
    }
}

/// PATH lookup for a bare program name; an explicit path is checked
/// directly. Requires the executable bit.
fn command_on_path(name: &str) -> bool {
    use std::os::unix::fs::PermissionsExt;

    let executable = |path: &std::path::Path| {
        std::fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    };

    if name.contains('/') {
        return executable(std::path::Path::new(name));
    }

    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| executable(&dir.join(name)))
}
