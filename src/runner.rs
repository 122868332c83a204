// src/runner.rs

//! Single-flight script runner.
//!
//! Runs at most one script at a time to completion and returns its
//! combined output plus exit code. There is no queue: a run requested
//! while another is in flight fails immediately with
//! [`ProcError::AlreadyRunning`], and the losing caller retries or
//! surfaces the failure.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::errors::{ProcError, Result};
use crate::proc::ManagedProcess;
use crate::spec::ProcessSpec;

/// Combined output and exit code of a completed script run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub output: Vec<u8>,
    pub exit_code: i32,
}

/// Single-occupancy script scheduler.
pub struct ExclusiveRunner {
    busy: AtomicBool,
    staging_dir: PathBuf,
}

impl ExclusiveRunner {
    pub fn new() -> Self {
        Self::with_staging_dir(std::env::temp_dir().join("procherd-runs"))
    }

    /// Use a specific directory for staged scripts and capture files.
    pub fn with_staging_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            busy: AtomicBool::new(false),
            staging_dir: dir.into(),
        }
    }

    /// Run `script` to completion through the shell and return its
    /// combined output and exit code.
    ///
    /// The engine is driven in file-output mode so output survives
    /// abnormal termination, and detached so a script ending in an
    /// intentionally backgrounded delayed action (a deploy-style
    /// self-restart) is not truncated by the runner's own cleanup. On a
    /// failed run the error carries the exit code and a best-effort
    /// read-back of the partial capture file.
    pub async fn run_until_completion(
        &self,
        cancel: &CancelToken,
        script: &str,
    ) -> Result<RunOutput> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ProcError::AlreadyRunning);
        }
        // Released exactly once, on every exit path.
        let _slot = SlotGuard(&self.busy);

        self.run_inner(cancel, script).await
    }

    async fn run_inner(&self, cancel: &CancelToken, script: &str) -> Result<RunOutput> {
        std::fs::create_dir_all(&self.staging_dir)
            .map_err(|e| ProcError::io("create staging directory", e))?;

        // Removed on drop, so every exit path below cleans it up.
        let capture = tempfile::Builder::new()
            .prefix("procherd-output-")
            .suffix(".txt")
            .tempfile_in(&self.staging_dir)
            .map_err(|e| ProcError::io("create capture file", e))?;
        let capture_path = capture.path().to_path_buf();

        let spec = ProcessSpec::builder()
            .script(script)
            .staging_dir(&self.staging_dir)
            .output_path(&capture_path)
            .detached()
            .build()?;
        let proc = ManagedProcess::new(spec)?;
        proc.start(cancel).await?;
        debug!(pid = proc.pid(), "exclusive run started");

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                let exit_code = proc.exit_code();
                if let Err(e) = proc.close().await {
                    warn!(error = %e, "failed to close process after cancellation");
                }
                return Err(ProcError::RunCancelled { exit_code });
            }
            outcome = proc.wait() => outcome,
        };

        if let Err(e) = proc.close().await {
            warn!(error = %e, "failed to close process after completion");
        }

        match outcome {
            None | Some(Ok(())) => {
                let output = std::fs::read(&capture_path)
                    .map_err(|e| ProcError::io("read captured output", e))?;
                Ok(RunOutput {
                    output,
                    exit_code: proc.exit_code(),
                })
            }
            Some(Err(exit)) => {
                // Best effort: hand back whatever the script produced
                // before failing so callers can still parse it.
                let output = match std::fs::read(&capture_path) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        warn!(error = %e, exit = %exit, "failed to read partial output");
                        None
                    }
                };
                Err(ProcError::ScriptFailed {
                    exit_code: proc.exit_code(),
                    output,
                })
            }
        }
    }
}

impl Default for ExclusiveRunner {
    fn default() -> Self {
        Self::new()
    }
}

struct SlotGuard<'a>(&'a AtomicBool);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
