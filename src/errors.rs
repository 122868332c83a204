// src/errors.rs

//! Crate-wide error types.
//!
//! Configuration and lifecycle-misuse errors are stable, matchable
//! variants; OS-level failures wrap `std::io::Error` with a short
//! context string; everything else escapes through `anyhow`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcError {
    // Configuration errors, returned before any OS process exists.
    #[error("no command provided")]
    NoCommand,

    #[error("multiple commands require script mode")]
    MultipleCommandsRequireScript,

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("invalid environment entry (expected KEY=VALUE): {0}")]
    InvalidEnvEntry(String),

    #[error("duplicate environment variable: {0}")]
    DuplicateEnvVar(String),

    // Lifecycle misuse. `start`/`close` themselves are idempotent no-ops;
    // these are surfaced by the one-shot and reader entry points.
    #[error("process already started")]
    AlreadyStarted,

    #[error("process not started")]
    NotStarted,

    #[error("process already closed")]
    Closed,

    // Output reader.
    #[error("at least one of stdout or stderr must be selected")]
    NoStreamSelected,

    #[error("{0} stream is unavailable")]
    StreamUnavailable(&'static str),

    #[error("operation cancelled")]
    Cancelled,

    /// One-shot combined-output run exited abnormally. Carries whatever
    /// output had been produced before the failure.
    #[error("command failed with exit code {exit_code}")]
    CombinedOutputFailed { exit_code: i32, output: Vec<u8> },

    // Exclusive runner.
    #[error("another script is already running")]
    AlreadyRunning,

    /// Script run failed; `output` is a best-effort read-back of the
    /// capture file (`None` if the read-back itself failed).
    #[error("script failed with exit code {exit_code}")]
    ScriptFailed {
        exit_code: i32,
        output: Option<Vec<u8>>,
    },

    /// Script run was cancelled before completion.
    #[error("script run cancelled (exit code so far: {exit_code})")]
    RunCancelled { exit_code: i32 },

    #[error("failed to {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Exit(#[from] ExitError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProcError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ProcError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Terminal outcome of one process run, delivered on the completion
/// channel for the initial run and each restart.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExitError {
    #[error("command exited with code {0}")]
    NonZero(i32),

    /// The process was terminated by a signal instead of exiting on its
    /// own; the recorded exit code is the `-1` sentinel.
    #[error("command was terminated before exiting on its own")]
    Killed,

    #[error("failed to wait on command: {0}")]
    Wait(String),
}

/// Value delivered on the completion channel: `Ok(())` for a clean exit,
/// `Err` for anything else.
pub type Completion = std::result::Result<(), ExitError>;

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ProcError>;
