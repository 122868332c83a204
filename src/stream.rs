// src/stream.rs

//! Line-oriented output reader.
//!
//! Drains one or both of a started process's output streams into a
//! per-line callback while the process may still be running. When both
//! streams are requested they are read sequentially (stdout in full,
//! then stderr), not interleaved live; callers needing true real-time
//! interleaving must read the two streams independently.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::errors::{ProcError, Result};
use crate::proc::ManagedProcess;
use crate::proc::engine::StreamKind;

/// Default initial scan-buffer capacity.
pub const DEFAULT_SCAN_BUFFER: usize = 4096;

/// Options for [`read_lines`].
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    stdout: bool,
    stderr: bool,
    initial_buffer: usize,
    wait_for_exit: bool,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self {
            stdout: false,
            stderr: false,
            initial_buffer: DEFAULT_SCAN_BUFFER,
            wait_for_exit: false,
        }
    }

    /// Read the stdout stream.
    pub fn stdout(mut self) -> Self {
        self.stdout = true;
        self
    }

    /// Read the stderr stream (after stdout, if both are selected).
    pub fn stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    /// Larger initial scan buffer for very long lines.
    pub fn initial_buffer(mut self, bytes: usize) -> Self {
        self.initial_buffer = bytes.max(1);
        self
    }

    /// After the scan ends, block for the process's completion signal
    /// and surface its terminal error, if any.
    pub fn wait_for_exit(mut self) -> Self {
        self.wait_for_exit = true;
        self
    }
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Scan the selected streams line by line, invoking `on_line` for each
/// line (without its trailing newline).
///
/// Requires the target to be started and not yet closed. After every
/// line the caller's cancellation and the target's closed state are
/// checked; cancellation returns [`ProcError::Cancelled`], a concurrent
/// close ends the scan cleanly.
pub async fn read_lines<F>(
    proc: &ManagedProcess,
    cancel: &CancelToken,
    opts: ReadOptions,
    mut on_line: F,
) -> Result<()>
where
    F: FnMut(&str),
{
    if !proc.started() {
        return Err(ProcError::NotStarted);
    }
    if proc.closed() {
        return Err(ProcError::Closed);
    }
    if !opts.stdout && !opts.stderr {
        return Err(ProcError::NoStreamSelected);
    }

    if opts.stdout {
        let stream = proc.output_stream(StreamKind::Stdout).await?;
        scan_stream(stream, proc, cancel, opts.initial_buffer, &mut on_line).await?;
    }
    if opts.stderr {
        let stream = proc.output_stream(StreamKind::Stderr).await?;
        scan_stream(stream, proc, cancel, opts.initial_buffer, &mut on_line).await?;
    }

    if opts.wait_for_exit {
        tokio::select! {
            _ = cancel.cancelled() => return Err(ProcError::Cancelled),
            outcome = proc.wait() => {
                if let Some(Err(exit)) = outcome {
                    return Err(exit.into());
                }
            }
        }
    }

    Ok(())
}

async fn scan_stream<R, F>(
    stream: R,
    proc: &ManagedProcess,
    cancel: &CancelToken,
    initial_buffer: usize,
    on_line: &mut F,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::with_capacity(initial_buffer, stream);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProcError::Cancelled),
            read = reader.read_line(&mut line) => read,
        };

        match read {
            Ok(0) => return Ok(()),
            Ok(_) => {
                let trimmed = line
                    .strip_suffix('\n')
                    .map(|s| s.strip_suffix('\r').unwrap_or(s))
                    .unwrap_or(&line);
                on_line(trimmed);
            }
            Err(e) if is_benign_teardown(&e, proc) => {
                // `close` tore the pipe down under us; not an error.
                debug!(error = %e, "output stream torn down during close");
                return Ok(());
            }
            Err(e) => return Err(ProcError::io("read output stream", e)),
        }

        if cancel.is_cancelled() {
            return Err(ProcError::Cancelled);
        }
        if proc.closed() {
            return Ok(());
        }
    }
}

/// A read error produced while `close` is concurrently releasing the
/// pipe is expected noise, not a failure.
fn is_benign_teardown(e: &std::io::Error, proc: &ManagedProcess) -> bool {
    if !proc.closed() {
        return false;
    }
    matches!(e.kind(), std::io::ErrorKind::BrokenPipe)
        || e.to_string().to_lowercase().contains("bad file descriptor")
        || e.to_string().contains("file already closed")
}
