// src/proc/engine.rs

//! The process engine: owns one OS process's full lifecycle.
//!
//! State machine: `NotStarted -> Started -> Closed`, never reversed.
//! `start` and `close` are idempotent; a handle can be kept around after
//! closing purely to inspect the exit code.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cancel::{CancelSource, CancelToken};
use crate::errors::{Completion, ProcError, Result};
use crate::proc::group::ProcessGroup;
use crate::proc::watcher;
use crate::spec::{ExecMode, OutputSink, ProcessSpec};
use crate::staging;

/// How long a gracefully-terminated group gets to exit before the
/// forceful kill follows.
pub(crate) const CLOSE_GRACE: Duration = Duration::from_secs(3);

/// Which of the child's output streams to hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Default)]
pub(crate) struct StreamHandles {
    pub(crate) stdout: Option<ChildStdout>,
    pub(crate) stderr: Option<ChildStderr>,
}

/// Shared state between the public handle, the exit watcher, and the
/// cancellation linker. Field groups are guarded independently so
/// readers of one never block on writers of another.
pub(crate) struct ProcState {
    pub(crate) spec: ProcessSpec,

    started: AtomicBool,
    closed: AtomicBool,
    pid: AtomicU32,
    exit_code: AtomicI32,
    pub(crate) restarts: AtomicU32,

    /// Internal cancellation, fired by `close` or by the caller's token.
    pub(crate) cancel: CancelSource,

    /// Serializes `start`/`close`/one-shot entry.
    lifecycle: tokio::sync::Mutex<()>,

    pub(crate) streams: std::sync::Mutex<StreamHandles>,
    staged: std::sync::Mutex<Option<NamedTempFile>>,

    completion_tx: std::sync::Mutex<Option<mpsc::Sender<Completion>>>,
    completion_rx: tokio::sync::Mutex<mpsc::Receiver<Completion>>,
}

impl ProcState {
    pub(crate) fn record_pid(&self, pid: u32) {
        self.pid.store(pid, Ordering::SeqCst);
    }

    pub(crate) fn record_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Signalling target for the current child, if one was started.
    pub(crate) fn group(&self) -> Option<ProcessGroup> {
        let pid = self.pid.load(Ordering::SeqCst);
        if pid == 0 {
            return None;
        }
        Some(ProcessGroup::new(pid, !self.spec.detached))
    }
}

/// Handle on one managed OS process.
pub struct ManagedProcess {
    inner: Arc<ProcState>,
}

impl ManagedProcess {
    /// Bind a validated spec to a fresh handle. File-backed script mode
    /// stages the script here; a full disk surfaces immediately as an
    /// error rather than at start time.
    pub fn new(spec: ProcessSpec) -> Result<Self> {
        let staged = match spec.mode {
            ExecMode::ScriptFile => Some(staging::stage_script(
                &spec.staging_dir,
                &spec.file_pattern,
                &spec.script_body(),
            )?),
            _ => None,
        };

        // The completion channel holds one outcome per run; sized to the
        // restart limit (or 1 if none), closed when the watcher stops.
        let capacity = spec
            .restart
            .map(|policy| policy.limit.max(1) as usize)
            .unwrap_or(1);
        let (tx, rx) = mpsc::channel(capacity);

        Ok(Self {
            inner: Arc::new(ProcState {
                spec,
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                pid: AtomicU32::new(0),
                exit_code: AtomicI32::new(0),
                restarts: AtomicU32::new(0),
                cancel: CancelSource::new(),
                lifecycle: tokio::sync::Mutex::new(()),
                streams: std::sync::Mutex::new(StreamHandles::default()),
                staged: std::sync::Mutex::new(staged),
                completion_tx: std::sync::Mutex::new(Some(tx)),
                completion_rx: tokio::sync::Mutex::new(rx),
            }),
        })
    }

    /// Launch the OS process and spawn the background exit watcher.
    ///
    /// Idempotent: a no-op if already started or already closed.
    /// Cancelling `caller` later forces group termination exactly like
    /// `close`, so an abandoned timeout cannot leak processes.
    pub async fn start(&self, caller: &CancelToken) -> Result<()> {
        if self.started() || self.closed() {
            return Ok(());
        }

        let _guard = self.inner.lifecycle.lock().await;
        if self.started() || self.closed() {
            return Ok(());
        }

        self.link_caller(caller);

        let child = spawn_child(&self.inner, false)?;
        self.inner.started.store(true, Ordering::SeqCst);
        info!(pid = self.pid(), "process started");

        let tx = self
            .inner
            .completion_tx
            .lock()
            .expect("completion sender lock")
            .take()
            .expect("completion sender already taken");
        tokio::spawn(watcher::watch(self.inner.clone(), child, tx));

        Ok(())
    }

    /// One-shot: start and block until exit, returning combined
    /// stdout+stderr. Fails with [`ProcError::AlreadyStarted`] if the
    /// handle was already started through [`ManagedProcess::start`].
    pub async fn start_and_wait_combined(&self, caller: &CancelToken) -> Result<Vec<u8>> {
        if self.started() {
            return Err(ProcError::AlreadyStarted);
        }

        let _guard = self.inner.lifecycle.lock().await;
        if self.started() {
            return Err(ProcError::AlreadyStarted);
        }

        self.link_caller(caller);

        let mut child = spawn_child(&self.inner, true)?;
        self.inner.started.store(true, Ordering::SeqCst);

        // Drain both pipes concurrently while waiting; combined output is
        // stdout in full, then stderr.
        let (stdout, stderr) = {
            let mut streams = self.inner.streams.lock().expect("stream lock");
            (streams.stdout.take(), streams.stderr.take())
        };
        let drain = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut out = Vec::new();
            let mut err = Vec::new();
            if let Some(mut stream) = stdout {
                let _ = stream.read_to_end(&mut out).await;
            }
            if let Some(mut stream) = stderr {
                let _ = stream.read_to_end(&mut err).await;
            }
            (out, err)
        });

        let token = self.inner.cancel.token();
        let status = tokio::select! {
            _ = token.cancelled() => {
                if let Some(group) = self.inner.group() {
                    if let Err(e) = group.kill() {
                        warn!(error = %e, "failed to kill process on cancellation");
                    }
                }
                child.wait().await
            }
            status = child.wait() => status,
        };

        let (out, err) = drain.await.unwrap_or_else(|_| (Vec::new(), Vec::new()));
        let mut combined = out;
        combined.extend(err);

        match status {
            Ok(status) if status.success() => Ok(combined),
            Ok(status) => {
                let code = status.code().unwrap_or(-1);
                self.inner.record_exit_code(code);
                Err(ProcError::CombinedOutputFailed {
                    exit_code: code,
                    output: combined,
                })
            }
            Err(e) => Err(ProcError::io("wait for command", e)),
        }
    }

    /// Stop the process and clean up.
    ///
    /// Idempotent: a no-op if never started or already closed. Default
    /// mode signals the whole process group (graceful first, forceful
    /// after the grace window) so backgrounded descendants cannot
    /// survive as orphans. Detached mode signals only the direct child.
    pub async fn close(&self) -> Result<()> {
        if !self.started() || self.closed() {
            return Ok(());
        }

        let _guard = self.inner.lifecycle.lock().await;
        if self.closed() {
            return Ok(());
        }
        // Mark closed before signalling so the watcher never restarts a
        // child we are tearing down.
        self.inner.closed.store(true, Ordering::SeqCst);

        if let Some(group) = self.inner.group() {
            if let Err(e) = group.terminate() {
                warn!(error = %e, "failed to send termination signal");
            }
            if !self.inner.spec.detached {
                let deadline = tokio::time::Instant::now() + CLOSE_GRACE;
                while group.is_alive() && tokio::time::Instant::now() < deadline {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                if group.is_alive() {
                    debug!(pid = self.pid(), "grace window elapsed; killing process group");
                    if let Err(e) = group.kill() {
                        warn!(error = %e, "failed to kill process group");
                    }
                }
            }
        }

        // Wake the watcher's restart sleep and any pending reads.
        self.inner.cancel.cancel();

        {
            let mut streams = self.inner.streams.lock().expect("stream lock");
            streams.stdout = None;
            streams.stderr = None;
        }

        let staged = self.inner.staged.lock().expect("staged lock").take();
        if let Some(file) = staged {
            if let Err(e) = file.close() {
                warn!(error = %e, "failed to remove staged script file");
            }
        }

        info!(pid = self.pid(), "process closed");
        Ok(())
    }

    /// Next terminal outcome from the watcher: one per run (initial and
    /// each restart). `None` once the watcher has permanently stopped and
    /// the channel is closed.
    pub async fn wait(&self) -> Option<Completion> {
        let mut rx = self.inner.completion_rx.lock().await;
        rx.recv().await
    }

    pub fn started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// OS process id; zero until started.
    pub fn pid(&self) -> u32 {
        self.inner.pid.load(Ordering::SeqCst)
    }

    /// Last observed abnormal exit code; zero until one is observed, `-1`
    /// if the process was killed rather than exiting on its own.
    pub fn exit_code(&self) -> i32 {
        self.inner.exit_code.load(Ordering::SeqCst)
    }

    /// Restarts performed so far; never exceeds the policy limit.
    pub fn restart_count(&self) -> u32 {
        self.inner.restarts.load(Ordering::SeqCst)
    }

    pub fn labels(&self) -> &std::collections::BTreeMap<String, String> {
        self.inner.spec.labels()
    }

    /// Signalling target of the current child, if started.
    pub fn process_group(&self) -> Option<ProcessGroup> {
        self.inner.group()
    }

    /// Hand one output stream to the reader. Pipe handles can be taken
    /// once; a file sink is opened fresh from the start of the capture
    /// file (stdout only; both streams share the one file).
    pub(crate) async fn output_stream(
        &self,
        kind: StreamKind,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        match (self.inner.spec.sink(), kind) {
            (OutputSink::Pipes, StreamKind::Stdout) => {
                let taken = self.inner.streams.lock().expect("stream lock").stdout.take();
                taken
                    .map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>)
                    .ok_or(ProcError::StreamUnavailable("stdout"))
            }
            (OutputSink::Pipes, StreamKind::Stderr) => {
                let taken = self.inner.streams.lock().expect("stream lock").stderr.take();
                taken
                    .map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>)
                    .ok_or(ProcError::StreamUnavailable("stderr"))
            }
            (OutputSink::File(path), StreamKind::Stdout) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| ProcError::io("open capture file", e))?;
                Ok(Box::new(file))
            }
            (OutputSink::File(_), StreamKind::Stderr) => {
                Err(ProcError::StreamUnavailable("stderr"))
            }
        }
    }

    /// Forward the caller's cancellation into the internal source.
    fn link_caller(&self, caller: &CancelToken) {
        let token = caller.clone();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            inner.cancel.cancel();
        });
    }
}

/// Build and launch the OS process for the spec's execution mode. Used
/// by `start`, the one-shot path, and the watcher's restart loop.
pub(crate) fn spawn_child(state: &ProcState, force_pipes: bool) -> Result<Child> {
    let spec = &state.spec;

    let mut cmd = match spec.mode {
        ExecMode::Direct => {
            let argv = spec.commands.first().expect("validated non-empty");
            let mut cmd = Command::new(&argv[0]);
            cmd.args(&argv[1..]);
            cmd
        }
        ExecMode::ScriptInline => {
            let mut cmd = Command::new("bash");
            cmd.arg("-s");
            cmd.stdin(Stdio::piped());
            cmd
        }
        ExecMode::ScriptFile => {
            let path = state
                .staged
                .lock()
                .expect("staged lock")
                .as_ref()
                .map(|file| file.path().to_path_buf())
                .ok_or(ProcError::Closed)?;
            let mut cmd = Command::new("bash");
            cmd.arg(path);
            cmd
        }
    };

    cmd.envs(spec.envs.iter().map(|(k, v)| (k, v)));

    if !spec.detached {
        // Fresh process group so stop signals reach backgrounded
        // descendants; kill-on-drop as a last-resort backstop.
        cmd.process_group(0);
        cmd.kill_on_drop(true);
    }

    match spec.sink() {
        OutputSink::Pipes => {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        }
        OutputSink::File(path) if force_pipes => {
            debug!(path = %path.display(), "one-shot run overrides file sink with pipes");
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        }
        OutputSink::File(path) => {
            let open = || {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
            };
            let out = open().map_err(|e| ProcError::io("open output file", e))?;
            let err = open().map_err(|e| ProcError::io("open output file", e))?;
            cmd.stdout(Stdio::from(out));
            cmd.stderr(Stdio::from(err));
        }
    }

    debug!(mode = ?spec.mode, "starting command");
    let mut child = cmd
        .spawn()
        .map_err(|e| ProcError::io("start command", e))?;

    if spec.mode == ExecMode::ScriptInline {
        let mut stdin = child
            .stdin
            .take()
            .ok_or(ProcError::StreamUnavailable("stdin"))?;
        let body = spec.script_body();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(body.as_bytes()).await {
                warn!(error = %e, "failed to feed inline script to shell");
            }
            // Dropping stdin delivers EOF to the shell.
        });
    }

    state.record_pid(child.id().unwrap_or(0));

    {
        let mut streams = state.streams.lock().expect("stream lock");
        streams.stdout = child.stdout.take();
        streams.stderr = child.stderr.take();
    }

    Ok(child)
}
