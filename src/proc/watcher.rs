// src/proc/watcher.rs

//! Background exit watcher.
//!
//! One watcher task per engine instance. It blocks on the child's exit,
//! delivers each run's terminal outcome on the completion channel, and
//! drives the restart loop. Dropping the sender when the watcher stops
//! permanently is what closes the channel, exactly once.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::{Completion, ExitError};
use crate::proc::engine::{self, ProcState};

pub(crate) async fn watch(state: Arc<ProcState>, mut child: Child, tx: mpsc::Sender<Completion>) {
    let token = state.cancel.token();
    let mut restarts: u32 = 0;

    loop {
        let status = tokio::select! {
            _ = token.cancelled() => {
                // Cancellation takes the forceful path immediately, so an
                // abandoned timeout cannot leak the group.
                if let Some(group) = state.group() {
                    if let Err(e) = group.kill() {
                        warn!(error = %e, "failed to kill process group on cancellation");
                    }
                }
                let reaped = child.wait().await;
                state.record_exit_code(-1);
                let outcome = match reaped {
                    Ok(_) => Err(ExitError::Killed),
                    Err(e) => Err(ExitError::Wait(e.to_string())),
                };
                let _ = tx.send(outcome).await;
                debug!("watcher stopping after cancellation");
                return;
            }
            status = child.wait() => status,
        };

        match status {
            Ok(status) if status.success() => {
                debug!("process exited successfully");
                let _ = tx.send(Ok(())).await;
                return;
            }
            Ok(status) => {
                let code = status.code().unwrap_or(-1);
                state.record_exit_code(code);
                if code == -1 {
                    if token.is_cancelled() || state.is_closed() {
                        debug!("process was terminated by close or cancellation");
                    } else {
                        warn!("process was terminated (exit code -1) for unknown reasons");
                    }
                    let _ = tx.send(Err(ExitError::Killed)).await;
                } else {
                    debug!(exit_code = code, "process exited with non-zero status");
                    let _ = tx.send(Err(ExitError::NonZero(code))).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "error waiting for process to finish");
                let _ = tx.send(Err(ExitError::Wait(e.to_string()))).await;
                return;
            }
        }

        // Error exit: restart if a policy allows it.
        let Some(policy) = state.spec.restart() else {
            return;
        };
        if restarts >= policy.limit {
            warn!(restarts, "process exited with error; restart limit reached");
            return;
        }
        if state.is_closed() || token.is_cancelled() {
            return;
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(policy.interval) => {}
        }

        match engine::spawn_child(&state, false) {
            Ok(next) => {
                child = next;
                restarts += 1;
                state.restarts.store(restarts, Ordering::SeqCst);
                info!(restarts, limit = policy.limit, "process restarted after error exit");
            }
            Err(e) => {
                warn!(error = %e, "failed to restart command");
                return;
            }
        }
    }
}
