// src/proc/group.rs

//! Process-group signalling.
//!
//! Non-detached children lead a fresh process group, so one signal
//! reaches every descendant they background. This is what keeps
//! diagnostics from leaking orphaned `sleep`/`watch` loops across a
//! fleet. Detached children are signalled individually.

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::Pid;

/// Handle on the signalling target of one spawned child: either the
/// whole process group it leads, or just the child itself (detached
/// mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup {
    pid: Pid,
    whole_group: bool,
}

impl ProcessGroup {
    pub fn new(pid: u32, whole_group: bool) -> Self {
        Self {
            pid: Pid::from_raw(pid as i32),
            whole_group,
        }
    }

    /// Graceful stop (SIGTERM).
    pub fn terminate(&self) -> std::io::Result<()> {
        self.signal(Signal::SIGTERM)
    }

    /// Forceful stop (SIGKILL).
    pub fn kill(&self) -> std::io::Result<()> {
        self.signal(Signal::SIGKILL)
    }

    /// True while at least one member of the target still exists.
    pub fn is_alive(&self) -> bool {
        let probed = if self.whole_group {
            killpg(self.pid, None)
        } else {
            kill(self.pid, None)
        };
        !matches!(probed, Err(Errno::ESRCH))
    }

    /// Deliver `sig` to the target. A "no such process" response means
    /// the target already exited and counts as success.
    fn signal(&self, sig: Signal) -> std::io::Result<()> {
        let sent = if self.whole_group {
            killpg(self.pid, sig)
        } else {
            kill(self.pid, sig)
        };
        match sent {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(std::io::Error::from_raw_os_error(errno as i32)),
        }
    }
}
