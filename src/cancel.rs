// src/cancel.rs

//! Cancellation primitive.
//!
//! A `CancelSource` owns the ability to cancel; `CancelToken`s are cheap
//! clones handed to everything that should stop when the caller gives up:
//! the process watcher, the output reader's scan loop, the exclusive
//! runner's completion wait. Cancellation is level-triggered and
//! one-way: once cancelled, a token stays cancelled.
//!
//! A dropped source counts as cancellation: a token whose source has gone
//! away belongs to an abandoned caller, and everything watching it should
//! wind down rather than wait forever.

use std::sync::OnceLock;

use tokio::sync::watch;

/// The controlling half. Cloning shares the same underlying flag.
#[derive(Debug, Clone)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

/// The observing half, cheap to clone and safe to poll from any task.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Hand out a token observing this source.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Flip the flag. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token that is never cancelled; useful for callers without a
    /// deadline and for tests.
    pub fn never() -> Self {
        static NEVER: OnceLock<watch::Sender<bool>> = OnceLock::new();
        let tx = NEVER.get_or_init(|| watch::channel(false).0);
        CancelToken {
            rx: tx.subscribe(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the source is cancelled (or dropped).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Source dropped without an explicit cancel.
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_observes_cancel() {
        let source = CancelSource::new();
        let token = source.token();
        assert!(!token.is_cancelled());

        source.cancel();
        assert!(token.is_cancelled());
        token.cancelled().await;
    }

    #[tokio::test]
    async fn dropped_source_counts_as_cancelled() {
        let source = CancelSource::new();
        let token = source.token();
        drop(source);
        token.cancelled().await;
    }

    #[tokio::test]
    async fn never_token_stays_live() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
    }
}
