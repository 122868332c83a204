// src/proc/mod.rs

//! Process lifecycle engine.
//!
//! - [`engine`] owns construction, start, close, and the one-shot
//!   combined-output path.
//! - [`group`] is the process-group signalling handle.
//! - `watcher` (crate-private) blocks on child exit and drives restarts.

pub mod engine;
pub mod group;
pub(crate) mod watcher;

pub use engine::ManagedProcess;
pub use group::ProcessGroup;
