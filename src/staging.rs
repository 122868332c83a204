// src/staging.rs

//! Staged script files.
//!
//! File-backed script mode writes the assembled script to a temp file
//! under the spec's staging directory; the engine removes it on close.
//! [`remove_staged_scripts`] is the recovery path for files left behind
//! by a previous daemon instance that died before cleaning up.

use std::io::Write;
use std::path::Path;

use globset::Glob;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::errors::{ProcError, Result};

/// Default glob for staged script filenames.
pub const DEFAULT_SCRIPT_PATTERN: &str = "procherd-*.bash";

/// Header prepended to generated scripts assembled from command lists.
pub(crate) const SCRIPT_HEADER: &str = "#!/bin/bash

# fail the pipeline if any stage fails
set -o pipefail

# treat unset variables as errors
set -o nounset

# stop at the first failing command
set -o errexit

";

/// Create a staged script file under `dir` matching `pattern`, write the
/// body, and flush it to disk. The returned handle removes the file when
/// dropped; the engine closes it explicitly on `close`.
pub(crate) fn stage_script(dir: &Path, pattern: &str, body: &str) -> Result<NamedTempFile> {
    std::fs::create_dir_all(dir)
        .map_err(|e| ProcError::io(format!("create staging directory {}", dir.display()), e))?;

    let (prefix, suffix) = split_pattern(pattern);
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(|e| ProcError::io("create staged script file", e))?;

    file.write_all(body.as_bytes())
        .map_err(|e| ProcError::io("write staged script", e))?;
    file.flush()
        .map_err(|e| ProcError::io("flush staged script", e))?;
    if let Err(e) = file.as_file().sync_all() {
        warn!(error = %e, "failed to sync staged script to disk");
    }

    debug!(path = %file.path().display(), "staged script file");
    Ok(file)
}

/// Remove every file under `dir` whose name matches `pattern`.
///
/// Best-effort: a file that vanished concurrently or cannot be removed is
/// logged and skipped, never an error.
pub fn remove_staged_scripts(dir: &Path, pattern: &str) {
    let matcher = match Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher(),
        Err(e) => {
            warn!(pattern, error = %e, "invalid staged-script pattern; skipping sweep");
            return;
        }
    };

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "failed to read staging directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        if !matcher.is_match(&name) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => debug!(path = %entry.path().display(), "removed stale staged script"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "failed to remove staged script");
            }
        }
    }
}

/// Split a filename glob at its first `*` into a tempfile prefix/suffix
/// pair. A pattern without `*` becomes a bare prefix.
fn split_pattern(pattern: &str) -> (&str, &str) {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => (prefix, suffix),
        None => (pattern, ""),
    }
}
