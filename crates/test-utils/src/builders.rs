#![allow(dead_code)]

use std::path::Path;

use procherd::spec::ProcessSpec;

/// A direct-mode spec for a single argv vector.
pub fn direct_spec(args: &[&str]) -> ProcessSpec {
    ProcessSpec::builder()
        .command(args.iter().copied())
        .build()
        .expect("valid direct spec")
}

/// An inline-script spec: the body is fed to the shell over stdin,
/// nothing touches the disk.
pub fn inline_spec(script: &str) -> ProcessSpec {
    ProcessSpec::builder()
        .script(script)
        .inline_script()
        .build()
        .expect("valid inline script spec")
}

/// A file-backed script spec staged under `dir`.
pub fn file_spec(script: &str, dir: &Path) -> ProcessSpec {
    ProcessSpec::builder()
        .script(script)
        .staging_dir(dir)
        .build()
        .expect("valid file script spec")
}
