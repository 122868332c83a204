// src/lib.rs

pub mod cancel;
pub mod cli;
pub mod errors;
pub mod logging;
pub mod proc;
pub mod runner;
pub mod spec;
pub mod staging;
pub mod stream;

use std::time::Duration;

use tracing::{info, warn};

use crate::cancel::CancelSource;
use crate::cli::CliArgs;
use crate::errors::{ProcError, Result};
use crate::proc::ManagedProcess;
use crate::spec::{ProcessSpec, RestartPolicy};
use crate::stream::ReadOptions;

/// High-level entry point used by `main.rs`.
///
/// Builds a spec from the CLI arguments, starts the process, streams its
/// output to stdout, and returns the exit code to report.
pub async fn run(args: CliArgs) -> Result<i32> {
    let mut builder = ProcessSpec::builder().command(args.command);
    if args.script {
        builder = builder.script_mode();
    }
    if args.detached {
        builder = builder.detached();
    }
    builder = builder.envs(args.envs);
    if let Some(limit) = args.restart_limit {
        builder = builder.restart(RestartPolicy {
            limit,
            interval: Duration::from_secs(args.restart_interval),
        });
    }
    let spec = builder.build()?;

    let source = CancelSource::new();

    // Ctrl-C cancels the run, which force-terminates the process group.
    {
        let source = source.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, cancelling run");
                source.cancel();
            }
        });
    }

    if let Some(secs) = args.timeout {
        let source = source.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!(timeout_secs = secs, "timeout elapsed, cancelling run");
            source.cancel();
        });
    }

    let token = source.token();
    let proc = ManagedProcess::new(spec)?;
    proc.start(&token).await?;

    let read = stream::read_lines(
        &proc,
        &token,
        ReadOptions::new().stdout().stderr(),
        |line| println!("{line}"),
    )
    .await;
    match read {
        Ok(()) | Err(ProcError::Cancelled) => {}
        Err(e) => warn!(error = %e, "output read ended with error"),
    }

    // Follow the full restart sequence; the channel closes when the
    // watcher permanently stops.
    let mut last = None;
    while let Some(outcome) = proc.wait().await {
        last = Some(outcome);
    }
    proc.close().await?;

    let code = match last {
        Some(Ok(())) | None => 0,
        Some(Err(_)) => match proc.exit_code() {
            code if code > 0 => code,
            _ => 1,
        },
    };
    Ok(code)
}
