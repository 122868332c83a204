use std::time::Duration;

use procherd::cancel::{CancelSource, CancelToken};
use procherd::errors::ExitError;
use procherd::proc::ManagedProcess;
use procherd::stream::{ReadOptions, read_lines};
use procherd_test_utils::{builders, eventually, init_tracing, with_timeout};

#[tokio::test]
async fn echo_round_trip() {
    init_tracing();
    let proc = ManagedProcess::new(builders::direct_spec(&["echo", "hello"])).unwrap();
    let token = CancelToken::never();

    proc.start(&token).await.unwrap();
    assert!(proc.started());
    assert!(proc.pid() > 0);

    let mut output = String::new();
    read_lines(&proc, &token, ReadOptions::new().stdout(), |line| {
        output.push_str(line);
        output.push('\n');
    })
    .await
    .unwrap();
    assert_eq!(output, "hello\n");

    let outcome = with_timeout(5, proc.wait()).await;
    assert_eq!(outcome, Some(Ok(())));
    assert_eq!(proc.exit_code(), 0);

    proc.close().await.unwrap();
    assert!(proc.closed());
}

#[tokio::test]
async fn second_start_is_a_no_op() {
    init_tracing();
    let proc = ManagedProcess::new(builders::direct_spec(&["sleep", "1"])).unwrap();
    let token = CancelToken::never();

    proc.start(&token).await.unwrap();
    let pid = proc.pid();

    proc.start(&token).await.unwrap();
    assert!(proc.started());
    assert_eq!(proc.pid(), pid);

    proc.close().await.unwrap();
}

#[tokio::test]
async fn close_before_start_leaves_not_started() {
    init_tracing();
    let proc = ManagedProcess::new(builders::direct_spec(&["echo", "hello"])).unwrap();

    proc.close().await.unwrap();
    assert!(!proc.started());
    assert!(!proc.closed());
    assert_eq!(proc.pid(), 0);
    assert_eq!(proc.exit_code(), 0);
}

#[tokio::test]
async fn close_is_idempotent() {
    init_tracing();
    let proc = ManagedProcess::new(builders::direct_spec(&["sleep", "5"])).unwrap();
    let token = CancelToken::never();

    proc.start(&token).await.unwrap();
    proc.close().await.unwrap();
    proc.close().await.unwrap();
    assert!(proc.closed());
}

#[tokio::test]
async fn start_after_close_is_a_no_op() {
    init_tracing();
    let proc = ManagedProcess::new(builders::direct_spec(&["sleep", "5"])).unwrap();
    let token = CancelToken::never();

    proc.start(&token).await.unwrap();
    let pid = proc.pid();
    proc.close().await.unwrap();

    proc.start(&token).await.unwrap();
    assert_eq!(proc.pid(), pid);
    assert!(proc.closed());
}

#[tokio::test]
async fn error_exit_is_delivered_and_recorded() {
    init_tracing();
    let proc = ManagedProcess::new(builders::inline_spec("exit 1\n")).unwrap();
    let token = CancelToken::never();

    proc.start(&token).await.unwrap();
    let outcome = with_timeout(5, proc.wait()).await;
    assert_eq!(outcome, Some(Err(ExitError::NonZero(1))));
    assert_eq!(proc.exit_code(), 1);

    // The watcher has stopped permanently; the channel is closed.
    let closed = with_timeout(5, proc.wait()).await;
    assert_eq!(closed, None);

    proc.close().await.unwrap();
}

#[tokio::test]
async fn cancellation_forces_termination() {
    init_tracing();
    let proc = ManagedProcess::new(builders::direct_spec(&["sleep", "100"])).unwrap();
    let source = CancelSource::new();

    proc.start(&source.token()).await.unwrap();
    let group = proc.process_group().unwrap();
    assert!(group.is_alive());

    tokio::time::sleep(Duration::from_millis(200)).await;
    source.cancel();

    let outcome = with_timeout(5, proc.wait()).await;
    assert_eq!(outcome, Some(Err(ExitError::Killed)));
    assert_eq!(proc.exit_code(), -1);

    assert!(eventually(Duration::from_secs(2), || !group.is_alive()).await);
}
