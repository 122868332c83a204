use std::sync::Arc;
use std::time::Duration;

use procherd::cancel::{CancelSource, CancelToken};
use procherd::errors::{ExitError, ProcError};
use procherd::proc::ManagedProcess;
use procherd::stream::{ReadOptions, read_lines};
use procherd_test_utils::{builders, init_tracing, with_timeout};

#[tokio::test]
async fn thousand_lines_in_order_without_loss() {
    init_tracing();
    let proc = ManagedProcess::new(builders::inline_spec(
        "for i in $(seq 1 1000); do echo \"line $i\"; done\n",
    ))
    .unwrap();
    let token = CancelToken::never();
    proc.start(&token).await.unwrap();

    let mut lines = Vec::new();
    with_timeout(
        10,
        read_lines(&proc, &token, ReadOptions::new().stdout(), |line| {
            lines.push(line.to_string());
        }),
    )
    .await
    .unwrap();

    assert_eq!(lines.len(), 1000);
    assert_eq!(lines[0], "line 1");
    assert_eq!(lines[999], "line 1000");
    for (i, line) in lines.iter().enumerate() {
        assert_eq!(line, &format!("line {}", i + 1));
    }

    proc.close().await.unwrap();
}

#[tokio::test]
async fn both_streams_concatenate_stdout_then_stderr() {
    init_tracing();
    let proc = ManagedProcess::new(builders::inline_spec(
        "echo out1\necho out2\necho err1 >&2\necho err2 >&2\n",
    ))
    .unwrap();
    let token = CancelToken::never();
    proc.start(&token).await.unwrap();

    let mut lines = Vec::new();
    with_timeout(
        10,
        read_lines(
            &proc,
            &token,
            ReadOptions::new().stdout().stderr(),
            |line| lines.push(line.to_string()),
        ),
    )
    .await
    .unwrap();

    assert_eq!(lines, vec!["out1", "out2", "err1", "err2"]);
    proc.close().await.unwrap();
}

#[tokio::test]
async fn read_requires_a_started_process() {
    init_tracing();
    let proc = ManagedProcess::new(builders::direct_spec(&["echo", "hello"])).unwrap();
    let token = CancelToken::never();

    let err = read_lines(&proc, &token, ReadOptions::new().stdout(), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, ProcError::NotStarted));
}

#[tokio::test]
async fn read_after_close_is_rejected() {
    init_tracing();
    let proc = ManagedProcess::new(builders::direct_spec(&["sleep", "5"])).unwrap();
    let token = CancelToken::never();
    proc.start(&token).await.unwrap();
    proc.close().await.unwrap();

    let err = read_lines(&proc, &token, ReadOptions::new().stdout(), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, ProcError::Closed));
}

#[tokio::test]
async fn at_least_one_stream_must_be_selected() {
    init_tracing();
    let proc = ManagedProcess::new(builders::direct_spec(&["echo", "hello"])).unwrap();
    let token = CancelToken::never();
    proc.start(&token).await.unwrap();

    let err = read_lines(&proc, &token, ReadOptions::new(), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, ProcError::NoStreamSelected));

    proc.close().await.unwrap();
}

#[tokio::test]
async fn partial_final_line_is_delivered() {
    init_tracing();
    let proc = ManagedProcess::new(builders::inline_spec("printf 'line1\\npartial'\n")).unwrap();
    let token = CancelToken::never();
    proc.start(&token).await.unwrap();

    let mut lines = Vec::new();
    with_timeout(
        10,
        read_lines(&proc, &token, ReadOptions::new().stdout(), |line| {
            lines.push(line.to_string());
        }),
    )
    .await
    .unwrap();

    assert_eq!(lines, vec!["line1", "partial"]);
    proc.close().await.unwrap();
}

#[tokio::test]
async fn blank_lines_are_preserved() {
    init_tracing();
    let proc = ManagedProcess::new(builders::inline_spec("echo line1\necho\necho\necho line2\n"))
        .unwrap();
    let token = CancelToken::never();
    proc.start(&token).await.unwrap();

    let mut lines = Vec::new();
    with_timeout(
        10,
        read_lines(&proc, &token, ReadOptions::new().stdout(), |line| {
            lines.push(line.to_string());
        }),
    )
    .await
    .unwrap();

    assert_eq!(lines, vec!["line1", "", "", "line2"]);
    proc.close().await.unwrap();
}

#[tokio::test]
async fn long_line_survives_with_larger_buffer() {
    init_tracing();
    let proc = ManagedProcess::new(builders::inline_spec(
        "printf 'a%.0s' $(seq 1 8192); echo\n",
    ))
    .unwrap();
    let token = CancelToken::never();
    proc.start(&token).await.unwrap();

    let mut captured = String::new();
    with_timeout(
        10,
        read_lines(
            &proc,
            &token,
            ReadOptions::new().stdout().initial_buffer(16384),
            |line| captured = line.to_string(),
        ),
    )
    .await
    .unwrap();

    assert_eq!(captured.len(), 8192);
    assert!(captured.bytes().all(|b| b == b'a'));
    proc.close().await.unwrap();
}

#[tokio::test]
async fn wait_for_exit_surfaces_terminal_error() {
    init_tracing();
    let proc = ManagedProcess::new(builders::inline_spec("echo almost\nexit 3\n")).unwrap();
    let token = CancelToken::never();
    proc.start(&token).await.unwrap();

    let mut lines = Vec::new();
    let err = with_timeout(
        10,
        read_lines(
            &proc,
            &token,
            ReadOptions::new().stdout().wait_for_exit(),
            |line| lines.push(line.to_string()),
        ),
    )
    .await
    .unwrap_err();

    assert_eq!(lines, vec!["almost"]);
    assert!(matches!(err, ProcError::Exit(ExitError::NonZero(3))));
    proc.close().await.unwrap();
}

#[tokio::test]
async fn cancellation_interrupts_a_blocked_read() {
    init_tracing();
    let proc = Arc::new(
        ManagedProcess::new(builders::inline_spec("echo started\nsleep 100\n")).unwrap(),
    );
    let source = CancelSource::new();
    proc.start(&source.token()).await.unwrap();

    let reader = {
        let proc = proc.clone();
        let token = source.token();
        tokio::spawn(async move {
            read_lines(&proc, &token, ReadOptions::new().stdout(), |_| {}).await
        })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    source.cancel();

    let result = with_timeout(5, reader).await.unwrap();
    assert!(matches!(result, Err(ProcError::Cancelled)));

    proc.close().await.unwrap();
}
