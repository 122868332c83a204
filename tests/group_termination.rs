use std::sync::{Arc, Mutex};
use std::time::Duration;

use procherd::cancel::CancelToken;
use procherd::proc::{ManagedProcess, ProcessGroup};
use procherd::spec::ProcessSpec;
use procherd::stream::{ReadOptions, read_lines};
use procherd_test_utils::{builders, eventually, init_tracing, with_timeout};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_terminates_backgrounded_descendants() {
    init_tracing();
    let proc = ManagedProcess::new(builders::inline_spec(
        "sleep 100 &\nsleep 100 &\nwait\n",
    ))
    .unwrap();
    let token = CancelToken::never();

    proc.start(&token).await.unwrap();
    let group = proc.process_group().unwrap();

    // Let the shell fork its children before tearing down.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(group.is_alive());

    with_timeout(10, proc.close()).await.unwrap();

    // No member of the group survives close in default mode.
    assert!(eventually(Duration::from_secs(4), || !group.is_alive()).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn detached_children_survive_close() {
    init_tracing();
    let spec = ProcessSpec::builder()
        .script("sleep 100 &\necho $!\nwait\n")
        .inline_script()
        .detached()
        .build()
        .unwrap();
    let proc = Arc::new(ManagedProcess::new(spec).unwrap());
    let token = CancelToken::never();

    proc.start(&token).await.unwrap();

    let lines = Arc::new(Mutex::new(Vec::new()));
    let reader = {
        let proc = proc.clone();
        let token = token.clone();
        let lines = lines.clone();
        tokio::spawn(async move {
            read_lines(&proc, &token, ReadOptions::new().stdout(), |line| {
                lines.lock().unwrap().push(line.to_string());
            })
            .await
        })
    };

    // Wait for the shell to report the backgrounded pid.
    assert!(
        eventually(Duration::from_secs(5), || !lines.lock().unwrap().is_empty()).await
    );
    let sleeper_pid: u32 = lines.lock().unwrap()[0].parse().unwrap();
    let sleeper = ProcessGroup::new(sleeper_pid, false);
    assert!(sleeper.is_alive());

    with_timeout(10, proc.close()).await.unwrap();
    let _ = with_timeout(5, reader).await;

    // The intentionally backgrounded child outlives the invocation.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(sleeper.is_alive());

    // Clean up the survivor so the test suite itself does not leak.
    sleeper.kill().unwrap();
    assert!(eventually(Duration::from_secs(2), || !sleeper.is_alive()).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_converges_with_a_natural_exit() {
    init_tracing();
    let proc = ManagedProcess::new(builders::inline_spec("echo done\n")).unwrap();
    let token = CancelToken::never();

    proc.start(&token).await.unwrap();
    let group = proc.process_group().unwrap();

    // Give the process time to exit on its own, then close anyway.
    let outcome = with_timeout(5, proc.wait()).await;
    assert_eq!(outcome, Some(Ok(())));

    with_timeout(10, proc.close()).await.unwrap();
    assert!(proc.closed());
    assert!(eventually(Duration::from_secs(2), || !group.is_alive()).await);
}
