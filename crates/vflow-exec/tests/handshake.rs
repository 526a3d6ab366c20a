//! Exercises the full parent/child exec handshake against a real child
//! process (spec §4.10, §8 "exec handshake" suspension points).

use std::time::Duration;

use vflow_exec::{ChildStatus, ParentHandshake};

fn test_child_path() -> String {
    env!("CARGO_BIN_EXE_vflow-exec-test-child").to_string()
}

#[tokio::test]
async fn child_reports_ready_after_reading_secret() {
    let mut handshake = ParentHandshake::spawn(&test_child_path(), &[], b"cfg", b"s3cr3t")
        .await
        .expect("spawn");

    let status = handshake
        .wait_for_ready(Duration::from_secs(5))
        .await
        .expect("status");
    assert!(matches!(status, ChildStatus::Ready { .. }));

    let exit = handshake.child_mut().wait().await.expect("child exit");
    assert!(exit.success());
}

#[tokio::test]
async fn child_reports_failed_when_config_says_so() {
    let mut handshake = ParentHandshake::spawn(&test_child_path(), &[], b"fail-me", b"s3cr3t")
        .await
        .expect("spawn");

    let status = handshake
        .wait_for_ready(Duration::from_secs(5))
        .await
        .expect("status");
    assert_eq!(
        status,
        ChildStatus::Failed {
            reason: "asked to fail by test config".to_string()
        }
    );

    let _ = handshake.child_mut().wait().await;
}

#[tokio::test]
async fn timeout_fires_when_no_status_is_written() {
    // "sleep" never touches the handshake pipes, so the parent's read
    // blocks until the timeout fires and the eofChar unblock kicks in.
    let mut handshake = ParentHandshake::spawn("sleep", &["2".to_string()], b"cfg", b"secret")
        .await
        .expect("spawn");

    let err = handshake
        .wait_for_ready(Duration::from_millis(100))
        .await
        .expect_err("should time out");
    assert_eq!(err.kind(), vflow_core::ErrorKind::Timeout);

    let _ = handshake.child_mut().kill().await;
}
