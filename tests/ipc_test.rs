use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tracewrap::ipc;

#[tokio::test]
async fn valid_message_is_forwarded_and_file_removed() {
    let session_id = format!("ipc-test-{}", std::process::id());
    let dir = ipc::bus_dir(&session_id);

    let (tx, mut rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let run_session = session_id.clone();
    let handle = tokio::spawn(ipc::run(run_session, tx, run_cancel));

    // Give the poll loop a moment to create the directory.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(dir.exists());

    let msg_path = dir.join("msg-1000000-abc123.json");
    std::fs::write(
        &msg_path,
        r#"{"type":"tool_execution","sessionId":"external","timestamp":123,"data":{"execution_id":"e1","tool_name":"grep"}}"#,
    )
    .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event should arrive within the poll interval")
        .expect("channel should not be closed");
    assert_eq!(event.type_tag(), "tool_execution");
    assert_eq!(event.session_id, "external");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!msg_path.exists(), "consumed message should be deleted");

    cancel.cancel();
    handle.await.unwrap().unwrap();
    assert!(!dir.exists(), "bus directory should be removed on shutdown");
}

#[tokio::test]
async fn file_write_complete_message_is_forwarded() {
    let session_id = format!("ipc-test-fileop-{}", std::process::id());
    let dir = ipc::bus_dir(&session_id);

    let (tx, mut rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let run_session = session_id.clone();
    let handle = tokio::spawn(ipc::run(run_session, tx, run_cancel));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let msg_path = dir.join("msg-1000000-fw001.json");
    std::fs::write(
        &msg_path,
        r#"{"type":"file_write_complete","sessionId":"external","timestamp":123,"data":{"path":"/tmp/out.txt","size":42}}"#,
    )
    .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event should arrive within the poll interval")
        .expect("channel should not be closed");
    assert_eq!(event.type_tag(), "file_write_complete");

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_message_is_dropped_without_forwarding() {
    let session_id = format!("ipc-test-bad-{}", std::process::id());
    let dir = ipc::bus_dir(&session_id);

    let (tx, mut rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let run_session = session_id.clone();
    let handle = tokio::spawn(ipc::run(run_session, tx, run_cancel));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let msg_path = dir.join("msg-1000000-bad456.json");
    std::fs::write(&msg_path, "not json").unwrap();

    let result = tokio::time::timeout(Duration::from_millis(800), rx.recv()).await;
    assert!(result.is_err(), "no event should be forwarded for a malformed message");

    cancel.cancel();
    handle.await.unwrap().unwrap();
}
