//! End-to-end worker pool master scenarios, driven against a tiny `/bin/sh`
//! fake worker that speaks the newline-delimited JSON protocol.

use std::io::Write;
use std::time::Duration;

use concd::worker::{Master, MasterConfig, TaskMaster};

/// Writes a fake worker script to a tempfile and returns its path. The
/// script echoes back one `{"taskID":...,"status":0,"result":{"echo":args}}`
/// line per command line it reads, unless `hang` is set, in which case it
/// never responds (used to exercise the deadline sweep).
fn write_fake_worker(dir: &tempfile::TempDir, hang: bool) -> std::path::PathBuf {
    let path = dir.path().join("fake_worker.sh");
    let body = if hang {
        "#!/bin/sh\nwhile IFS= read -r line; do :; done\n".to_string()
    } else {
        r#"#!/bin/sh
while IFS= read -r line; do
  task_id=$(printf '%s' "$line" | sed -n 's/.*"task_id":"\([^"]*\)".*/\1/p')
  printf '{"taskID":"%s","status":0,"result":{"ok":true}}\n' "$task_id"
done
"#
        .to_string()
    };
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(body.as_bytes()).unwrap();
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    path
}

#[tokio::test]
async fn submit_and_complete_happy_path() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_fake_worker(&dir, false);

    let (master, ready) = Master::start(MasterConfig {
        pool_size: 1,
        program: "/bin/sh".to_string(),
        program_args: vec![script.to_string_lossy().to_string()],
        exec_max_seconds: 30,
        task_result_persist_max_seconds: 3600,
    })
    .await;
    assert_eq!(ready, 1);

    let task = master
        .submit("calc".to_string(), serde_json::json!({"x": 1}))
        .await
        .expect("submit should succeed");

    let mut finished = None;
    for _ in 0..50 {
        if let Some(t) = master.get(&task.task_id).await {
            if t.is_finished() {
                finished = Some(t);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let finished = finished.expect("task should finish within 5s");
    assert_eq!(finished.result, serde_json::json!({"ok": true}));
    assert!(finished.error.is_empty());

    master.stop().await;
}

#[tokio::test]
async fn queue_full_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_fake_worker(&dir, true);

    let (master, ready) = Master::start(MasterConfig {
        pool_size: 1,
        program: "/bin/sh".to_string(),
        program_args: vec![script.to_string_lossy().to_string()],
        exec_max_seconds: 30,
        task_result_persist_max_seconds: 3600,
    })
    .await;
    assert_eq!(ready, 1);

    // First submit occupies the sole worker (which will never respond).
    master
        .submit("a".to_string(), serde_json::json!({}))
        .await
        .expect("first submit should be queued");

    // Give the dispatcher a moment to drain the queue into the worker.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Second submit fills the bounded queue (capacity == pool_size == 1).
    master
        .submit("b".to_string(), serde_json::json!({}))
        .await
        .expect("second submit should still fit in the queue");

    // Third submit must fail fast.
    let err = master
        .submit("c".to_string(), serde_json::json!({}))
        .await
        .expect_err("queue should now be full");
    assert!(matches!(err, concd::error::MasterError::QueueFull));

    master.stop().await;
}

#[tokio::test]
async fn deadline_breach_restarts_worker_and_fails_task() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_fake_worker(&dir, true);

    let (master, ready) = Master::start(MasterConfig {
        pool_size: 1,
        program: "/bin/sh".to_string(),
        program_args: vec![script.to_string_lossy().to_string()],
        exec_max_seconds: 1,
        task_result_persist_max_seconds: 3600,
    })
    .await;
    assert_eq!(ready, 1);

    let task = master
        .submit("calc".to_string(), serde_json::json!({}))
        .await
        .expect("submit should succeed");

    let mut finished = None;
    for _ in 0..50 {
        if let Some(t) = master.get(&task.task_id).await {
            if t.is_finished() {
                finished = Some(t);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let finished = finished.expect("task should be failed by the deadline sweep within 5s");
    assert_eq!(finished.error, "Task execution limit reached");

    master.stop().await;
}
