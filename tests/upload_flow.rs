use bigfile_uploader::uploader::ContentHasher;
use bigfile_uploader::{
    MemoryRemoteStore, TaskEvent, TaskHandle, TaskSnapshot, TaskStatus, UploadError,
    UploadManager, UploaderConfig,
};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::timeout;

const MIB: usize = 1024 * 1024;
const WAIT: Duration = Duration::from_secs(20);

fn write_file(dir: &TempDir, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
    let data: Vec<u8> = (0..len).map(|i| (i % 241) as u8).collect();
    let path = dir.path().join(name);
    std::fs::write(&path, &data).unwrap();
    (path, data)
}

fn manager(store: &MemoryRemoteStore, chunk_size: u64) -> UploadManager {
    UploadManager::new(
        Arc::new(store.clone()),
        UploaderConfig {
            chunk_size,
            hash_slice_size: 64 * 1024,
            ..UploaderConfig::default()
        },
    )
}

async fn wait_status(handle: &TaskHandle, status: TaskStatus) -> TaskSnapshot {
    match timeout(WAIT, handle.wait_for(|s| s.status == status)).await {
        Ok(snapshot) => snapshot.unwrap(),
        Err(_) => panic!("timed out waiting for {status}, last: {:?}", handle.snapshot()),
    }
}

/// Drain snapshot events until the task settles
async fn collect_snapshots(rx: &mut broadcast::Receiver<TaskEvent>) -> Vec<TaskSnapshot> {
    let mut snapshots = Vec::new();
    loop {
        let event = match timeout(WAIT, rx.recv()).await.expect("timed out waiting for events") {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
        };
        if let TaskEvent::Snapshot(snapshot) = event {
            let settled = snapshot.status.is_terminal() || snapshot.status == TaskStatus::Paused;
            snapshots.push(snapshot);
            if settled {
                return snapshots;
            }
        }
    }
}

fn statuses(snapshots: &[TaskSnapshot]) -> Vec<TaskStatus> {
    let mut out: Vec<TaskStatus> = Vec::new();
    for s in snapshots {
        if out.last() != Some(&s.status) {
            out.push(s.status);
        }
    }
    out
}

async fn content_hash(path: &Path) -> String {
    ContentHasher::default().hash_file(path).await.unwrap()
}

#[tokio::test]
async fn test_failed_chunk_then_resume_uploads_only_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let (path, data) = write_file(&dir, "video.mp4", 10 * MIB);
    let store = MemoryRemoteStore::new();
    store.fail_chunk(3, 1).await;

    let manager = manager(&store, 2 * MIB as u64);
    let handle = manager.enqueue(&path).await.unwrap();
    assert_eq!(handle.snapshot().total_chunks, 5);

    let mut rx = handle.subscribe();
    handle.start().await.unwrap();
    let first = collect_snapshots(&mut rx).await;

    let failed = first.last().unwrap();
    assert_eq!(failed.status, TaskStatus::Error);
    assert_eq!(failed.uploaded_chunks, vec![0, 1, 2]);
    assert!(failed.error.as_deref().unwrap().starts_with("Chunk 3 upload failed"));
    assert_eq!(store.upload_log().await, vec![0, 1, 2, 3]);

    handle.resume().await.unwrap();
    let done = wait_status(&handle, TaskStatus::Completed).await;

    assert_eq!(store.upload_log().await, vec![0, 1, 2, 3, 3, 4]);
    assert_eq!(store.progress_calls().await, 1);
    assert_eq!(store.merge_calls().await, 1);
    assert_eq!(done.uploaded_chunks, vec![0, 1, 2, 3, 4]);
    assert_eq!(done.percent, 100);
    assert!(done.error.is_none());

    let hash = done.content_hash.unwrap();
    let stored = store.file(&hash).await.unwrap();
    assert_eq!(stored.data.as_ref(), data.as_slice());
    assert_eq!(done.final_url.as_deref(), Some(stored.url.as_str()));
}

#[tokio::test]
async fn test_existing_file_completes_without_transfer() {
    let dir = tempfile::tempdir().unwrap();
    let (path, data) = write_file(&dir, "report.pdf", 3 * MIB + 5);
    let store = MemoryRemoteStore::new();
    let hash = content_hash(&path).await;
    store.insert_file(&hash, "report.pdf", data).await;

    let manager = manager(&store, 2 * MIB as u64);
    let handle = manager.enqueue(&path).await.unwrap();
    assert_eq!(handle.snapshot().status, TaskStatus::Pending);

    let mut rx = handle.subscribe();
    handle.start().await.unwrap();
    let snapshots = collect_snapshots(&mut rx).await;

    assert_eq!(
        statuses(&snapshots),
        vec![TaskStatus::Hashing, TaskStatus::Checking, TaskStatus::Completed]
    );
    let done = snapshots.last().unwrap();
    assert_eq!(done.percent, 100);
    assert_eq!(done.content_hash.as_deref(), Some(hash.as_str()));
    assert_eq!(
        done.final_url.as_deref(),
        Some(format!("memory://{}/report.pdf", hash).as_str())
    );
    assert_eq!(store.upload_calls().await, 0);
    assert_eq!(store.merge_calls().await, 0);
}

#[tokio::test]
async fn test_pause_and_resume_never_resend_acknowledged_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let (path, data) = write_file(&dir, "notes.txt", 20);
    let store = MemoryRemoteStore::new();
    store.hold_uploads();
    store.release_uploads(2);

    let manager = manager(&store, 4);
    let handle = manager.enqueue(&path).await.unwrap();
    let mut rx = handle.subscribe();
    handle.start().await.unwrap();

    let before = timeout(WAIT, handle.wait_for(|s| s.uploaded_chunks.len() == 2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before.status, TaskStatus::Uploading);
    assert_eq!(before.percent, 40);

    handle.pause().await.unwrap();
    assert!(matches!(
        handle.pause().await,
        Err(UploadError::InvalidCommand {
            command: "pause",
            status: TaskStatus::Paused
        })
    ));
    let paused = handle.snapshot();
    assert_eq!(paused.status, TaskStatus::Paused);
    assert_eq!(paused.uploaded_chunks, vec![0, 1]);
    assert!(paused.percent >= before.percent);
    let mut snapshots = collect_snapshots(&mut rx).await;

    store.open_gate();
    handle.resume().await.unwrap();
    snapshots.extend(collect_snapshots(&mut rx).await);

    assert_eq!(snapshots.last().unwrap().status, TaskStatus::Completed);
    assert_eq!(store.upload_log().await, vec![0, 1, 2, 3, 4]);
    let percents: Vec<u8> = snapshots.iter().map(|s| s.percent).collect();
    assert!(
        percents.windows(2).all(|w| w[0] <= w[1]),
        "percent went backwards: {percents:?}"
    );

    let hash = handle.snapshot().content_hash.unwrap();
    assert_eq!(store.file(&hash).await.unwrap().data.as_ref(), data.as_slice());
}

#[tokio::test]
async fn test_partial_upload_from_earlier_session_is_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let (path, data) = write_file(&dir, "archive.zip", 20);
    let store = MemoryRemoteStore::new();
    let hash = content_hash(&path).await;
    store
        .insert_chunks(
            &hash,
            5,
            [
                (0, Bytes::copy_from_slice(&data[0..4])),
                (1, Bytes::copy_from_slice(&data[4..8])),
            ],
        )
        .await;

    let manager = manager(&store, 4);
    let handle = manager.enqueue(&path).await.unwrap();
    handle.start().await.unwrap();
    let done = wait_status(&handle, TaskStatus::Completed).await;

    assert_eq!(store.upload_log().await, vec![2, 3, 4]);
    assert_eq!(done.uploaded_chunks, vec![0, 1, 2, 3, 4]);
    assert_eq!(store.file(&hash).await.unwrap().data.as_ref(), data.as_slice());
}

#[tokio::test]
async fn test_merge_failure_retry_does_not_reupload() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_file(&dir, "disk.img", 18);
    let store = MemoryRemoteStore::new();
    store.fail_merge(1).await;

    let manager = manager(&store, 4);
    let handle = manager.enqueue(&path).await.unwrap();
    let mut rx = handle.subscribe();
    handle.start().await.unwrap();
    let failed = collect_snapshots(&mut rx).await.pop().unwrap();

    assert_eq!(failed.status, TaskStatus::Error);
    assert!(failed.error.as_deref().unwrap().starts_with("Failed to merge chunks"));
    assert_eq!(failed.uploaded_chunks, vec![0, 1, 2, 3, 4]);

    handle.retry().await.unwrap();
    let retried = collect_snapshots(&mut rx).await;
    assert_eq!(statuses(&retried)[0], TaskStatus::Checking);
    assert_eq!(retried.last().unwrap().status, TaskStatus::Completed);

    assert_eq!(store.upload_calls().await, 5);
    assert_eq!(store.merge_calls().await, 2);
    assert_eq!(store.check_calls().await, 2);
}

#[tokio::test]
async fn test_existence_check_failure_then_retry() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_file(&dir, "a.bin", 9);
    let store = MemoryRemoteStore::new();
    store.fail_check(1).await;

    let manager = manager(&store, 4);
    let handle = manager.enqueue(&path).await.unwrap();
    handle.start().await.unwrap();
    let failed = wait_status(&handle, TaskStatus::Error).await;
    assert!(failed.error.unwrap().starts_with("Existence check failed"));
    assert!(failed.content_hash.is_some());

    assert!(matches!(
        handle.start().await,
        Err(UploadError::InvalidCommand { command: "start", .. })
    ));
    handle.retry().await.unwrap();
    wait_status(&handle, TaskStatus::Completed).await;
    assert_eq!(store.check_calls().await, 2);
}

#[tokio::test]
async fn test_failed_reconciliation_leaves_task_resumable() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_file(&dir, "b.bin", 12);
    let store = MemoryRemoteStore::new();
    store.hold_uploads();
    store.release_uploads(1);
    store.fail_progress(1).await;

    let manager = manager(&store, 4);
    let handle = manager.enqueue(&path).await.unwrap();
    handle.start().await.unwrap();
    timeout(WAIT, handle.wait_for(|s| s.uploaded_chunks == vec![0]))
        .await
        .unwrap()
        .unwrap();
    handle.pause().await.unwrap();

    store.open_gate();
    handle.resume().await.unwrap();
    let failed = wait_status(&handle, TaskStatus::Error).await;
    assert!(failed.error.unwrap().starts_with("Failed to query upload progress"));
    assert_eq!(failed.uploaded_chunks, vec![0]);

    handle.resume().await.unwrap();
    wait_status(&handle, TaskStatus::Completed).await;
    assert_eq!(store.upload_log().await, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_empty_file_is_merged_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_file(&dir, "empty.txt", 0);
    let store = MemoryRemoteStore::new();

    let manager = manager(&store, 2 * MIB as u64);
    let handle = manager.enqueue(&path).await.unwrap();
    assert_eq!(handle.snapshot().percent, 0);
    let mut rx = handle.subscribe();
    handle.start().await.unwrap();
    let snapshots = collect_snapshots(&mut rx).await;
    let done = wait_status(&handle, TaskStatus::Completed).await;

    for snapshot in &snapshots[..snapshots.len() - 1] {
        assert_eq!(snapshot.percent, 0, "{} reported progress early", snapshot.status);
    }
    assert_eq!(done.total_chunks, 0);
    assert_eq!(done.percent, 100);
    assert_eq!(done.content_hash.as_deref(), Some("d41d8cd98f00b204e9800998ecf8427e"));
    assert_eq!(store.upload_calls().await, 0);
    assert_eq!(store.merge_calls().await, 1);
}

#[tokio::test]
async fn test_cancel_paused_task() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_file(&dir, "c.bin", 12);
    let store = MemoryRemoteStore::new();
    store.hold_uploads();

    let manager = manager(&store, 4);
    let handle = manager.enqueue(&path).await.unwrap();
    handle.start().await.unwrap();
    wait_status(&handle, TaskStatus::Uploading).await;
    handle.pause().await.unwrap();

    handle.cancel().await.unwrap();
    assert_eq!(handle.snapshot().status, TaskStatus::Cancelled);
    assert!(matches!(handle.resume().await, Err(UploadError::TaskClosed)));

    let removed = manager.remove(handle.id()).await.unwrap();
    assert_eq!(removed.status, TaskStatus::Cancelled);
    assert!(manager.list().await.is_empty());
}

#[tokio::test]
async fn test_slow_subscriber_lags_but_sees_the_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_file(&dir, "many.bin", 16);
    let store = MemoryRemoteStore::new();

    let manager = UploadManager::new(
        Arc::new(store.clone()),
        UploaderConfig {
            chunk_size: 1,
            hash_slice_size: 4,
            event_capacity: 2,
            ..UploaderConfig::default()
        },
    );
    let handle = manager.enqueue(&path).await.unwrap();
    let mut rx = handle.subscribe();
    handle.start().await.unwrap();
    wait_status(&handle, TaskStatus::Completed).await;

    assert!(matches!(
        rx.recv().await,
        Err(broadcast::error::RecvError::Lagged(_))
    ));
    let snapshots = collect_snapshots(&mut rx).await;
    assert_eq!(snapshots.last().unwrap().status, TaskStatus::Completed);
    assert_eq!(handle.snapshot().uploaded_chunks.len(), 16);
    assert_eq!(store.upload_calls().await, 16);
}
