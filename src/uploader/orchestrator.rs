//! Per-task upload state machine
//!
//! Each task runs as one actor that owns the [`UploadTask`] and its checkpoint.
//! The actor multiplexes user commands, hasher events, worker events and the
//! results of remote calls in a single `select!` loop. Spawned units never
//! touch the task directly; they report through channels.
//!
//! Units from a superseded attempt (after a pause, retry or cancel) are
//! discarded: worker and hasher channels are dropped, and remote call results
//! carry the attempt number they were started under.

use crate::events::{NoticeLevel, TaskEvent, TaskEventPublisher};
use crate::remote::{RemoteCheckResult, RemoteStore};
use crate::uploader::UploaderConfig;
use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::hasher::{ContentHasher, HasherEvent};
use crate::uploader::progress::ProgressSample;
use crate::uploader::task::{TaskId, TaskSnapshot, TaskStatus, UploadTask};
use crate::uploader::worker::{ChunkTransferWorker, TransferJob, WorkerEvent};
use bigfile_api::models::MergedFile;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const COMMAND_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandKind {
    Start,
    Pause,
    Resume,
    Retry,
    Cancel,
}

impl CommandKind {
    fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Start => "start",
            CommandKind::Pause => "pause",
            CommandKind::Resume => "resume",
            CommandKind::Retry => "retry",
            CommandKind::Cancel => "cancel",
        }
    }
}

struct Command {
    kind: CommandKind,
    reply: oneshot::Sender<UploadResult<()>>,
}

/// Remote call in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Check,
    Reconcile,
    Merge,
}

/// Result of a remote call, delivered back to the actor
enum OpEvent {
    Checked(Result<RemoteCheckResult, String>),
    ProgressQueried(Result<BTreeSet<u64>, String>),
    Merged(Result<MergedFile, String>),
}

/// Client side of a running task
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    commands: mpsc::Sender<Command>,
    publisher: TaskEventPublisher,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// `PENDING -> HASHING`
    pub async fn start(&self) -> UploadResult<()> {
        self.send(CommandKind::Start).await
    }

    /// Abandon the active transfer; `UPLOADING -> PAUSED`
    pub async fn pause(&self) -> UploadResult<()> {
        self.send(CommandKind::Pause).await
    }

    /// Reconcile with the store, then continue uploading
    pub async fn resume(&self) -> UploadResult<()> {
        self.send(CommandKind::Resume).await
    }

    /// Leave `ERROR` by checking the store again (or re-hashing if no hash exists)
    pub async fn retry(&self) -> UploadResult<()> {
        self.send(CommandKind::Retry).await
    }

    /// Stop everything; the task ends in `CANCELLED`
    pub async fn cancel(&self) -> UploadResult<()> {
        self.send(CommandKind::Cancel).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.publisher.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<TaskSnapshot> {
        self.publisher.watch()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.publisher.latest()
    }

    /// Wait until the latest snapshot satisfies `predicate`
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&TaskSnapshot) -> bool,
    ) -> UploadResult<TaskSnapshot> {
        let mut rx = self.publisher.watch();
        let snapshot = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| UploadError::TaskClosed)?;
        Ok(snapshot.clone())
    }

    /// Wait until the task stops making progress on its own
    pub async fn wait_until_settled(&self) -> UploadResult<TaskSnapshot> {
        self.wait_for(|s| s.status.is_terminal() || s.status == TaskStatus::Paused)
            .await
    }

    async fn send(&self, kind: CommandKind) -> UploadResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command { kind, reply })
            .await
            .map_err(|_| UploadError::TaskClosed)?;
        rx.await.map_err(|_| UploadError::TaskClosed)?
    }
}

/// Per-task state machine
pub struct UploadOrchestrator {
    task: UploadTask,
    store: Arc<dyn RemoteStore>,
    hasher: ContentHasher,
    worker: ChunkTransferWorker,
    publisher: TaskEventPublisher,

    attempt: u64,
    cancel: CancellationToken,
    pending: Option<Pending>,
    hasher_rx: Option<mpsc::UnboundedReceiver<HasherEvent>>,
    worker_rx: Option<mpsc::UnboundedReceiver<WorkerEvent>>,
    worker_handle: Option<JoinHandle<()>>,
    op_handle: Option<JoinHandle<()>>,
    op_tx: mpsc::UnboundedSender<(u64, OpEvent)>,
    op_rx: mpsc::UnboundedReceiver<(u64, OpEvent)>,
}

impl UploadOrchestrator {
    /// Spawn the actor for `task` and return its handle
    pub fn spawn(task: UploadTask, store: Arc<dyn RemoteStore>, config: &UploaderConfig) -> TaskHandle {
        let (orchestrator, handle, commands) = Self::build(task, store, config);
        tokio::spawn(orchestrator.run(commands));
        handle
    }

    fn build(
        task: UploadTask,
        store: Arc<dyn RemoteStore>,
        config: &UploaderConfig,
    ) -> (Self, TaskHandle, mpsc::Receiver<Command>) {
        let id = task.id();
        let publisher = TaskEventPublisher::new(config.event_capacity, task.snapshot());
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (op_tx, op_rx) = mpsc::unbounded_channel();

        let orchestrator = Self {
            task,
            worker: ChunkTransferWorker::new(store.clone()),
            store,
            hasher: ContentHasher::new(config.hash_slice_size),
            publisher: publisher.clone(),
            attempt: 0,
            cancel: CancellationToken::new(),
            pending: None,
            hasher_rx: None,
            worker_rx: None,
            worker_handle: None,
            op_handle: None,
            op_tx,
            op_rx,
        };
        let handle = TaskHandle {
            id,
            commands: commands_tx,
            publisher,
        };
        (orchestrator, handle, commands_rx)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!(target: "uploader::orchestrator", task_id = %self.task.id(), file = %self.task.path().display(), "Task actor started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command { kind, reply }) => {
                        let result = self.handle_command(kind);
                        let _ = reply.send(result);
                        if self.task.status() == TaskStatus::Cancelled {
                            break;
                        }
                    }
                    None => break,
                },
                event = recv_unit(&mut self.hasher_rx) => self.on_hasher_event(event),
                event = recv_unit(&mut self.worker_rx) => self.on_worker_event(event),
                Some((attempt, event)) = self.op_rx.recv() => {
                    if attempt == self.attempt {
                        self.on_op_event(event);
                    } else {
                        debug!(target: "uploader::orchestrator", task_id = %self.task.id(), attempt, current = self.attempt, "Discarding stale result");
                    }
                }
            }
        }

        self.stop_units();
        debug!(target: "uploader::orchestrator", task_id = %self.task.id(), status = %self.task.status(), "Task actor stopped");
    }

    fn handle_command(&mut self, kind: CommandKind) -> UploadResult<()> {
        let status = self.task.status();
        let invalid = || Err(UploadError::invalid_command(kind.as_str(), status));

        match kind {
            CommandKind::Start => {
                if status != TaskStatus::Pending {
                    return invalid();
                }
                self.begin_hashing();
            }
            CommandKind::Pause => match (status, self.pending) {
                (TaskStatus::Uploading, Some(Pending::Merge)) => return invalid(),
                (TaskStatus::Uploading, _) => {
                    self.drain_worker_progress();
                    self.stop_units();
                    self.task.reset_progress_sample();
                    self.transition(TaskStatus::Paused);
                }
                (TaskStatus::Paused, Some(Pending::Reconcile)) => {
                    debug!(target: "uploader::orchestrator", task_id = %self.task.id(), "Resume abandoned before reconciliation finished");
                    self.stop_units();
                }
                _ => return invalid(),
            },
            CommandKind::Resume => {
                let resumable = match status {
                    TaskStatus::Paused => true,
                    TaskStatus::Error => self.task.content_hash().is_some(),
                    _ => false,
                };
                if !resumable || self.pending.is_some() {
                    return invalid();
                }
                self.begin_reconcile();
            }
            CommandKind::Retry => {
                if status != TaskStatus::Error {
                    return invalid();
                }
                self.stop_units();
                if self.task.content_hash().is_some() {
                    self.begin_check();
                } else {
                    self.begin_hashing();
                }
            }
            CommandKind::Cancel => {
                if status.is_final() {
                    return invalid();
                }
                self.stop_units();
                self.transition(TaskStatus::Cancelled);
                self.publisher.notice(NoticeLevel::Info, "Upload cancelled");
            }
        }
        Ok(())
    }

    fn on_hasher_event(&mut self, event: Option<HasherEvent>) {
        match event {
            Some(HasherEvent::Progress(percent)) => self.publisher.hash_progress(percent),
            Some(HasherEvent::Complete(hash)) => {
                self.hasher_rx = None;
                info!(target: "uploader::orchestrator", task_id = %self.task.id(), hash = %hash, "Content hash computed");
                if !self.task.set_content_hash(hash) {
                    warn!(target: "uploader::orchestrator", task_id = %self.task.id(), "Content hash already set, keeping the first one");
                }
                self.begin_check();
            }
            Some(HasherEvent::Error(reason)) => {
                self.hasher_rx = None;
                self.fail(UploadError::HashCompute(reason));
            }
            None => {
                self.hasher_rx = None;
                if self.task.status() == TaskStatus::Hashing {
                    self.fail(UploadError::HashCompute("hasher stopped unexpectedly".to_string()));
                }
            }
        }
    }

    fn on_worker_event(&mut self, event: Option<WorkerEvent>) {
        match event {
            Some(WorkerEvent::Progress {
                indices,
                bytes_loaded,
                percent,
            }) => {
                trace!(target: "uploader::orchestrator", task_id = %self.task.id(), chunks = ?indices, bytes_loaded, percent, "Transfer progress");
                self.task.merge_checkpoint(indices);
                self.task.record_progress(ProgressSample::now(bytes_loaded));
                self.publish();
            }
            Some(WorkerEvent::Completed {
                content_hash,
                file_name,
                total_chunks,
            }) => {
                self.worker_rx = None;
                self.worker_handle = None;
                self.begin_merge(content_hash, file_name, total_chunks);
            }
            Some(WorkerEvent::Error { index, reason }) => {
                self.worker_rx = None;
                self.worker_handle = None;
                let error = match index {
                    Some(index) => UploadError::chunk_failed(index, reason),
                    None => UploadError::FileRead(reason),
                };
                self.fail(error);
            }
            None => {
                self.worker_rx = None;
                self.worker_handle = None;
                if self.task.status() == TaskStatus::Uploading && self.pending.is_none() {
                    self.fail(UploadError::FileRead(
                        "transfer worker stopped unexpectedly".to_string(),
                    ));
                }
            }
        }
    }

    fn on_op_event(&mut self, event: OpEvent) {
        self.pending = None;
        self.op_handle = None;

        match event {
            OpEvent::Checked(Ok(result)) if result.exists => {
                info!(target: "uploader::orchestrator", task_id = %self.task.id(), "File already stored, skipping transfer");
                self.task.seed_checkpoint(0..self.task.total_chunks());
                self.task.set_final_url(result.final_url);
                self.task.mark_complete_progress();
                self.publisher
                    .notice(NoticeLevel::Success, "Instant upload: file already exists");
                self.transition(TaskStatus::Completed);
            }
            OpEvent::Checked(Ok(result)) => {
                let seeded = result.uploaded_chunks.unwrap_or_default();
                debug!(target: "uploader::orchestrator", task_id = %self.task.id(), seeded = seeded.len(), "Checkpoint seeded from store");
                self.task.seed_checkpoint(seeded);
                self.begin_transfer();
            }
            OpEvent::Checked(Err(reason)) => self.fail(UploadError::ExistenceCheck(reason)),
            OpEvent::ProgressQueried(Ok(chunks)) => {
                let added = self.task.merge_checkpoint(chunks);
                debug!(target: "uploader::orchestrator", task_id = %self.task.id(), added, "Checkpoint reconciled");
                self.begin_transfer();
            }
            OpEvent::ProgressQueried(Err(reason)) => self.fail(UploadError::ProgressQuery(reason)),
            OpEvent::Merged(Ok(file)) => {
                info!(target: "uploader::orchestrator", task_id = %self.task.id(), url = ?file.url, "Upload completed");
                self.task.set_final_url(file.url);
                self.task.mark_complete_progress();
                self.publisher.notice(
                    NoticeLevel::Success,
                    format!("{} uploaded", self.task.file_name()),
                );
                self.transition(TaskStatus::Completed);
            }
            OpEvent::Merged(Err(reason)) => self.fail(UploadError::Merge(reason)),
        }
    }

    fn begin_hashing(&mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.hasher_rx = Some(rx);
        self.hasher
            .spawn(self.task.path().to_path_buf(), self.cancel.clone(), tx);
        self.task.set_error(None);
        self.transition(TaskStatus::Hashing);
    }

    fn begin_check(&mut self) {
        let Some(hash) = self.task.content_hash().map(str::to_string) else {
            self.begin_hashing();
            return;
        };
        let store = self.store.clone();
        let file_name = self.task.file_name().to_string();
        let file_size = self.task.file_size();

        self.spawn_op(Pending::Check, async move {
            OpEvent::Checked(
                store
                    .check_file(&hash, &file_name, file_size)
                    .await
                    .map_err(|e| e.to_string()),
            )
        });
        self.task.set_error(None);
        self.transition(TaskStatus::Checking);
    }

    /// Re-query server-side progress before a resume; status is unchanged until it answers
    fn begin_reconcile(&mut self) {
        let Some(hash) = self.task.content_hash().map(str::to_string) else {
            return;
        };
        let store = self.store.clone();

        debug!(target: "uploader::orchestrator", task_id = %self.task.id(), "Reconciling checkpoint before resume");
        self.spawn_op(Pending::Reconcile, async move {
            OpEvent::ProgressQueried(store.upload_progress(&hash).await.map_err(|e| e.to_string()))
        });
    }

    fn begin_transfer(&mut self) {
        let Some(hash) = self.task.content_hash().map(str::to_string) else {
            self.fail(UploadError::HashCompute("content hash missing".to_string()));
            return;
        };

        let job = TransferJob {
            path: self.task.path().to_path_buf(),
            content_hash: hash,
            file_name: self.task.file_name().to_string(),
            file_size: self.task.file_size(),
            chunk_size: self.task.chunk_size(),
            total_chunks: self.task.total_chunks(),
            checkpoint: self.task.uploaded_chunks().clone(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        self.worker_rx = Some(rx);
        self.worker_handle = Some(self.worker.spawn(job, self.cancel.clone(), tx));

        self.task.reset_progress_sample();
        self.task.set_error(None);
        self.transition(TaskStatus::Uploading);
    }

    fn begin_merge(&mut self, content_hash: String, file_name: String, total_chunks: u64) {
        let store = self.store.clone();
        debug!(target: "uploader::orchestrator", task_id = %self.task.id(), total_chunks, "Requesting merge");
        self.spawn_op(Pending::Merge, async move {
            OpEvent::Merged(
                store
                    .merge_chunks(&content_hash, &file_name, total_chunks)
                    .await
                    .map_err(|e| e.to_string()),
            )
        });
    }

    fn spawn_op<F>(&mut self, pending: Pending, op: F)
    where
        F: Future<Output = OpEvent> + Send + 'static,
    {
        let tx = self.op_tx.clone();
        let attempt = self.attempt;
        self.pending = Some(pending);
        self.op_handle = Some(tokio::spawn(async move {
            let _ = tx.send((attempt, op.await));
        }));
    }

    /// Fold acknowledgements the worker queued before it is abandoned
    fn drain_worker_progress(&mut self) {
        let Some(rx) = self.worker_rx.as_mut() else {
            return;
        };
        let mut acknowledged = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let WorkerEvent::Progress { indices, .. } = event {
                acknowledged.extend(indices);
            }
        }
        let added = self.task.merge_checkpoint(acknowledged);
        if added > 0 {
            debug!(target: "uploader::orchestrator", task_id = %self.task.id(), added, "Kept queued acknowledgements on pause");
        }
    }

    /// Terminate every unit and start a new attempt
    fn stop_units(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.attempt += 1;
        self.pending = None;
        self.hasher_rx = None;
        self.worker_rx = None;
        if let Some(handle) = self.worker_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.op_handle.take() {
            handle.abort();
        }
    }

    fn fail(&mut self, error: UploadError) {
        self.stop_units();
        warn!(target: "uploader::orchestrator", task_id = %self.task.id(), error = %error, "Upload failed");
        self.publisher.notice(NoticeLevel::Error, error.to_string());
        self.task.set_error(Some(error));
        self.transition(TaskStatus::Error);
    }

    fn transition(&mut self, status: TaskStatus) {
        let from = self.task.status();
        self.task.set_status(status);
        info!(target: "uploader::orchestrator", task_id = %self.task.id(), from = %from, to = %status, "Status changed");
        self.publish();
    }

    fn publish(&self) {
        self.publisher.snapshot(self.task.snapshot());
    }
}

async fn recv_unit<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteStore;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config() -> UploaderConfig {
        UploaderConfig {
            chunk_size: 4,
            hash_slice_size: 3,
            ..UploaderConfig::default()
        }
    }

    fn spawn(store: &MemoryRemoteStore, content: &[u8]) -> (TaskHandle, NamedTempFile) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        let task = UploadTask::new(TaskId::new(), file.path(), content.len() as u64, 4).unwrap();
        let handle = UploadOrchestrator::spawn(task, Arc::new(store.clone()), &config());
        (handle, file)
    }

    #[tokio::test]
    async fn test_commands_rejected_while_pending() {
        let store = MemoryRemoteStore::new();
        let (handle, _file) = spawn(&store, b"abcdefghij");

        for result in [
            handle.pause().await,
            handle.resume().await,
            handle.retry().await,
        ] {
            assert!(matches!(
                result,
                Err(UploadError::InvalidCommand {
                    status: TaskStatus::Pending,
                    ..
                })
            ));
        }
        assert_eq!(handle.snapshot().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_upload_runs_to_completion() {
        let store = MemoryRemoteStore::new();
        let (handle, _file) = spawn(&store, b"abcdefghij");

        handle.start().await.unwrap();
        let done = handle.wait_until_settled().await.unwrap();

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.uploaded_chunks, vec![0, 1, 2]);
        assert_eq!(done.percent, 100);
        let hash = done.content_hash.unwrap();
        assert_eq!(store.file(&hash).await.unwrap().data.as_ref(), b"abcdefghij");
        assert!(matches!(
            handle.start().await,
            Err(UploadError::InvalidCommand { command: "start", .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_file_fails_hashing_then_retry_rehashes() {
        let store = MemoryRemoteStore::new();
        let (handle, file) = spawn(&store, b"abcdefghij");
        let path = file.path().to_path_buf();
        drop(file);

        handle.start().await.unwrap();
        let failed = handle.wait_until_settled().await.unwrap();
        assert_eq!(failed.status, TaskStatus::Error);
        assert!(failed.content_hash.is_none());
        assert!(failed.error.unwrap().starts_with("Failed to compute content hash"));

        std::fs::write(&path, b"abcdefghij").unwrap();
        handle.retry().await.unwrap();
        let done = handle
            .wait_for(|s| s.status == TaskStatus::Completed)
            .await
            .unwrap();
        assert!(done.error.is_none());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_pause_keeps_queued_acknowledgements() {
        let store = MemoryRemoteStore::new();
        let task = UploadTask::new(TaskId::new(), "/data/letters.txt", 10, 4).unwrap();
        let (mut actor, handle, _commands) =
            UploadOrchestrator::build(task, Arc::new(store), &config());
        actor.task.set_content_hash("hash");
        actor.task.set_status(TaskStatus::Uploading);

        let (tx, rx) = mpsc::unbounded_channel();
        actor.worker_rx = Some(rx);
        for (index, bytes_loaded, percent) in [(0, 4, 40), (1, 8, 80)] {
            tx.send(WorkerEvent::Progress {
                indices: vec![index],
                bytes_loaded,
                percent,
            })
            .unwrap();
        }

        actor.handle_command(CommandKind::Pause).unwrap();

        let paused = handle.snapshot();
        assert_eq!(paused.status, TaskStatus::Paused);
        assert_eq!(paused.uploaded_chunks, vec![0, 1]);
        assert_eq!(paused.bytes_loaded, 8);
        assert_eq!(paused.percent, 80);
        assert!(actor.worker_rx.is_none());
    }

    #[tokio::test]
    async fn test_cancel_closes_the_task() {
        let store = MemoryRemoteStore::new();
        store.hold_uploads();
        let (handle, _file) = spawn(&store, b"abcdefghij");

        handle.start().await.unwrap();
        handle
            .wait_for(|s| s.status == TaskStatus::Uploading)
            .await
            .unwrap();
        handle.cancel().await.unwrap();

        assert_eq!(handle.snapshot().status, TaskStatus::Cancelled);
        assert!(matches!(handle.resume().await, Err(UploadError::TaskClosed)));
        assert_eq!(store.upload_calls().await, 0);
    }
}
