use crate::remote::RemoteStore;
use crate::uploader::UploaderConfig;
use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::orchestrator::{TaskHandle, UploadOrchestrator};
use crate::uploader::task::{TaskId, TaskSnapshot, UploadTask};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct TaskRegistry {
    handles: HashMap<TaskId, TaskHandle>,
    /// Enqueue order
    order: Vec<TaskId>,
}

/// Registry of upload tasks
pub struct UploadManager {
    state: Arc<RwLock<TaskRegistry>>,
    store: Arc<dyn RemoteStore>,
    config: UploaderConfig,
}

impl UploadManager {
    pub fn new(store: Arc<dyn RemoteStore>, config: UploaderConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(TaskRegistry::default())),
            store,
            config,
        }
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// Create a task for a local file
    pub async fn enqueue(&self, path: impl AsRef<Path>) -> UploadResult<TaskHandle> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(UploadError::FileRead(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let task = UploadTask::new(TaskId::new(), path, metadata.len(), self.config.chunk_size)?;
        tracing::info!(
            target: "uploader::manager",
            task_id = %task.id(),
            file = %path.display(),
            size = task.file_size(),
            total_chunks = task.total_chunks(),
            "Task enqueued"
        );

        let handle = UploadOrchestrator::spawn(task, self.store.clone(), &self.config);
        {
            let mut write_guard = self.state.write().await;
            write_guard.handles.insert(handle.id(), handle.clone());
            write_guard.order.push(handle.id());
        }

        if self.config.auto_start {
            handle.start().await?;
        }
        Ok(handle)
    }

    /// Get a task by ID
    pub async fn get(&self, id: TaskId) -> UploadResult<TaskHandle> {
        let read_guard = self.state.read().await;
        read_guard
            .handles
            .get(&id)
            .cloned()
            .ok_or_else(|| UploadError::TaskNotFound(id.to_string()))
    }

    /// Cancel a task if it is still running and forget it
    pub async fn remove(&self, id: TaskId) -> UploadResult<TaskSnapshot> {
        let handle = {
            let mut write_guard = self.state.write().await;
            let handle = write_guard
                .handles
                .remove(&id)
                .ok_or_else(|| UploadError::TaskNotFound(id.to_string()))?;
            write_guard.order.retain(|t| *t != id);
            handle
        };

        if !handle.snapshot().status.is_final() {
            match handle.cancel().await {
                Ok(()) | Err(UploadError::TaskClosed) | Err(UploadError::InvalidCommand { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        tracing::info!(target: "uploader::manager", task_id = %id, "Task removed");
        Ok(handle.snapshot())
    }

    /// Snapshots of all tasks in enqueue order
    pub async fn list(&self) -> Vec<TaskSnapshot> {
        let read_guard = self.state.read().await;
        read_guard
            .order
            .iter()
            .filter_map(|id| read_guard.handles.get(id))
            .map(|handle| handle.snapshot())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.handles.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
