//! Upload task data model

use crate::uploader::error::UploadError;
use crate::uploader::planner::{self, PlanError};
use crate::uploader::progress::{self, ProgressEstimate, ProgressSample};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Opaque task handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Hashing,
    Checking,
    Uploading,
    Paused,
    Completed,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Hashing => "HASHING",
            TaskStatus::Checking => "CHECKING",
            TaskStatus::Uploading => "UPLOADING",
            TaskStatus::Paused => "PAUSED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Error => "ERROR",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    /// No further progress happens without a user command
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Error | TaskStatus::Cancelled
        )
    }

    /// No command can move the task out of this state
    pub fn is_final(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a task, as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub file_name: String,
    pub status: TaskStatus,
    pub uploaded_chunks: Vec<u64>,
    pub total_chunks: u64,
    pub percent: u8,
    pub speed_label: String,
    pub eta_label: String,
    pub bytes_loaded: u64,
    pub total_bytes: u64,
    pub content_hash: Option<String>,
    pub final_url: Option<String>,
    pub error: Option<String>,
}

/// One file being uploaded
///
/// Owned exclusively by its orchestrator. Chunk size and chunk count are fixed
/// at creation, the content hash is set at most once, and the checkpoint only
/// ever holds indices in `[0, total_chunks)`.
#[derive(Debug, Clone)]
pub struct UploadTask {
    id: TaskId,
    path: PathBuf,
    file_name: String,
    file_size: u64,
    chunk_size: u64,
    total_chunks: u64,
    content_hash: Option<String>,
    uploaded_chunks: BTreeSet<u64>,
    status: TaskStatus,
    progress_sample: ProgressSample,
    estimate: ProgressEstimate,
    final_url: Option<String>,
    last_error: Option<UploadError>,
}

impl UploadTask {
    /// Create a pending task for a file of known size
    pub fn new(
        id: TaskId,
        path: impl Into<PathBuf>,
        file_size: u64,
        chunk_size: u64,
    ) -> Result<Self, PlanError> {
        let path = path.into();
        let total_chunks = planner::total_chunks(file_size, chunk_size)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        Ok(Self {
            id,
            path,
            file_name,
            file_size,
            chunk_size,
            total_chunks,
            content_hash: None,
            uploaded_chunks: BTreeSet::new(),
            status: TaskStatus::Pending,
            progress_sample: ProgressSample::now(0),
            estimate: unfinished(ProgressEstimate::idle(0, file_size), file_size),
            final_url: None,
            last_error: None,
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    pub fn content_hash(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }

    /// Record the content hash. Returns false, leaving the hash untouched, if one is already set.
    pub fn set_content_hash(&mut self, hash: impl Into<String>) -> bool {
        if self.content_hash.is_some() {
            return false;
        }
        self.content_hash = Some(hash.into());
        true
    }

    pub fn uploaded_chunks(&self) -> &BTreeSet<u64> {
        &self.uploaded_chunks
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
    }

    pub fn final_url(&self) -> Option<&str> {
        self.final_url.as_deref()
    }

    pub fn set_final_url(&mut self, url: Option<String>) {
        if url.is_some() {
            self.final_url = url;
        }
    }

    pub fn last_error(&self) -> Option<&UploadError> {
        self.last_error.as_ref()
    }

    pub fn set_error(&mut self, error: Option<UploadError>) {
        self.last_error = error;
    }

    /// Replace the checkpoint with a server-reported set
    pub fn seed_checkpoint<I: IntoIterator<Item = u64>>(&mut self, indices: I) {
        let total = self.total_chunks;
        self.uploaded_chunks = indices.into_iter().filter(|&i| i < total).collect();
    }

    /// Fold indices into the checkpoint. Returns how many were new.
    pub fn merge_checkpoint<I: IntoIterator<Item = u64>>(&mut self, indices: I) -> usize {
        let total = self.total_chunks;
        let before = self.uploaded_chunks.len();
        self.uploaded_chunks
            .extend(indices.into_iter().filter(|&i| i < total));
        self.uploaded_chunks.len() - before
    }

    pub fn is_fully_uploaded(&self) -> bool {
        self.uploaded_chunks.len() as u64 == self.total_chunks
    }

    /// Bytes covered by the checkpoint
    pub fn bytes_loaded(&self) -> u64 {
        planner::bytes_covered(&self.uploaded_chunks, self.file_size, self.chunk_size)
    }

    /// Start a fresh sampling window at the current checkpoint
    pub fn reset_progress_sample(&mut self) {
        let loaded = self.bytes_loaded();
        self.progress_sample = ProgressSample::now(loaded);
        self.estimate = unfinished(ProgressEstimate::idle(loaded, self.file_size), self.file_size);
    }

    /// Take a new sample against the previous one and refresh the estimate
    pub fn record_progress(&mut self, sample: ProgressSample) -> &ProgressEstimate {
        self.estimate = unfinished(
            progress::estimate(self.progress_sample, sample, self.file_size),
            self.file_size,
        );
        self.progress_sample = sample;
        &self.estimate
    }

    /// Pin progress at 100% without rate information
    pub fn mark_complete_progress(&mut self) {
        self.estimate = ProgressEstimate::idle(self.file_size, self.file_size);
    }

    pub fn estimate(&self) -> &ProgressEstimate {
        &self.estimate
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.id,
            file_name: self.file_name.clone(),
            status: self.status,
            uploaded_chunks: self.uploaded_chunks.iter().copied().collect(),
            total_chunks: self.total_chunks,
            percent: self.estimate.percent,
            speed_label: self.estimate.speed_label.clone(),
            eta_label: self.estimate.eta_label.clone(),
            bytes_loaded: self.bytes_loaded(),
            total_bytes: self.file_size,
            content_hash: self.content_hash.clone(),
            final_url: self.final_url.clone(),
            error: self.last_error.as_ref().map(|e| e.to_string()),
        }
    }
}

/// An empty file has nothing to count, so it stays at 0% until the merge lands
fn unfinished(mut estimate: ProgressEstimate, file_size: u64) -> ProgressEstimate {
    if file_size == 0 {
        estimate.percent = 0;
    }
    estimate
}
