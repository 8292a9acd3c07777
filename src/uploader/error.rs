//! Error types for the uploader module

use crate::uploader::planner::PlanError;
use crate::uploader::task::TaskStatus;
use thiserror::Error;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Upload error types
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    /// Upload was cancelled
    #[error("Upload cancelled")]
    Cancelled,

    /// Local file could not be opened or inspected
    #[error("Failed to read local file: {0}")]
    FileRead(String),

    /// File became unreadable while computing its fingerprint
    #[error("Failed to compute content hash: {0}")]
    HashCompute(String),

    /// Dedup/resume query against the remote store failed
    #[error("Existence check failed: {0}")]
    ExistenceCheck(String),

    /// Progress reconciliation before a resume failed
    #[error("Failed to query upload progress: {0}")]
    ProgressQuery(String),

    /// Chunk upload failed
    #[error("Chunk {chunk_index} upload failed: {message}")]
    ChunkUpload { chunk_index: u64, message: String },

    /// Server-side assembly failed
    #[error("Failed to merge chunks: {0}")]
    Merge(String),

    /// Command not legal in the task's current state
    #[error("Cannot {command} while task is {status}")]
    InvalidCommand {
        command: &'static str,
        status: TaskStatus,
    },

    /// Unknown task id
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// The task actor has shut down
    #[error("Task is closed")]
    TaskClosed,

    /// Chunk planning rejected its input
    #[error(transparent)]
    Plan(#[from] PlanError),
}

impl UploadError {
    /// Check if a user retry can plausibly get past this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::HashCompute(_)
                | UploadError::ExistenceCheck(_)
                | UploadError::ProgressQuery(_)
                | UploadError::ChunkUpload { .. }
                | UploadError::Merge(_)
        )
    }

    /// Check if this error is due to cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }

    /// Create a chunk upload error
    pub fn chunk_failed(chunk_index: u64, message: impl Into<String>) -> Self {
        UploadError::ChunkUpload {
            chunk_index,
            message: message.into(),
        }
    }

    /// Create an invalid command error
    pub fn invalid_command(command: &'static str, status: TaskStatus) -> Self {
        UploadError::InvalidCommand { command, status }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::FileRead(err.to_string())
    }
}
