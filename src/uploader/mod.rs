//! Resumable chunked upload engine
//!
//! A file is fingerprinted with MD5, checked against the remote store for an
//! existing copy or a partial upload, sent in fixed-size chunks one at a time
//! and finally merged server-side. Each file is driven by its own
//! [`UploadOrchestrator`] actor; [`UploadManager`] keeps track of all of them.

pub mod chunk;
pub mod error;
pub mod hasher;
pub mod manager;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod task;
pub mod worker;

pub use error::{UploadError, UploadResult};
pub use hasher::{ContentHasher, DEFAULT_HASH_SLICE_SIZE};
pub use manager::UploadManager;
pub use orchestrator::{TaskHandle, UploadOrchestrator};
pub use planner::DEFAULT_CHUNK_SIZE;
pub use task::{TaskId, TaskSnapshot, TaskStatus, UploadTask};

/// Default per-task event buffer
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Engine settings shared by every task
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Chunk size in bytes
    pub chunk_size: u64,
    /// Read slice used while hashing
    pub hash_slice_size: usize,
    /// Broadcast buffer per task
    pub event_capacity: usize,
    /// Start tasks as soon as they are enqueued
    pub auto_start: bool,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            hash_slice_size: DEFAULT_HASH_SLICE_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            auto_start: false,
        }
    }
}
