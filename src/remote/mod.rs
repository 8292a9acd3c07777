//! Remote store boundary
//!
//! The upload engine only ever talks to a [`RemoteStore`]. [`HttpRemoteStore`]
//! speaks the big-file HTTP protocol through `bigfile_api`, while
//! [`MemoryRemoteStore`] keeps everything in process and is used for dry runs
//! and tests.
//!
//! Contract every implementation honours:
//! - uploading the same `(content_hash, index)` twice is safe and stores the chunk once
//! - chunk indices `>= total_chunks` are rejected
//! - merge verifies that all `total_chunks` chunks are present and is safe to retry

mod http;
mod memory;

pub use http::HttpRemoteStore;
pub use memory::{MemoryRemoteStore, StoredFile};

use crate::uploader::chunk::ChunkStream;
use async_trait::async_trait;
use bigfile_api::ApiResult;
use bigfile_api::models::MergedFile;
use std::collections::BTreeSet;

/// Result of the dedup/resume query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteCheckResult {
    pub exists: bool,
    /// Chunks already held for this hash, when the store knows of a partial upload
    pub uploaded_chunks: Option<BTreeSet<u64>>,
    pub final_url: Option<String>,
}

/// One chunk ready to be sent
pub struct ChunkPayload {
    pub content_hash: String,
    pub index: u64,
    pub total_chunks: u64,
    pub file_name: String,
    pub body: ChunkStream,
}

impl ChunkPayload {
    pub fn size(&self) -> u64 {
        self.body.size()
    }
}

impl std::fmt::Debug for ChunkPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkPayload")
            .field("content_hash", &self.content_hash)
            .field("index", &self.index)
            .field("total_chunks", &self.total_chunks)
            .field("file_name", &self.file_name)
            .field("size", &self.size())
            .finish()
    }
}

/// Operations the upload engine needs from the remote store
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Dedup / resume query
    async fn check_file(
        &self,
        content_hash: &str,
        file_name: &str,
        file_size: u64,
    ) -> ApiResult<RemoteCheckResult>;

    /// Store one chunk; resolves once the store has acknowledged it
    async fn upload_chunk(&self, chunk: ChunkPayload) -> ApiResult<()>;

    /// Assemble all chunks into the final file
    async fn merge_chunks(
        &self,
        content_hash: &str,
        file_name: &str,
        total_chunks: u64,
    ) -> ApiResult<MergedFile>;

    /// Chunk indices the store holds for this hash
    async fn upload_progress(&self, content_hash: &str) -> ApiResult<BTreeSet<u64>>;
}
