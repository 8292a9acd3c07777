//! In-process remote store

use super::{ChunkPayload, RemoteCheckResult, RemoteStore};
use async_trait::async_trait;
use bigfile_api::models::MergedFile;
use bigfile_api::{ApiError, ApiResult};
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

/// A fully assembled file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub file_name: String,
    pub total_chunks: u64,
    pub data: Bytes,
    pub url: String,
}

#[derive(Debug, Default)]
struct PartialUpload {
    total_chunks: u64,
    chunks: BTreeMap<u64, Bytes>,
}

#[derive(Debug, Default)]
struct Inner {
    partial: HashMap<String, PartialUpload>,
    files: HashMap<String, StoredFile>,
    /// Every chunk call that reached the store, in arrival order
    upload_log: Vec<(String, u64)>,
    check_calls: usize,
    merge_calls: usize,
    progress_calls: usize,
    chunk_failures: HashMap<u64, usize>,
    check_failures: usize,
    merge_failures: usize,
    progress_failures: usize,
}

/// [`RemoteStore`] holding chunks and assembled files in memory
///
/// Supports injecting failures per operation and holding chunk uploads behind
/// a gate so callers can observe an upload while it is in flight.
#[derive(Clone)]
pub struct MemoryRemoteStore {
    inner: Arc<Mutex<Inner>>,
    gate: Arc<Semaphore>,
    gated: Arc<AtomicBool>,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            gate: Arc::new(Semaphore::new(0)),
            gated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Pre-load a finished file so existence checks for `content_hash` succeed
    pub async fn insert_file(&self, content_hash: &str, file_name: &str, data: impl Into<Bytes>) {
        let url = file_url(content_hash, file_name);
        self.inner.lock().await.files.insert(
            content_hash.to_string(),
            StoredFile {
                file_name: file_name.to_string(),
                total_chunks: 0,
                data: data.into(),
                url,
            },
        );
    }

    /// Pre-load chunks of an unfinished upload, as if left by an earlier session
    pub async fn insert_chunks(
        &self,
        content_hash: &str,
        total_chunks: u64,
        chunks: impl IntoIterator<Item = (u64, Bytes)>,
    ) {
        let mut inner = self.inner.lock().await;
        let partial = inner
            .partial
            .entry(content_hash.to_string())
            .or_insert_with(|| PartialUpload {
                total_chunks,
                chunks: BTreeMap::new(),
            });
        partial.chunks.extend(chunks);
    }

    /// Fail the next `times` uploads of chunk `index`
    pub async fn fail_chunk(&self, index: u64, times: usize) {
        self.inner.lock().await.chunk_failures.insert(index, times);
    }

    pub async fn fail_check(&self, times: usize) {
        self.inner.lock().await.check_failures = times;
    }

    pub async fn fail_merge(&self, times: usize) {
        self.inner.lock().await.merge_failures = times;
    }

    pub async fn fail_progress(&self, times: usize) {
        self.inner.lock().await.progress_failures = times;
    }

    /// Block chunk uploads until released
    pub fn hold_uploads(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    /// Let `count` held uploads through
    pub fn release_uploads(&self, count: usize) {
        self.gate.add_permits(count);
    }

    /// Stop holding uploads, including any currently waiting
    pub fn open_gate(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.close();
    }

    pub async fn file(&self, content_hash: &str) -> Option<StoredFile> {
        self.inner.lock().await.files.get(content_hash).cloned()
    }

    pub async fn stored_chunks(&self, content_hash: &str) -> BTreeSet<u64> {
        self.inner
            .lock()
            .await
            .partial
            .get(content_hash)
            .map(|p| p.chunks.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Indices of every chunk call received, in arrival order
    pub async fn upload_log(&self) -> Vec<u64> {
        self.inner
            .lock()
            .await
            .upload_log
            .iter()
            .map(|(_, index)| *index)
            .collect()
    }

    pub async fn upload_calls(&self) -> usize {
        self.inner.lock().await.upload_log.len()
    }

    pub async fn check_calls(&self) -> usize {
        self.inner.lock().await.check_calls
    }

    pub async fn merge_calls(&self) -> usize {
        self.inner.lock().await.merge_calls
    }

    pub async fn progress_calls(&self) -> usize {
        self.inner.lock().await.progress_calls
    }

    async fn pass_gate(&self) {
        if !self.gated.load(Ordering::SeqCst) {
            return;
        }
        // A closed gate lets everything through
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
    }
}

fn file_url(content_hash: &str, file_name: &str) -> String {
    format!("memory://{}/{}", content_hash, file_name)
}

fn take_failure(counter: &mut usize) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn check_file(
        &self,
        content_hash: &str,
        _file_name: &str,
        _file_size: u64,
    ) -> ApiResult<RemoteCheckResult> {
        let mut inner = self.inner.lock().await;
        inner.check_calls += 1;
        if take_failure(&mut inner.check_failures) {
            return Err(ApiError::Status {
                status: 503,
                message: "check unavailable".to_string(),
            });
        }

        if let Some(file) = inner.files.get(content_hash) {
            return Ok(RemoteCheckResult {
                exists: true,
                uploaded_chunks: None,
                final_url: Some(file.url.clone()),
            });
        }

        Ok(RemoteCheckResult {
            exists: false,
            uploaded_chunks: inner
                .partial
                .get(content_hash)
                .map(|p| p.chunks.keys().copied().collect()),
            final_url: None,
        })
    }

    async fn upload_chunk(&self, chunk: ChunkPayload) -> ApiResult<()> {
        self.pass_gate().await;

        let ChunkPayload {
            content_hash,
            index,
            total_chunks,
            body,
            ..
        } = chunk;

        {
            let mut inner = self.inner.lock().await;
            inner.upload_log.push((content_hash.clone(), index));

            if let Some(remaining) = inner.chunk_failures.get_mut(&index) {
                if take_failure(remaining) {
                    return Err(ApiError::server(format!("chunk {} rejected", index)));
                }
            }
            if index >= total_chunks {
                return Err(ApiError::server(format!(
                    "chunk index {} out of range (total chunks: {})",
                    index, total_chunks
                )));
            }
            if let Some(partial) = inner.partial.get(&content_hash) {
                if partial.total_chunks != total_chunks {
                    return Err(ApiError::server(format!(
                        "total chunks mismatch: expected {}, got {}",
                        partial.total_chunks, total_chunks
                    )));
                }
            }
        }

        let data = body
            .read_all()
            .await
            .map_err(|e| ApiError::server(format!("failed to read chunk body: {}", e)))?;

        let mut inner = self.inner.lock().await;
        let partial = inner
            .partial
            .entry(content_hash.clone())
            .or_insert_with(|| PartialUpload {
                total_chunks,
                chunks: BTreeMap::new(),
            });
        partial.chunks.insert(index, data);

        debug!(target: "remote::memory", hash = %content_hash, chunk = index, "Chunk stored");
        Ok(())
    }

    async fn merge_chunks(
        &self,
        content_hash: &str,
        file_name: &str,
        total_chunks: u64,
    ) -> ApiResult<MergedFile> {
        let mut inner = self.inner.lock().await;
        inner.merge_calls += 1;
        if take_failure(&mut inner.merge_failures) {
            return Err(ApiError::Status {
                status: 500,
                message: "merge failed".to_string(),
            });
        }

        if let Some(file) = inner.files.get(content_hash) {
            return Ok(MergedFile {
                url: Some(file.url.clone()),
                file_name: Some(file.file_name.clone()),
                file_size: Some(file.data.len() as u64),
            });
        }

        let partial = inner.partial.remove(content_hash).unwrap_or_default();
        let missing: Vec<u64> = (0..total_chunks)
            .filter(|i| !partial.chunks.contains_key(i))
            .collect();
        if !missing.is_empty() {
            let message = format!("missing chunks {:?}", missing);
            inner.partial.insert(content_hash.to_string(), partial);
            return Err(ApiError::server(message));
        }

        let mut data = BytesMut::new();
        for index in 0..total_chunks {
            if let Some(chunk) = partial.chunks.get(&index) {
                data.extend_from_slice(chunk);
            }
        }

        let file = StoredFile {
            file_name: file_name.to_string(),
            total_chunks,
            data: data.freeze(),
            url: file_url(content_hash, file_name),
        };
        let merged = MergedFile {
            url: Some(file.url.clone()),
            file_name: Some(file.file_name.clone()),
            file_size: Some(file.data.len() as u64),
        };
        inner.files.insert(content_hash.to_string(), file);

        debug!(target: "remote::memory", hash = content_hash, total_chunks, "Chunks merged");
        Ok(merged)
    }

    async fn upload_progress(&self, content_hash: &str) -> ApiResult<BTreeSet<u64>> {
        let mut inner = self.inner.lock().await;
        inner.progress_calls += 1;
        if take_failure(&mut inner.progress_failures) {
            return Err(ApiError::Status {
                status: 503,
                message: "progress unavailable".to_string(),
            });
        }

        if let Some(file) = inner.files.get(content_hash) {
            return Ok((0..file.total_chunks).collect());
        }
        Ok(inner
            .partial
            .get(content_hash)
            .map(|p| p.chunks.keys().copied().collect())
            .unwrap_or_default())
    }
}
