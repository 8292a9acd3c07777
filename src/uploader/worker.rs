//! Serial chunk transfer worker

use crate::remote::{ChunkPayload, RemoteStore};
use crate::uploader::chunk::{ChunkInfo, ChunkStream};
use crate::uploader::planner;
use crate::uploader::progress;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Events emitted by a transfer worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// `indices` are now covered, either skipped from the checkpoint or just acknowledged.
    /// `bytes_loaded` and `percent` count the whole working set, checkpoint included.
    Progress {
        indices: Vec<u64>,
        bytes_loaded: u64,
        percent: u8,
    },
    /// Every index is covered
    Completed {
        content_hash: String,
        file_name: String,
        total_chunks: u64,
    },
    /// The worker halted at `index`
    Error { index: Option<u64>, reason: String },
}

/// Everything a worker needs for one upload attempt
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub path: PathBuf,
    pub content_hash: String,
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    /// Snapshot of the checkpoint at spawn time
    pub checkpoint: BTreeSet<u64>,
}

/// Uploads the chunks of a [`TransferJob`] one at a time in ascending order
#[derive(Clone)]
pub struct ChunkTransferWorker {
    store: Arc<dyn RemoteStore>,
}

impl ChunkTransferWorker {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Run the job on a new task
    pub fn spawn(
        &self,
        job: TransferJob,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> JoinHandle<()> {
        let worker = self.clone();
        tokio::spawn(async move { worker.run(job, cancel, events).await })
    }

    /// Walk every index, skipping checkpointed ones, halting on the first failure
    pub async fn run(
        &self,
        job: TransferJob,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) {
        debug!(
            target: "uploader::worker",
            hash = %job.content_hash,
            total_chunks = job.total_chunks,
            already_uploaded = job.checkpoint.len(),
            "Transfer started"
        );

        let mut covered: BTreeSet<u64> = job
            .checkpoint
            .iter()
            .copied()
            .filter(|&i| i < job.total_chunks)
            .collect();
        let progress_event = |covered: &BTreeSet<u64>, index: u64| {
            let bytes_loaded = planner::bytes_covered(covered, job.file_size, job.chunk_size);
            WorkerEvent::Progress {
                indices: vec![index],
                bytes_loaded,
                percent: progress::percent(bytes_loaded, job.file_size),
            }
        };

        for index in 0..job.total_chunks {
            if cancel.is_cancelled() {
                debug!(target: "uploader::worker", hash = %job.content_hash, chunk = index, "Transfer cancelled");
                return;
            }

            if job.checkpoint.contains(&index) {
                let _ = events.send(progress_event(&covered, index));
                continue;
            }

            let upload = async {
                let chunk = ChunkInfo::plan(index, job.file_size, job.chunk_size)
                    .map_err(|e| e.to_string())?;
                let body = ChunkStream::from_chunk(&job.path, &chunk)
                    .await
                    .map_err(|e| format!("failed to read chunk: {}", e))?;

                self.store
                    .upload_chunk(ChunkPayload {
                        content_hash: job.content_hash.clone(),
                        index,
                        total_chunks: job.total_chunks,
                        file_name: job.file_name.clone(),
                        body,
                    })
                    .await
                    .map_err(|e| e.to_string())?;
                Ok::<(), String>(())
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(target: "uploader::worker", hash = %job.content_hash, chunk = index, "In-flight chunk abandoned");
                    return;
                }
                result = upload => result,
            };

            match result {
                Ok(()) => {
                    covered.insert(index);
                    debug!(target: "uploader::worker", hash = %job.content_hash, chunk = index, "Chunk acknowledged");
                    let _ = events.send(progress_event(&covered, index));
                }
                Err(reason) => {
                    warn!(target: "uploader::worker", hash = %job.content_hash, chunk = index, error = %reason, "Chunk upload failed");
                    let _ = events.send(WorkerEvent::Error {
                        index: Some(index),
                        reason,
                    });
                    return;
                }
            }
        }

        debug!(target: "uploader::worker", hash = %job.content_hash, "All chunks uploaded");
        let _ = events.send(WorkerEvent::Completed {
            content_hash: job.content_hash,
            file_name: job.file_name,
            total_chunks: job.total_chunks,
        });
    }
}
