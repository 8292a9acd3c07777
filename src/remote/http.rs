//! Remote store backed by the big-file HTTP API

use super::{ChunkPayload, RemoteCheckResult, RemoteStore};
use async_trait::async_trait;
use bigfile_api::api::BigFileApi;
use bigfile_api::models::{CheckFileRequest, MergeChunksRequest, MergedFile, UploadChunkRequest};
use bigfile_api::{ApiResult, Client};
use reqwest::Body;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// [`RemoteStore`] that forwards to a `bigfile_api::Client`
#[derive(Clone)]
pub struct HttpRemoteStore {
    client: Arc<Client>,
}

impl HttpRemoteStore {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn check_file(
        &self,
        content_hash: &str,
        file_name: &str,
        file_size: u64,
    ) -> ApiResult<RemoteCheckResult> {
        debug!(target: "remote::http", hash = content_hash, file_name, file_size, "Checking file");

        let response = self
            .client
            .check_file(&CheckFileRequest {
                file_hash: content_hash.to_string(),
                file_name: file_name.to_string(),
                file_size,
            })
            .await?;

        Ok(RemoteCheckResult {
            exists: response.exists,
            uploaded_chunks: response
                .uploaded_chunks
                .map(|chunks| chunks.into_iter().collect()),
            final_url: response.url,
        })
    }

    async fn upload_chunk(&self, chunk: ChunkPayload) -> ApiResult<()> {
        let size = chunk.size();
        debug!(
            target: "remote::http",
            hash = %chunk.content_hash,
            chunk = chunk.index,
            size,
            "Uploading chunk (streaming)"
        );

        let request = UploadChunkRequest {
            file_hash: chunk.content_hash,
            chunk_index: chunk.index,
            total_chunks: chunk.total_chunks,
            file_name: chunk.file_name,
        };
        let body = Body::wrap_stream(chunk.body);

        self.client.upload_chunk(&request, body, size).await?;
        Ok(())
    }

    async fn merge_chunks(
        &self,
        content_hash: &str,
        file_name: &str,
        total_chunks: u64,
    ) -> ApiResult<MergedFile> {
        debug!(target: "remote::http", hash = content_hash, total_chunks, "Merging chunks");

        self.client
            .merge_chunks(&MergeChunksRequest {
                file_hash: content_hash.to_string(),
                file_name: file_name.to_string(),
                total_chunks,
            })
            .await
    }

    async fn upload_progress(&self, content_hash: &str) -> ApiResult<BTreeSet<u64>> {
        let response = self.client.get_upload_progress(content_hash).await?;
        Ok(response.uploaded_chunks.into_iter().collect())
    }
}
