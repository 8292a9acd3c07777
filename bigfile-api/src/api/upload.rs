use crate::client::Client;
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Body;

const CHECK_FILE: &str = "api/bigFile/check-file";
const UPLOAD_CHUNK: &str = "api/bigFile/upload-chunk";
const MERGE_CHUNKS: &str = "api/bigFile/merge-chunks";
const UPLOAD_PROGRESS: &str = "api/bigFile/upload-progress";

/// Chunked big-file upload API methods
#[async_trait]
pub trait BigFileApi {
    /// Ask whether a file with this content hash is already stored
    async fn check_file(&self, request: &CheckFileRequest) -> ApiResult<CheckFileResponse>;

    /// Upload one chunk as a multipart form with a streaming body
    async fn upload_chunk(
        &self,
        request: &UploadChunkRequest,
        body: Body,
        size: u64,
    ) -> ApiResult<UploadChunkResponse>;

    /// Assemble all uploaded chunks into the final file
    async fn merge_chunks(&self, request: &MergeChunksRequest) -> ApiResult<MergedFile>;

    /// Chunk indices the server already holds for a content hash
    async fn get_upload_progress(&self, file_hash: &str) -> ApiResult<UploadProgressResponse>;
}

#[async_trait]
impl BigFileApi for Client {
    async fn check_file(&self, request: &CheckFileRequest) -> ApiResult<CheckFileResponse> {
        self.post(CHECK_FILE, request).await
    }

    async fn upload_chunk(
        &self,
        request: &UploadChunkRequest,
        body: Body,
        size: u64,
    ) -> ApiResult<UploadChunkResponse> {
        let part = Part::stream_with_length(body, size)
            .file_name(request.part_file_name())
            .mime_str("application/octet-stream")?;

        let form = Form::new()
            .part("chunk", part)
            .text("fileHash", request.file_hash.clone())
            .text("chunkIndex", request.chunk_index.to_string())
            .text("totalChunks", request.total_chunks.to_string())
            .text("fileName", request.file_name.clone());

        let response: UploadChunkResponse = self.post_multipart(UPLOAD_CHUNK, form).await?;
        if !response.success {
            return Err(ApiError::server(
                response
                    .error
                    .unwrap_or_else(|| "Upload failed".to_string()),
            ));
        }
        Ok(response)
    }

    async fn merge_chunks(&self, request: &MergeChunksRequest) -> ApiResult<MergedFile> {
        self.post(MERGE_CHUNKS, request).await
    }

    async fn get_upload_progress(&self, file_hash: &str) -> ApiResult<UploadProgressResponse> {
        self.get(&format!(
            "{}/{}",
            UPLOAD_PROGRESS,
            urlencoding::encode(file_hash)
        ))
        .await
    }
}
