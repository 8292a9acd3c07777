use serde::{Deserialize, Serialize};

/// Existence check request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckFileRequest {
    pub file_hash: String,
    pub file_name: String,
    pub file_size: u64,
}

/// Existence check response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckFileResponse {
    #[serde(default)]
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_chunks: Option<Vec<u64>>,
    /// URL of the already stored file, when `exists` is true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Form fields sent alongside a chunk body
#[derive(Debug, Clone)]
pub struct UploadChunkRequest {
    pub file_hash: String,
    pub chunk_index: u64,
    pub total_chunks: u64,
    pub file_name: String,
}

impl UploadChunkRequest {
    /// File name used for the multipart `chunk` part, e.g. `chunk-3.mp4`
    pub fn part_file_name(&self) -> String {
        let extension = self
            .file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
            .unwrap_or("bin");
        format!("chunk-{}.{}", self.chunk_index, extension)
    }
}

/// Chunk upload acknowledgement
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadChunkResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Merge request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeChunksRequest {
    pub file_hash: String,
    pub file_name: String,
    pub total_chunks: u64,
}

/// Descriptor of the assembled file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

/// Upload progress response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgressResponse {
    #[serde(default)]
    pub uploaded_chunks: Vec<u64>,
}
