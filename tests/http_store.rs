use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use bigfile_api::{Client, ClientConfig};
use bigfile_uploader::remote::ChunkPayload;
use bigfile_uploader::uploader::chunk::{ChunkInfo, ChunkStream};
use bigfile_uploader::uploader::ContentHasher;
use bigfile_uploader::{
    HttpRemoteStore, RemoteStore, TaskStatus, UploadManager, UploaderConfig,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

/// Minimal big-file server keeping chunks in memory
#[derive(Default)]
struct Server {
    chunks: Mutex<HashMap<String, BTreeMap<u64, Vec<u8>>>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    uploads: Mutex<Vec<u64>>,
    part_names: Mutex<Vec<String>>,
}

type Shared = Arc<Server>;

impl Server {
    fn indices(&self, hash: &str) -> Vec<u64> {
        self.chunks
            .lock()
            .unwrap()
            .get(hash)
            .map(|c| c.keys().copied().collect())
            .unwrap_or_default()
    }
}

async fn check_file(State(server): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let hash = body["fileHash"].as_str().unwrap().to_string();
    if server.files.lock().unwrap().contains_key(&hash) {
        return Json(json!({ "code": 0, "data": { "exists": true, "url": format!("/files/{hash}") } }));
    }
    Json(json!({
        "code": 0,
        "data": { "exists": false, "uploadedChunks": server.indices(&hash) }
    }))
}

async fn upload_chunk(State(server): State<Shared>, mut multipart: Multipart) -> Json<Value> {
    let mut fields = HashMap::new();
    let mut data = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        if name == "chunk" {
            if let Some(part) = field.file_name() {
                server.part_names.lock().unwrap().push(part.to_string());
            }
            data = field.bytes().await.unwrap().to_vec();
        } else {
            fields.insert(name, field.text().await.unwrap());
        }
    }

    let index: u64 = fields["chunkIndex"].parse().unwrap();
    let total: u64 = fields["totalChunks"].parse().unwrap();
    if index >= total {
        return Json(json!({ "success": false, "error": "chunk index out of range" }));
    }
    server.uploads.lock().unwrap().push(index);
    server
        .chunks
        .lock()
        .unwrap()
        .entry(fields["fileHash"].clone())
        .or_default()
        .insert(index, data);
    Json(json!({ "success": true }))
}

async fn merge_chunks(
    State(server): State<Shared>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let hash = body["fileHash"].as_str().unwrap().to_string();
    let total = body["totalChunks"].as_u64().unwrap();
    let chunks = server.chunks.lock().unwrap().get(&hash).cloned().unwrap_or_default();

    let missing: Vec<u64> = (0..total).filter(|i| !chunks.contains_key(i)).collect();
    if !missing.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "code": 400, "msg": format!("missing chunks {missing:?}") })),
        );
    }
    let data: Vec<u8> = chunks.into_values().flatten().collect();
    let size = data.len();
    server.files.lock().unwrap().insert(hash.clone(), data);
    (
        StatusCode::OK,
        Json(json!({
            "code": 200,
            "data": { "url": format!("/files/{hash}"), "fileName": body["fileName"], "fileSize": size }
        })),
    )
}

async fn upload_progress(State(server): State<Shared>, Path(hash): Path<String>) -> Json<Value> {
    Json(json!({ "uploadedChunks": server.indices(&hash) }))
}

async fn spawn_server() -> (HttpRemoteStore, Shared) {
    let server: Shared = Arc::new(Server::default());
    let app = Router::new()
        .route("/api/bigFile/check-file", post(check_file))
        .route("/api/bigFile/upload-chunk", post(upload_chunk))
        .route("/api/bigFile/merge-chunks", post(merge_chunks))
        .route("/api/bigFile/upload-progress/:hash", get(upload_progress))
        .with_state(server.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = Client::new(ClientConfig::new(format!("http://{}", addr))).unwrap();
    (HttpRemoteStore::new(Arc::new(client)), server)
}

async fn payload(path: &std::path::Path, index: u64, size: u64) -> ChunkPayload {
    let chunk = ChunkInfo::plan(index, size, 4).unwrap();
    ChunkPayload {
        content_hash: "letters".into(),
        index,
        total_chunks: 3,
        file_name: "letters.txt".into(),
        body: ChunkStream::from_chunk(path, &chunk).await.unwrap(),
    }
}

#[tokio::test]
async fn test_streamed_chunks_round_trip_through_http() {
    let (store, server) = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("letters.txt");
    std::fs::write(&path, b"abcdefghij").unwrap();
    server
        .chunks
        .lock()
        .unwrap()
        .insert("letters".into(), BTreeMap::from([(2, b"ij".to_vec())]));

    let checked = store.check_file("letters", "letters.txt", 10).await.unwrap();
    assert!(!checked.exists);
    assert_eq!(checked.uploaded_chunks, Some(BTreeSet::from([2])));

    store.upload_chunk(payload(&path, 0, 10).await).await.unwrap();
    assert_eq!(store.upload_progress("letters").await.unwrap(), BTreeSet::from([0, 2]));
    assert!(store.merge_chunks("letters", "letters.txt", 3).await.is_err());

    store.upload_chunk(payload(&path, 1, 10).await).await.unwrap();
    let merged = store.merge_chunks("letters", "letters.txt", 3).await.unwrap();
    assert_eq!(merged.url.as_deref(), Some("/files/letters"));
    assert_eq!(merged.file_size, Some(10));

    assert_eq!(server.files.lock().unwrap()["letters"], b"abcdefghij".to_vec());
    assert_eq!(*server.part_names.lock().unwrap(), vec!["chunk-0.txt", "chunk-1.txt"]);

    let exists = store.check_file("letters", "letters.txt", 10).await.unwrap();
    assert!(exists.exists);
    assert_eq!(exists.final_url.as_deref(), Some("/files/letters"));
}

#[tokio::test]
async fn test_engine_resumes_partial_upload_over_http() {
    let (store, server) = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.bin");
    let data: Vec<u8> = (0..20u8).collect();
    std::fs::write(&path, &data).unwrap();

    let hash = ContentHasher::default().hash_file(&path).await.unwrap();
    server.chunks.lock().unwrap().insert(
        hash.clone(),
        BTreeMap::from([(0, data[0..4].to_vec()), (1, data[4..8].to_vec())]),
    );

    let manager = UploadManager::new(
        Arc::new(store),
        UploaderConfig {
            chunk_size: 4,
            ..UploaderConfig::default()
        },
    );
    let handle = manager.enqueue(&path).await.unwrap();
    handle.start().await.unwrap();
    let done = timeout(
        Duration::from_secs(20),
        handle.wait_for(|s| s.status == TaskStatus::Completed),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(done.final_url, Some(format!("/files/{hash}")));
    assert_eq!(*server.uploads.lock().unwrap(), vec![2, 3, 4]);
    assert_eq!(server.files.lock().unwrap()[&hash], data);
}
