use anyhow::{Context, Result, bail};
use bigfile_api::Client;
use bigfile_uploader::logging::init_logging;
use bigfile_uploader::{
    AppConfig, HttpRemoteStore, LogConfig, MemoryRemoteStore, NoticeLevel, RemoteStore, TaskEvent,
    TaskId, TaskSnapshot, TaskStatus, UploadManager,
};
use clap::Parser;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{StreamExt, StreamMap};

/// Resumable chunked uploads
#[derive(Parser, Debug)]
#[command(name = "bigfile-upload", version, about)]
struct Cli {
    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Upload service base URL (overrides the config file)
    #[arg(long)]
    server: Option<String>,

    /// Config file (defaults to ~/.bigfile-uploader/config.json)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Upload to an in-memory store instead of the server
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load_default()?,
    };
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    config.validate()?;

    let _log_guard = init_logging(LogConfig::from_app_config(&config))?;

    let store: Arc<dyn RemoteStore> = if cli.dry_run {
        tracing::info!(target: "main", "Dry run: uploading to in-memory store");
        Arc::new(MemoryRemoteStore::new())
    } else {
        let client = Client::new(config.client_config()).context("Failed to create API client")?;
        Arc::new(HttpRemoteStore::new(Arc::new(client)))
    };
    let manager = UploadManager::new(store, config.uploader_config());

    let mut failed = 0usize;
    let mut handles = Vec::new();
    for path in &cli.files {
        match manager.enqueue(path).await {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                failed += 1;
            }
        }
    }

    // Subscribe before starting so no transition is missed
    let mut events = StreamMap::new();
    let mut names = HashMap::new();
    for handle in &handles {
        events.insert(handle.id(), BroadcastStream::new(handle.subscribe()));
        names.insert(handle.id(), handle.snapshot().file_name);
    }
    for handle in &handles {
        handle.start().await?;
    }

    let mut settled: HashSet<TaskId> = HashSet::new();
    while settled.len() < handles.len() {
        let Some((id, event)) = events.next().await else {
            break;
        };
        let name = names.get(&id).map(String::as_str).unwrap_or("?");

        match event {
            Ok(TaskEvent::Snapshot(snapshot)) => {
                print_snapshot(&snapshot);
                if snapshot.status.is_terminal() {
                    settled.insert(id);
                }
            }
            Ok(TaskEvent::HashProgress { percent, .. }) => {
                if percent % 25 == 0 {
                    println!("{}: hashing {}%", name, percent);
                }
            }
            Ok(TaskEvent::Notice { level, message, .. }) => match level {
                NoticeLevel::Error => eprintln!("{}: {}", name, message),
                _ => println!("{}: {}", name, message),
            },
            Err(e) => {
                tracing::debug!(target: "main", task_id = %id, error = %e, "Progress output lagged");
                if handles
                    .iter()
                    .any(|h| h.id() == id && h.snapshot().status.is_terminal())
                {
                    settled.insert(id);
                }
            }
        }
    }

    for handle in &handles {
        let snapshot = handle.snapshot();
        match snapshot.status {
            TaskStatus::Completed => {
                let url = snapshot.final_url.as_deref().unwrap_or("-");
                println!("{}: done ({})", snapshot.file_name, url);
            }
            _ => failed += 1,
        }
    }

    if failed > 0 {
        bail!("{} upload(s) failed", failed);
    }
    Ok(())
}

fn print_snapshot(snapshot: &TaskSnapshot) {
    match snapshot.status {
        TaskStatus::Uploading => println!(
            "{}: {} {}% ({}/{} chunks) {} ETA {}",
            snapshot.file_name,
            snapshot.status,
            snapshot.percent,
            snapshot.uploaded_chunks.len(),
            snapshot.total_chunks,
            snapshot.speed_label,
            snapshot.eta_label
        ),
        _ => println!("{}: {}", snapshot.file_name, snapshot.status),
    }
}
