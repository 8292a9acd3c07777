//! Whole-file MD5 fingerprinting on a blocking worker thread

use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::progress;
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default read slice: 2 MiB
pub const DEFAULT_HASH_SLICE_SIZE: usize = 2 * 1024 * 1024;

/// Events emitted by a running hasher
///
/// Zero or more `Progress` events, then exactly one of `Complete` or `Error`,
/// unless the hasher was cancelled, in which case nothing further is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HasherEvent {
    /// Percent of the file read so far
    Progress(u8),
    /// Lowercase hex MD5 digest
    Complete(String),
    Error(String),
}

/// Streams a file through MD5 in bounded slices
#[derive(Debug, Clone)]
pub struct ContentHasher {
    slice_size: usize,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_SLICE_SIZE)
    }
}

impl ContentHasher {
    pub fn new(slice_size: usize) -> Self {
        Self {
            slice_size: slice_size.max(1),
        }
    }

    pub fn slice_size(&self) -> usize {
        self.slice_size
    }

    /// Hash `path` on the blocking pool, reporting through `events`
    pub fn spawn(
        &self,
        path: PathBuf,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<HasherEvent>,
    ) -> JoinHandle<()> {
        let slice_size = self.slice_size;

        tokio::task::spawn_blocking(move || {
            tracing::debug!(target: "uploader::hasher", path = %path.display(), slice_size, "Hashing started");

            let result = hash_blocking(&path, slice_size, &cancel, |percent| {
                let _ = events.send(HasherEvent::Progress(percent));
            });

            match result {
                Ok(Some(hash)) if !cancel.is_cancelled() => {
                    tracing::debug!(target: "uploader::hasher", path = %path.display(), hash = %hash, "Hashing finished");
                    let _ = events.send(HasherEvent::Complete(hash));
                }
                Ok(_) => {
                    tracing::debug!(target: "uploader::hasher", path = %path.display(), "Hashing cancelled");
                }
                Err(e) if !cancel.is_cancelled() => {
                    tracing::warn!(target: "uploader::hasher", path = %path.display(), error = %e, "Hashing failed");
                    let _ = events.send(HasherEvent::Error(e.to_string()));
                }
                Err(_) => {}
            }
        })
    }

    /// Hash a file to completion without progress reporting
    pub async fn hash_file(&self, path: &Path) -> UploadResult<String> {
        let path = path.to_path_buf();
        let slice_size = self.slice_size;
        let never = CancellationToken::new();

        let hash = tokio::task::spawn_blocking(move || hash_blocking(&path, slice_size, &never, |_| {}))
            .await
            .map_err(|e| UploadError::HashCompute(e.to_string()))?
            .map_err(|e| UploadError::HashCompute(e.to_string()))?;

        hash.ok_or(UploadError::Cancelled)
    }
}

/// Returns `Ok(None)` if cancelled between slices.
fn hash_blocking(
    path: &Path,
    slice_size: usize,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(u8),
) -> io::Result<Option<String>> {
    let mut file = File::open(path)?;
    let total = file.metadata()?.len();

    let mut hasher = Md5::new();
    let mut buf = vec![0u8; slice_size];
    let mut read_so_far: u64 = 0;
    let mut last_percent: Option<u8> = None;

    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        read_so_far += n as u64;

        let percent = progress::percent(read_so_far, total);
        if last_percent != Some(percent) {
            on_progress(percent);
            last_percent = Some(percent);
        }
    }

    if cancel.is_cancelled() {
        return Ok(None);
    }
    if last_percent != Some(100) {
        on_progress(100);
    }

    Ok(Some(hex::encode(hasher.finalize())))
}
