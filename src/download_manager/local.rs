//! Directory-backed download manager using reqwest

use super::{
    ConflictAction, DownloadDelta, DownloadInfo, DownloadManager, DownloadQuery, DownloadRequest,
    DownloadSource, DownloadState,
};
use crate::error::Result;
use crate::types::DownloadId;
use crate::Error;
use futures::StreamExt;
use reqwest::header::RANGE;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

/// Writes downloads below a directory and reports changes on a broadcast channel
///
/// Remote URLs are streamed to disk; a paused or interrupted transfer resumes
/// with an HTTP `Range` request from the bytes already on disk.
#[derive(Clone)]
pub struct LocalDownloadManager {
    inner: Arc<Inner>,
}

struct Inner {
    client: reqwest::Client,
    download_dir: PathBuf,
    next_id: AtomicI64,
    entries: Mutex<Vec<Entry>>,
    delta_tx: broadcast::Sender<DownloadDelta>,
}

struct Entry {
    id: DownloadId,
    filename: String,
    path: PathBuf,
    // None for blob downloads, which cannot be resumed
    url: Option<String>,
    state: DownloadState,
    paused: bool,
    error: Option<String>,
    cancel: CancellationToken,
}

enum Outcome {
    Complete,
    Paused,
    Failed(String),
}

impl LocalDownloadManager {
    /// Manager writing below `download_dir`
    pub fn new(download_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("bulk-harvest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let (delta_tx, _) = broadcast::channel(1000);
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                download_dir: download_dir.into(),
                next_id: AtomicI64::new(1),
                entries: Mutex::new(Vec::new()),
                delta_tx,
            }),
        })
    }

    /// Subscribe to download change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadDelta> {
        self.inner.delta_tx.subscribe()
    }

    /// Directory downloads are written to
    pub fn download_dir(&self) -> &Path {
        &self.inner.download_dir
    }

    /// Absolute path of a known download
    pub async fn path_of(&self, id: DownloadId) -> Option<PathBuf> {
        let entries = self.inner.entries.lock().await;
        entries.iter().find(|e| e.id == id).map(|e| e.path.clone())
    }

    fn spawn_transfer(
        &self,
        id: DownloadId,
        source: DownloadSource,
        path: PathBuf,
        cancel: CancellationToken,
    ) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => Outcome::Paused,
                result = inner.transfer(source, &path) => match result {
                    Ok(()) => Outcome::Complete,
                    Err(e) => Outcome::Failed(e.to_string()),
                },
            };
            inner.finish(id, outcome).await;
        });
    }
}

impl Inner {
    async fn transfer(&self, source: DownloadSource, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let url = match source {
            DownloadSource::Blob { bytes, .. } => {
                tokio::fs::write(path, &bytes).await?;
                return Ok(());
            }
            DownloadSource::Url(url) => url,
        };

        let offset = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        let mut request = self.client.get(&url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = request.send().await?.error_for_status()?;

        // Unbuffered writes keep the file length equal to the bytes received,
        // which is the resume offset after a pause
        let mut file = if offset > 0 && response.status().as_u16() == 206 {
            tokio::fs::OpenOptions::new().append(true).open(path).await?
        } else {
            tokio::fs::File::create(path).await?
        };

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn finish(&self, id: DownloadId, outcome: Outcome) {
        let delta = {
            let mut entries = self.entries.lock().await;
            let Some(entry) = entries.iter_mut().find(|e| e.id == id) else {
                return;
            };
            match outcome {
                Outcome::Complete => {
                    tracing::info!(download_id = %id, path = %entry.path.display(), "download complete");
                    entry.state = DownloadState::Complete;
                    entry.paused = false;
                    DownloadDelta::state(id, DownloadState::Complete)
                }
                Outcome::Paused => {
                    tracing::debug!(download_id = %id, "download paused");
                    entry.paused = true;
                    DownloadDelta {
                        id,
                        paused: Some(true),
                        ..Default::default()
                    }
                }
                Outcome::Failed(message) => {
                    tracing::warn!(download_id = %id, error = %message, "download interrupted");
                    entry.state = DownloadState::Interrupted;
                    entry.error = Some(message.clone());
                    DownloadDelta {
                        id,
                        state: Some(DownloadState::Interrupted),
                        error: Some(message),
                        ..Default::default()
                    }
                }
            }
        };
        // No subscribers is fine
        let _ = self.delta_tx.send(delta);
    }

    fn resolve(&self, filename: &str) -> Result<PathBuf> {
        let relative = Path::new(filename);
        let safe = !filename.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(Error::DownloadManager(format!(
                "invalid download filename: {filename}"
            )));
        }
        Ok(self.download_dir.join(relative))
    }
}

/// `name.ext`, then `name-2.ext`, `name-3.ext`, ... until nothing exists
async fn unique_path(path: PathBuf) -> PathBuf {
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut n = 2;
    loop {
        let candidate = path.with_file_name(format!("{stem}-{n}{extension}"));
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}

#[async_trait::async_trait]
impl DownloadManager for LocalDownloadManager {
    async fn download(&self, request: DownloadRequest) -> Result<DownloadId> {
        let mut path = self.inner.resolve(&request.filename)?;
        let mut filename = request.filename.clone();
        if request.conflict == ConflictAction::Uniquify {
            path = unique_path(path).await;
            if let Ok(relative) = path.strip_prefix(&self.inner.download_dir) {
                filename = relative.to_string_lossy().into_owned();
            }
        }

        // An existing partial file must not be mistaken for resumable progress
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::remove_file(&path).await?;
        }

        let id = DownloadId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let cancel = CancellationToken::new();
        let url = match &request.source {
            DownloadSource::Url(url) => Some(url.clone()),
            DownloadSource::Blob { .. } => None,
        };

        self.inner.entries.lock().await.push(Entry {
            id,
            filename,
            path: path.clone(),
            url,
            state: DownloadState::InProgress,
            paused: false,
            error: None,
            cancel: cancel.clone(),
        });
        tracing::debug!(download_id = %id, path = %path.display(), "download started");

        self.spawn_transfer(id, request.source, path, cancel);
        Ok(id)
    }

    async fn search(&self, query: DownloadQuery) -> Result<Vec<DownloadInfo>> {
        let matches: Vec<(DownloadInfo, PathBuf)> = {
            let entries = self.inner.entries.lock().await;
            entries
                .iter()
                .rev()
                .filter(|entry| match &query {
                    DownloadQuery::ById(id) => entry.id == *id,
                    DownloadQuery::ByFilename(filename) => entry.filename == *filename,
                })
                .map(|entry| {
                    let info = DownloadInfo {
                        id: entry.id,
                        filename: entry.filename.clone(),
                        state: entry.state,
                        paused: entry.paused,
                        can_resume: entry.url.is_some()
                            && (entry.paused || entry.state == DownloadState::Interrupted),
                        exists: false,
                    };
                    (info, entry.path.clone())
                })
                .collect()
        };

        let mut results = Vec::with_capacity(matches.len());
        for (mut info, path) in matches {
            info.exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
            results.push(info);
        }
        Ok(results)
    }

    async fn pause(&self, id: DownloadId) -> Result<()> {
        let entries = self.inner.entries.lock().await;
        let entry = entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::NotFound(format!("download {id}")))?;
        if entry.state != DownloadState::InProgress || entry.paused {
            return Err(Error::InvalidState {
                operation: "pause download".to_string(),
                reason: "download is not running".to_string(),
            });
        }
        entry.cancel.cancel();
        Ok(())
    }

    async fn resume(&self, id: DownloadId) -> Result<()> {
        let (url, path, cancel) = {
            let mut entries = self.inner.entries.lock().await;
            let entry = entries
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or_else(|| Error::NotFound(format!("download {id}")))?;
            let resumable = entry.paused || entry.state == DownloadState::Interrupted;
            let Some(url) = entry.url.clone().filter(|_| resumable) else {
                return Err(Error::InvalidState {
                    operation: "resume download".to_string(),
                    reason: "download cannot be resumed".to_string(),
                });
            };
            entry.cancel = CancellationToken::new();
            entry.state = DownloadState::InProgress;
            entry.paused = false;
            entry.error = None;
            (url, entry.path.clone(), entry.cancel.clone())
        };

        tracing::debug!(download_id = %id, "download resumed");
        let _ = self.inner.delta_tx.send(DownloadDelta {
            id,
            state: Some(DownloadState::InProgress),
            paused: Some(false),
            error: None,
        });
        self.spawn_transfer(id, DownloadSource::Url(url), path, cancel);
        Ok(())
    }

    async fn show(&self, id: DownloadId) -> Result<()> {
        let path = self
            .path_of(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("download {id}")))?;
        tracing::info!(download_id = %id, path = %path.display(), "showing download");
        Ok(())
    }

    async fn release_blob(&self, reference: &str) -> Result<()> {
        tracing::debug!(reference, "released blob reference");
        Ok(())
    }
}
