//! Download manager seam
//!
//! The engine never writes files itself. Exports and assets are handed to a
//! [`DownloadManager`], which progresses independently and reports back via
//! [`DownloadDelta`] notifications that the embedding application forwards to
//! [`crate::Harvester::notify_download_changed`].

mod local;

pub use local::LocalDownloadManager;

use crate::error::Result;
use crate::types::DownloadId;
use serde::{Deserialize, Serialize};

/// What to download
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadSource {
    /// Remote URL
    Url(String),
    /// In-memory payload (metadata exports)
    Blob {
        /// Local reference handed out for the payload, released once the download completes
        reference: String,
        /// File contents
        bytes: Vec<u8>,
        /// MIME type of the payload
        mime: String,
    },
}

/// What to do when the destination file already exists
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictAction {
    /// Replace the existing file
    #[default]
    Overwrite,
    /// Pick a fresh name next to the existing file
    Uniquify,
}

/// A download to start
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Source of the bytes
    pub source: DownloadSource,
    /// Destination path relative to the download directory
    pub filename: String,
    /// Conflict policy
    pub conflict: ConflictAction,
}

/// How to look up existing downloads
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadQuery {
    /// By download manager id
    ById(DownloadId),
    /// By destination path relative to the download directory
    ByFilename(String),
}

/// Lifecycle state of a download
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    /// Receiving data (possibly paused)
    InProgress,
    /// Stopped by an error
    Interrupted,
    /// All bytes written
    Complete,
}

/// Snapshot of a known download
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadInfo {
    /// Download id
    pub id: DownloadId,
    /// Destination path relative to the download directory
    pub filename: String,
    /// Current state
    pub state: DownloadState,
    /// Whether the download is paused
    pub paused: bool,
    /// Whether [`DownloadManager::resume`] can continue it
    pub can_resume: bool,
    /// Whether the destination file is present on disk
    pub exists: bool,
}

/// Change notification for one download; absent fields did not change
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadDelta {
    /// Download id
    pub id: DownloadId,
    /// New state
    pub state: Option<DownloadState>,
    /// New paused flag
    pub paused: Option<bool>,
    /// Error reported by the manager
    pub error: Option<String>,
}

impl DownloadDelta {
    /// Delta carrying only a state transition
    pub fn state(id: DownloadId, state: DownloadState) -> Self {
        Self {
            id,
            state: Some(state),
            ..Default::default()
        }
    }
}

/// External download subsystem
#[async_trait::async_trait]
pub trait DownloadManager: Send + Sync {
    /// Start a download and return its id
    async fn download(&self, request: DownloadRequest) -> Result<DownloadId>;

    /// Known downloads matching `query`, most recent first
    async fn search(&self, query: DownloadQuery) -> Result<Vec<DownloadInfo>>;

    /// Pause an in-flight download
    async fn pause(&self, id: DownloadId) -> Result<()>;

    /// Resume a paused or interrupted download
    async fn resume(&self, id: DownloadId) -> Result<()>;

    /// Reveal a downloaded file to the user
    async fn show(&self, id: DownloadId) -> Result<()>;

    /// Release the local reference of a blob download
    async fn release_blob(&self, _reference: &str) -> Result<()> {
        Ok(())
    }
}
