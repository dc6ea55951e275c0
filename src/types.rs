//! Core types for bulk-harvest
//!
//! Everything in here is part of the persisted state document (`state` key)
//! except [`Event`], which is broadcast to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{AssetCandidate, PageResponse, Record};

/// Identifier assigned by the download manager to a single download
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DownloadId(pub i64);

impl DownloadId {
    /// Create a new DownloadId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for DownloadId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for DownloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a queue item
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting for the driver to pick it up
    #[default]
    Queued,
    /// Catalog pages are being fetched
    RetrievingData,
    /// A catalog page exceeded its attempt budget
    DataRetrievalError,
    /// Every catalog page has been fetched
    RetrievedData,
    /// The per-item metadata export is in flight
    DownloadingData,
    /// The per-item metadata export finished (or was not needed)
    DownloadedData,
    /// Assets are being downloaded one by one
    DownloadingAssets,
    /// Nothing left to do for this item
    Completed,
}

impl ItemStatus {
    /// Wire representation used in the persisted document
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Queued => "queued",
            ItemStatus::RetrievingData => "retrieving_data",
            ItemStatus::DataRetrievalError => "data_retrieval_error",
            ItemStatus::RetrievedData => "retrieved_data",
            ItemStatus::DownloadingData => "downloading_data",
            ItemStatus::DownloadedData => "downloaded_data",
            ItemStatus::DownloadingAssets => "downloading_assets",
            ItemStatus::Completed => "completed",
        }
    }

    /// Human-readable label for status columns
    pub fn label(&self) -> &'static str {
        match self {
            ItemStatus::Queued => "queued",
            ItemStatus::RetrievingData => "retrieving data",
            ItemStatus::DataRetrievalError => "data retrieval error",
            ItemStatus::RetrievedData => "retrieved data",
            ItemStatus::DownloadingData => "downloading data",
            ItemStatus::DownloadedData => "downloaded data",
            ItemStatus::DownloadingAssets => "downloading assets",
            ItemStatus::Completed => "completed",
        }
    }

    /// Whether the status carries an error decoration
    pub fn is_error(&self) -> bool {
        matches!(self, ItemStatus::DataRetrievalError)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single unit of work: a catalog page request or an asset download
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// Not started yet
    #[default]
    Queued,
    /// Request or download is in flight
    InProgress,
    /// Finished (successfully, or abandoned for resources marked `skipped`)
    Completed,
    /// Last attempt failed; will be retried
    Error,
}

/// Format of exported metadata files
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// Comma-separated values, every field quoted
    #[default]
    Csv,
    /// JSON array of records
    Json,
}

impl DataFormat {
    /// File extension without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Json => "json",
        }
    }

    /// MIME type handed to the download manager for blob exports
    pub fn mime_type(&self) -> &'static str {
        match self {
            DataFormat::Csv => "text/csv;charset=utf-8",
            DataFormat::Json => "application/json;charset=utf-8",
        }
    }
}

/// What the driver produces for each queue item
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadOption {
    /// Metadata export only
    #[default]
    Data,
    /// Asset files only
    Assets,
    /// Metadata export, then asset files
    Both,
}

impl DownloadOption {
    /// Whether metadata exports are produced
    pub fn includes_data(&self) -> bool {
        matches!(self, DownloadOption::Data | DownloadOption::Both)
    }

    /// Whether asset files are downloaded
    pub fn includes_assets(&self) -> bool {
        matches!(self, DownloadOption::Assets | DownloadOption::Both)
    }
}

/// Which size variant of an asset to fetch when several exist
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetSize {
    /// First listed variant
    #[default]
    Smallest,
    /// Middle variant
    Medium,
    /// Last listed variant
    Largest,
}

impl AssetSize {
    /// Pick a URL out of size variants ordered smallest to largest
    pub fn pick<'a>(&self, sizes: &'a [String]) -> Option<&'a str> {
        let index = match self {
            AssetSize::Smallest => 0,
            AssetSize::Medium => sizes.len() / 2,
            AssetSize::Largest => sizes.len().checked_sub(1)?,
        };
        sizes.get(index).map(String::as_str)
    }
}

/// How many asset candidates are kept per catalog result
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceDownload {
    /// Only the first candidate of each result
    #[default]
    First,
    /// Every candidate
    All,
}

/// User-facing settings, persisted with the queue
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Export format for metadata
    pub data_format: DataFormat,
    /// What to produce per item
    pub download_option: DownloadOption,
    /// Preferred asset size
    pub asset_size: AssetSize,
    /// Candidate selection policy
    pub resource_download: ResourceDownload,
}

/// Normalized description of what the user queued
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SourceItem {
    /// Page URL the user was looking at
    pub url: String,
    /// First API page URL (already carrying the page size)
    #[serde(rename = "apiURL")]
    pub api_url: String,
    /// Catalog title
    pub title: String,
    /// Title decorated with facets, recomputed on load
    pub full_title: String,
    /// Search facets / filters in effect
    pub facets: Vec<String>,
    /// Kind of page reported by the catalog (item, query, collection)
    #[serde(rename = "type")]
    pub kind: String,
    /// Number of results reported by the catalog
    pub count: u64,
    /// Filesystem-safe identifier used for export files and asset folders
    pub uid: String,
}

impl SourceItem {
    /// Build `full_title` from `title` and `facets`
    pub fn compose_full_title(title: &str, facets: &[String]) -> String {
        if facets.is_empty() {
            title.to_string()
        } else {
            format!("{} ({})", title, facets.join(", "))
        }
    }

    /// Recompute `full_title` in place
    pub fn refresh_full_title(&mut self) {
        self.full_title = Self::compose_full_title(&self.title, &self.facets);
    }
}

/// One paginated catalog request belonging to a queue item
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiRequest {
    /// Position in the item's request list (always equal to its index)
    pub index: usize,
    /// Page URL
    pub url: String,
    /// Request status
    pub status: WorkStatus,
    /// Attempts made so far
    pub attempts: u32,
    /// Normalized page once fetched and parsed
    pub response: Option<PageResponse>,
    /// Overall result count, once known
    pub total: Option<u64>,
}

impl ApiRequest {
    /// A fresh, queued request
    pub fn queued(index: usize, url: impl Into<String>, total: Option<u64>) -> Self {
        Self {
            index,
            url: url.into(),
            status: WorkStatus::Queued,
            attempts: 0,
            response: None,
            total,
        }
    }
}

/// One asset file to download for a queue item
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Resource {
    /// Source URL, `None` when the catalog listed no usable variant
    pub url: Option<String>,
    /// Destination filename (relative to the item folder)
    pub filename: String,
    /// Download status
    pub status: WorkStatus,
    /// Download attempts started so far
    pub attempts: u32,
    /// Download manager id of the latest attempt
    pub download_id: Option<DownloadId>,
    /// Abandoned after exhausting its attempts (or having no URL)
    pub skipped: bool,
}

/// One harvesting job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueItem {
    /// Lifecycle status
    pub status: ItemStatus,
    /// Only selected items are processed
    pub selected: bool,
    /// When the item was queued
    pub added_at: DateTime<Utc>,
    /// What was queued
    pub item: SourceItem,
    /// Catalog page requests, in order
    pub api_requests: Vec<ApiRequest>,
    /// Asset downloads, materialized on first asset pass
    pub resources: Vec<Resource>,
    /// Download id of the per-item metadata export
    pub data_download_id: Option<DownloadId>,
    /// Local blob reference handed to the download manager for the export
    #[serde(rename = "dataURL")]
    pub data_url: Option<String>,
    /// Export filename
    pub data_filename: Option<String>,
    /// Number of resources abandoned after exhausting their attempts
    pub skipped: usize,
}

impl Default for QueueItem {
    fn default() -> Self {
        Self {
            status: ItemStatus::Queued,
            selected: true,
            added_at: Utc::now(),
            item: SourceItem::default(),
            api_requests: Vec::new(),
            resources: Vec::new(),
            data_download_id: None,
            data_url: None,
            data_filename: None,
            skipped: 0,
        }
    }
}

impl QueueItem {
    /// Wrap a validated source item as a fresh queue entry
    pub fn new(item: SourceItem) -> Self {
        Self {
            item,
            ..Self::default()
        }
    }

    /// Selected and not yet completed
    pub fn is_active(&self) -> bool {
        self.selected && self.status != ItemStatus::Completed
    }

    /// Results of every fetched page, in page order
    pub fn flattened_results(&self) -> Vec<Record> {
        self.api_requests
            .iter()
            .filter_map(|req| req.response.as_ref())
            .flat_map(|page| page.results.iter().cloned())
            .collect()
    }

    /// Asset candidates of every fetched page, with `result` rebased onto the
    /// flattened result list
    pub fn flattened_candidates(&self) -> Vec<AssetCandidate> {
        let mut offset = 0;
        let mut candidates = Vec::new();
        for page in self.api_requests.iter().filter_map(|req| req.response.as_ref()) {
            for candidate in &page.resources {
                let mut candidate = candidate.clone();
                candidate.result += offset;
                candidates.push(candidate);
            }
            offset += page.results.len();
        }
        candidates
    }

    /// Number of resources that were skipped
    pub fn count_skipped(&self) -> usize {
        self.resources.iter().filter(|r| r.skipped).count()
    }

    /// Put a finished item back at the start of the pipeline
    pub fn requeue(&mut self) {
        self.status = ItemStatus::Queued;
        self.api_requests.clear();
        self.resources.clear();
        self.data_download_id = None;
        self.data_url = None;
        self.data_filename = None;
        self.skipped = 0;
    }
}

/// Cross-item state for the combined metadata export
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Batch {
    /// Download id of the combined export
    pub data_download_combined_id: Option<DownloadId>,
    /// Local blob reference of the combined export
    #[serde(rename = "dataCombinedURL")]
    pub data_combined_url: Option<String>,
    /// Combined export filename
    pub data_combined_filename: Option<String>,
    /// Whether the combined export finished during this pass
    pub data_combined_completed: bool,
}

/// Severity of a log entry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Progress information
    #[default]
    Notice,
    /// Something finished successfully
    Success,
    /// Something failed
    Error,
    /// The queue finished
    Done,
}

/// Follow-up the UI may offer next to a log entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogAction {
    /// Reveal the downloaded file
    OpenFolder {
        /// Download to reveal
        download_id: DownloadId,
    },
    /// Retry resources skipped during the last pass
    RetrySkipped,
}

/// One entry in the bounded activity log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the entry was written
    pub time: DateTime<Utc>,
    /// Severity
    #[serde(rename = "type")]
    pub kind: LogKind,
    /// Plain-text message
    pub text: String,
    /// Optional follow-up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<LogAction>,
}

impl LogEntry {
    /// Entry stamped with the current time
    pub fn now(kind: LogKind, text: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            kind,
            text: text.into(),
            action: None,
        }
    }

    /// Attach a follow-up action
    pub fn with_action(mut self, action: LogAction) -> Self {
        self.action = Some(action);
        self
    }
}

/// The whole persisted document
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestState {
    /// Most-recent-first activity log
    pub log: Vec<LogEntry>,
    /// Queue, oldest first
    pub queue: Vec<QueueItem>,
    /// User settings
    pub settings: Settings,
    /// Combined export state
    pub batch: Batch,
}

impl HarvestState {
    /// Index of the first active item
    pub fn next_active_index(&self) -> Option<usize> {
        self.queue.iter().position(QueueItem::is_active)
    }

    /// Index of the item with the given uid
    pub fn position_of(&self, uid: &str) -> Option<usize> {
        self.queue.iter().position(|q| q.item.uid == uid)
    }

    /// Number of selected items
    pub fn selected_count(&self) -> usize {
        self.queue.iter().filter(|q| q.selected).count()
    }
}

/// Events broadcast to subscribers (UI, logging, tests)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The persisted document changed
    StateChanged,
    /// A log entry was written (or replaced the most recent one)
    Log {
        /// The entry
        entry: LogEntry,
    },
    /// Processing was switched on or off
    ProcessingChanged {
        /// New value of the processing flag
        in_progress: bool,
    },
    /// The driver ran out of active items
    QueueFinished {
        /// Resources skipped during the pass
        skipped: usize,
    },
}
