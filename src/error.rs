//! Error types for bulk-harvest
//!
//! Two layers exist:
//! - [`Error`] is returned by operations callers invoke directly (adding to
//!   the queue, reordering, opening the store, talking to collaborators).
//! - Stage failures inside the driver never surface as `Error`; they become
//!   log entries and status transitions (see [`crate::harvester::Step`]).

use thiserror::Error;

/// Result type alias for bulk-harvest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bulk-harvest
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_download_attempts")
        key: Option<String>,
    },

    /// A URL or queue operation was rejected before touching the queue
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The download manager refused or failed an operation
    #[error("download manager error: {0}")]
    DownloadManager(String),

    /// Queue item or download not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation is not allowed in the current state
    #[error("cannot {operation}: {reason}")]
    InvalidState {
        /// The operation that was attempted (e.g., "retry skipped assets")
        operation: String,
        /// Why it was refused
        reason: String,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Rejections raised synchronously before anything enters the queue
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The catalog adapter cannot build an API URL for this page
    #[error("URL is not supported by this catalog: {url}")]
    UnsupportedUrl {
        /// The rejected page URL
        url: String,
    },

    /// The catalog answered, but the payload is not something we can harvest
    #[error("{message}")]
    InvalidPage {
        /// Adapter-provided explanation
        message: String,
    },

    /// The URL is already queued
    #[error("URL is already in queue: {url}")]
    AlreadyQueued {
        /// The duplicate URL
        url: String,
    },

    /// The source reports more results than the configured limit
    #[error("{count} results exceed the limit of {limit}")]
    TooManyResults {
        /// Results reported by the catalog
        count: u64,
        /// Configured maximum
        limit: u64,
    },

    /// Queue edits are locked while processing is enabled
    #[error("cannot {operation} while the queue is running")]
    ProcessingActive {
        /// The refused operation (e.g., "move queue item")
        operation: String,
    },

    /// Index does not point at a queue item
    #[error("no queue item at index {index}")]
    NoSuchItem {
        /// The offending index
        index: usize,
    },
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}
