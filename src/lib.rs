//! # bulk-harvest
//!
//! Resumable queue engine for bulk-harvesting metadata and assets from
//! paginated catalog APIs.
//!
//! ## Design Philosophy
//!
//! bulk-harvest is designed to be:
//! - **Resumable** - The whole queue lives in one persisted document; a restart picks up where it stopped
//! - **Polite** - One request or download at a time, with fixed delays between them
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use bulk_harvest::{
//!     Config, Database, Harvester, HttpPageFetcher, LocCatalog, LocalDownloadManager, Services,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let downloads = LocalDownloadManager::new("./downloads", config.request_timeout)?;
//!     let services = Services {
//!         store: Arc::new(Database::new(&config.persistence.database_path).await?),
//!         catalog: Arc::new(LocCatalog::new()),
//!         fetcher: Arc::new(HttpPageFetcher::new(config.request_timeout)?),
//!         downloads: Arc::new(downloads.clone()),
//!     };
//!
//!     let harvester = Harvester::new(config, services).await?;
//!     harvester.listen(downloads.subscribe());
//!
//!     // Subscribe to events
//!     let mut events = harvester.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     harvester.add_url("https://www.loc.gov/collections/civil-war-maps/").await?;
//!     harvester.toggle().await;
//!
//!     bulk_harvest::run_with_shutdown(harvester).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Bounded user-visible activity log
pub mod activity_log;
/// Catalog adapters and page fetching
pub mod catalog;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Download manager seam and the directory-backed implementation
pub mod download_manager;
/// Error types
pub mod error;
/// CSV and JSON export of harvested records
pub mod export;
/// Queue engine (decomposed into focused submodules)
pub mod harvester;
/// Key-value persistence seam
pub mod store;
/// Core types
pub mod types;

// Re-export commonly used types
pub use catalog::{CatalogAdapter, HttpPageFetcher, LocCatalog, PageFetcher};
pub use config::{Config, PersistenceConfig};
pub use db::Database;
pub use download_manager::{DownloadDelta, DownloadManager, DownloadState, LocalDownloadManager};
pub use error::{DatabaseError, Error, Result, ValidationError};
pub use harvester::{Harvester, Services, Step};
pub use store::{MemoryStore, StateStore};
pub use types::{
    DataFormat, DownloadId, DownloadOption, Event, HarvestState, ItemStatus, LogEntry, LogKind,
    QueueItem, Settings, SourceItem,
};

/// Helper function to run the harvester with graceful signal handling.
///
/// Starts the driver loop, waits for a termination signal, then calls the
/// harvester's `shutdown()` method and waits for the loop to stop.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use bulk_harvest::{
///     Config, Harvester, HttpPageFetcher, LocCatalog, LocalDownloadManager, MemoryStore,
///     Services, run_with_shutdown,
/// };
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let services = Services {
///         store: Arc::new(MemoryStore::new()),
///         catalog: Arc::new(LocCatalog::new()),
///         fetcher: Arc::new(HttpPageFetcher::new(config.request_timeout)?),
///         downloads: Arc::new(LocalDownloadManager::new("./downloads", config.request_timeout)?),
///     };
///     let harvester = Harvester::new(config, services).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(harvester).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(harvester: Harvester) -> Result<()> {
    let driver = harvester.start_driver().await?;
    wait_for_signal().await;
    harvester.shutdown().await;
    if let Err(e) = driver.await {
        tracing::warn!(error = %e, "driver loop ended abnormally");
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
