//! Harvesting engine split into focused submodules.
//!
//! The `Harvester` struct and its methods are organized by concern:
//! - [`queue`] - URL checks and queue mutation
//! - [`control`] - Processing toggle, pause, retry of skipped assets
//! - [`driver`] - Scheduler loop and the `advance` dispatch
//! - [`retrieval`] - Paginated catalog retrieval for one item
//! - [`export_stage`] - Per-item and combined metadata exports
//! - [`assets`] - Sequential asset downloads for one item
//! - [`coordinator`] - Duplicate-avoiding lookups against the download manager
//! - [`events`] - Reactions to download change notifications

mod assets;
mod control;
mod coordinator;
mod driver;
mod events;
mod export_stage;
mod queue;
mod retrieval;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use queue::make_uid;

use crate::activity_log;
use crate::catalog::{CatalogAdapter, PageFetcher};
use crate::config::Config;
use crate::download_manager::{DownloadDelta, DownloadManager};
use crate::error::Result;
use crate::store::StateStore;
use crate::types::{Event, HarvestState, LogEntry, LogKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// External collaborators, injected at construction
#[derive(Clone)]
pub struct Services {
    /// Persistent key-value store for the state document
    pub store: Arc<dyn StateStore>,
    /// Catalog-specific URL building, validation and parsing
    pub catalog: Arc<dyn CatalogAdapter>,
    /// Fetches catalog API pages
    pub fetcher: Arc<dyn PageFetcher>,
    /// Download subsystem for exports and assets
    pub downloads: Arc<dyn DownloadManager>,
}

/// What the driver does after one step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Advance again immediately
    Continue,
    /// Advance again after a fixed delay
    After(Duration),
    /// Nothing to schedule; a download change notification will move things on
    Wait,
    /// Processing is off
    Halt,
}

/// Unit of work pulled by the driver loop
#[derive(Debug)]
pub(crate) enum Task {
    Advance,
    DownloadChanged(DownloadDelta),
}

/// The harvesting engine (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Harvester {
    /// The persisted document; every mutation is followed by a save under the same lock
    pub(crate) state: Arc<Mutex<HarvestState>>,
    /// External collaborators
    pub(crate) services: Services,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Token of the current run; cancelled means processing is off
    pub(crate) run: Arc<Mutex<CancellationToken>>,
    /// Token of the pending delayed continuation, if any
    pub(crate) timer: Arc<Mutex<CancellationToken>>,
    /// Task channel feeding the driver loop
    pub(crate) task_tx: mpsc::UnboundedSender<Task>,
    /// Receiving end, taken once by [`Harvester::start_driver`]
    pub(crate) task_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Task>>>>,
    /// Stops the driver loop
    pub(crate) shutdown: CancellationToken,
}

impl Harvester {
    /// Create a harvester and load its persisted state
    ///
    /// The stored document is merged over structural defaults, every item's
    /// full title is recomputed and old completed items are pruned. Processing
    /// starts switched off; call [`Harvester::start_driver`] and then
    /// [`Harvester::toggle`].
    pub async fn new(config: Config, services: Services) -> Result<Self> {
        config.validate()?;

        let key = &config.persistence.state_key;
        let mut state = match services.store.get(key).await? {
            Some(value) => serde_json::from_value::<HarvestState>(value)?,
            None => HarvestState::default(),
        };
        for qitem in &mut state.queue {
            qitem.item.refresh_full_title();
        }
        let pruned = queue::prune(&mut state, config.max_archived_queue_items);
        if pruned > 0 {
            tracing::info!(pruned, "pruned archived queue items");
            services.store.set(key, &serde_json::to_value(&state)?).await?;
        }

        tracing::info!(
            catalog = services.catalog.name(),
            queued = state.queue.len(),
            "harvester initialized"
        );

        let (event_tx, _rx) = broadcast::channel(1000);
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let stopped = CancellationToken::new();
        stopped.cancel();

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            services,
            config: Arc::new(config),
            event_tx,
            run: Arc::new(Mutex::new(stopped.clone())),
            timer: Arc::new(Mutex::new(stopped)),
            task_tx,
            task_rx: Arc::new(Mutex::new(Some(task_rx))),
            shutdown: CancellationToken::new(),
        })
    }

    /// Subscribe to harvester events
    ///
    /// Multiple subscribers are supported. A subscriber that falls more than
    /// 1000 events behind receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Copy of the current state document
    pub async fn snapshot(&self) -> HarvestState {
        self.state.lock().await.clone()
    }

    /// Whether processing is switched on
    pub async fn is_in_progress(&self) -> bool {
        !self.run.lock().await.is_cancelled()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Token of the current run
    pub(crate) async fn run_token(&self) -> CancellationToken {
        self.run.lock().await.clone()
    }

    /// Emit an event to all subscribers; dropped when nobody listens
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Write the state document to the store
    pub(crate) async fn persist(&self, state: &HarvestState) -> Result<()> {
        let value = serde_json::to_value(state)?;
        self.services
            .store
            .set(&self.config.persistence.state_key, &value)
            .await?;
        self.emit_event(Event::StateChanged);
        Ok(())
    }

    /// Persist from inside a stage, where a failure can only be reported
    pub(crate) async fn save(&self, state: &HarvestState) {
        if let Err(e) = self.persist(state).await {
            tracing::error!(error = %e, "failed to persist harvest state");
        }
    }

    /// Add an entry to the bounded log and announce it
    pub(crate) fn log(&self, state: &mut HarvestState, entry: LogEntry, replace: bool) {
        match entry.kind {
            LogKind::Error => tracing::warn!(text = %entry.text, "harvest log"),
            _ => tracing::debug!(kind = ?entry.kind, text = %entry.text, "harvest log"),
        }
        activity_log::push(
            &mut state.log,
            entry.clone(),
            replace,
            self.config.max_log_count,
        );
        self.emit_event(Event::Log { entry });
    }
}
