//! Scheduler loop and the `advance` dispatch.
//!
//! All work runs on one task: the loop pulls a [`Task`], runs it until it
//! completes or suspends, and turns the returned [`Step`] into the next unit
//! of work. Delayed continuations are timers racing the run's cancellation
//! token, so switching processing off drops them.

use crate::download_manager::DownloadDelta;
use crate::error::{Error, Result};
use crate::types::{Batch, DownloadOption, Event, ItemStatus, LogAction, LogEntry, LogKind};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::{Harvester, Step, Task};

impl Harvester {
    /// Start the scheduler loop
    ///
    /// The loop runs until [`Harvester::shutdown`] is called. It can be
    /// started once per harvester.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] when the loop was already started.
    pub async fn start_driver(&self) -> Result<JoinHandle<()>> {
        let mut tasks = self
            .task_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::InvalidState {
                operation: "start driver".to_string(),
                reason: "the driver is already running".to_string(),
            })?;

        let harvester = self.clone();
        let shutdown = self.shutdown.clone();

        Ok(tokio::spawn(async move {
            tracing::info!("harvest driver started");
            loop {
                let task = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    task = tasks.recv() => match task {
                        Some(task) => task,
                        None => break,
                    },
                };

                let step = match task {
                    Task::Advance => {
                        // A direct advance supersedes a pending delayed one
                        harvester.timer.lock().await.cancel();
                        harvester.advance().await
                    }
                    Task::DownloadChanged(delta) => harvester.on_download_changed(delta).await,
                };
                harvester.schedule(step).await;
            }
            tracing::info!("harvest driver stopped");
        }))
    }

    /// Stop the scheduler loop
    ///
    /// Processing is force-paused first, which also pauses in-flight asset
    /// downloads. The state document is already persisted after every
    /// mutation, so nothing else needs flushing.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down harvester");
        self.pause(true).await;
        self.shutdown.cancel();
    }

    /// Forward a change notification from the download manager
    ///
    /// Notifications are handled on the scheduler loop, in order, after the
    /// step that is currently running.
    pub fn notify_download_changed(&self, delta: DownloadDelta) {
        self.task_tx.send(Task::DownloadChanged(delta)).ok();
    }

    /// Forward every notification of a broadcast channel until it closes
    ///
    /// Convenience for download managers that broadcast their deltas, such as
    /// [`crate::download_manager::LocalDownloadManager::subscribe`].
    pub fn listen(&self, mut deltas: broadcast::Receiver<DownloadDelta>) -> JoinHandle<()> {
        let harvester = self.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let delta = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    delta = deltas.recv() => delta,
                };
                match delta {
                    Ok(delta) => harvester.notify_download_changed(delta),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "download notifications were dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Run one step of the pipeline
    ///
    /// Picks the first active item and runs the stage matching its status.
    /// When processing is off this returns [`Step::Halt`] without touching
    /// the state.
    pub async fn advance(&self) -> Step {
        let token = self.run_token().await;
        if token.is_cancelled() {
            return Step::Halt;
        }

        let state = self.state.lock().await;
        let option = state.settings.download_option;

        let Some(index) = state.next_active_index() else {
            let needs_combined = option.includes_data()
                && state.selected_count() > 1
                && !state.batch.data_combined_completed;
            drop(state);
            if needs_combined {
                return self.export_combined(&token).await;
            }
            self.finish_queue().await;
            return Step::Halt;
        };

        let uid = state.queue[index].item.uid.clone();
        let status = state.queue[index].status;
        drop(state);

        tracing::debug!(uid = %uid, status = %status, "advancing");

        use DownloadOption::{Assets, Both, Data};
        use ItemStatus::*;
        match (status, option) {
            (Queued | RetrievingData | DataRetrievalError, _) => {
                self.retrieve_data(&uid, &token).await
            }
            (RetrievedData | DownloadingData, Data | Both) => self.export_item(&uid, &token).await,
            (DownloadedData, Data) => self.complete_item(&uid).await,
            (DownloadedData | DownloadingAssets, Both)
            | (RetrievedData | DownloadingData | DownloadedData | DownloadingAssets, Assets) => {
                self.download_assets(&uid, &token).await
            }
            // Settings switched to data-only while assets were downloading
            (DownloadingAssets, Data) => self.complete_item(&uid).await,
            (Completed, _) => Step::Continue,
        }
    }

    /// Turn a step into the next unit of work
    pub(crate) async fn schedule(&self, step: Step) {
        match step {
            Step::Continue => {
                self.task_tx.send(Task::Advance).ok();
            }
            Step::After(delay) => {
                let run = self.run_token().await;
                if run.is_cancelled() {
                    return;
                }
                let timer = run.child_token();
                {
                    let mut pending = self.timer.lock().await;
                    pending.cancel();
                    *pending = timer.clone();
                }
                let tasks = self.task_tx.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = timer.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            tasks.send(Task::Advance).ok();
                        }
                    }
                });
            }
            Step::Wait | Step::Halt => {}
        }
    }

    /// Mark an item completed and move on
    pub(crate) async fn complete_item(&self, uid: &str) -> Step {
        let mut state = self.state.lock().await;
        if let Some(pos) = state.position_of(uid) {
            let qitem = &mut state.queue[pos];
            qitem.status = ItemStatus::Completed;
            qitem.skipped = qitem.count_skipped();
            let skipped = qitem.skipped;
            self.save(&state).await;
            tracing::info!(uid = %uid, skipped, "item completed");
        }
        Step::Continue
    }

    /// Wrap up a pass once no active item is left
    ///
    /// Items without skipped assets are deselected, the batch is reset and a
    /// terminal log entry is written. Processing is switched off.
    pub(crate) async fn finish_queue(&self) {
        self.run_token().await.cancel();

        let mut state = self.state.lock().await;
        let skipped: usize = state
            .queue
            .iter()
            .filter(|q| q.selected)
            .map(|q| q.skipped)
            .sum();
        for qitem in &mut state.queue {
            if qitem.skipped == 0 {
                qitem.selected = false;
            }
        }
        state.batch = Batch::default();

        let entry = if skipped > 0 {
            LogEntry::now(
                LogKind::Done,
                format!("Queue finished with {skipped} skipped assets."),
            )
            .with_action(LogAction::RetrySkipped)
        } else {
            LogEntry::now(LogKind::Done, "Queue finished!")
        };
        self.log(&mut state, entry, false);
        self.save(&state).await;
        drop(state);

        tracing::info!(skipped, "queue finished");
        self.emit_event(Event::ProcessingChanged { in_progress: false });
        self.emit_event(Event::QueueFinished { skipped });
    }
}
