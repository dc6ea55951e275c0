//! Processing control: toggle, pause and retrying skipped assets.

use crate::error::{Error, Result, ValidationError};
use crate::types::{DownloadId, Event, ItemStatus, WorkStatus};
use tokio_util::sync::CancellationToken;

use super::{Harvester, Task};

impl Harvester {
    /// Switch processing on or off
    ///
    /// Turning processing on starts a fresh run and schedules the first
    /// `advance`. Turning it off cancels the run, which drops every pending
    /// delayed continuation, and pauses in-flight asset downloads.
    ///
    /// Returns the new value of the processing flag.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use bulk_harvest::*;
    /// # async fn example(harvester: Harvester) -> Result<()> {
    /// let _driver = harvester.start_driver().await?;
    /// let running = harvester.toggle().await;
    /// assert!(running);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn toggle(&self) -> bool {
        let mut run = self.run.lock().await;
        if run.is_cancelled() {
            *run = CancellationToken::new();
            drop(run);
            tracing::info!("processing started");
            self.emit_event(Event::ProcessingChanged { in_progress: true });
            self.task_tx.send(Task::Advance).ok();
            true
        } else {
            run.cancel();
            drop(run);
            tracing::info!("processing stopped");
            self.emit_event(Event::ProcessingChanged { in_progress: false });
            self.pause(false).await;
            false
        }
    }

    /// Pause the queue
    ///
    /// Without `force` this is a no-op while processing is enabled; only the
    /// driver itself stops a running queue (metadata failure, paused
    /// download). With `force` processing is switched off. In both remaining
    /// cases every asset download belonging to an in-progress resource is
    /// paused through the download manager.
    pub async fn pause(&self, force: bool) {
        let was_running = {
            let run = self.run.lock().await;
            let running = !run.is_cancelled();
            if running && !force {
                return;
            }
            run.cancel();
            running
        };
        if was_running {
            tracing::info!("processing paused");
            self.emit_event(Event::ProcessingChanged { in_progress: false });
        }
        self.pause_active_downloads().await;
    }

    async fn pause_active_downloads(&self) {
        let ids: Vec<DownloadId> = {
            let state = self.state.lock().await;
            state
                .queue
                .iter()
                .flat_map(|q| q.resources.iter())
                .filter(|r| r.status == WorkStatus::InProgress)
                .filter_map(|r| r.download_id)
                .collect()
        };

        for id in ids {
            if let Err(e) = self.services.downloads.pause(id).await {
                // Finished or never started downloads cannot be paused
                tracing::debug!(download_id = %id, error = %e, "could not pause asset download");
            }
        }
    }

    /// Retry every asset that was skipped during the last pass
    ///
    /// Skipped resources of selected, completed items go back to `queued`
    /// with a fresh attempt budget, their items return to
    /// `downloading_assets` and processing is switched on. The combined
    /// export already produced for the finished pass is not repeated.
    ///
    /// Returns the number of resources queued for retry.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::ProcessingActive`] while the queue is running
    /// - [`Error::InvalidState`] when nothing was skipped
    pub async fn retry_skipped(&self) -> Result<usize> {
        if self.is_in_progress().await {
            return Err(ValidationError::ProcessingActive {
                operation: "retry skipped assets".to_string(),
            }
            .into());
        }

        let retried = {
            let mut state = self.state.lock().await;
            let mut retried = 0;
            for qitem in state
                .queue
                .iter_mut()
                .filter(|q| q.selected && q.status == ItemStatus::Completed && q.skipped > 0)
            {
                for resource in qitem.resources.iter_mut().filter(|r| r.skipped) {
                    resource.status = WorkStatus::Queued;
                    resource.attempts = 0;
                    resource.skipped = false;
                    resource.download_id = None;
                    retried += 1;
                }
                qitem.status = ItemStatus::DownloadingAssets;
                qitem.skipped = 0;
            }

            if retried == 0 {
                return Err(Error::InvalidState {
                    operation: "retry skipped assets".to_string(),
                    reason: "nothing was skipped".to_string(),
                });
            }
            state.batch.data_combined_completed = true;
            self.persist(&state).await?;
            retried
        };

        tracing::info!(retried, "retrying skipped assets");
        self.toggle().await;
        Ok(retried)
    }

    /// Reveal a finished download (the "open folder" log action)
    pub async fn show_download_folder(&self, id: DownloadId) -> Result<()> {
        self.services.downloads.show(id).await
    }
}
