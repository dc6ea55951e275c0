//! Per-item and combined metadata exports.

use crate::catalog::Record;
use crate::download_manager::{ConflictAction, DownloadRequest, DownloadSource};
use crate::export;
use crate::types::{DataFormat, DownloadId, HarvestState, ItemStatus, LogEntry, LogKind};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::coordinator::Existing;
use super::{Harvester, Step};

/// Which export a download belongs to
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ExportTarget {
    /// Export of one queue item, by uid
    Item(String),
    /// Export covering every selected item
    Combined,
}

/// An export ready to hand to the download manager
struct ExportJob {
    target: ExportTarget,
    records: Vec<Record>,
    format: DataFormat,
    download_id: Option<DownloadId>,
    filename: String,
}

/// Local reference handed out for an in-memory export
fn blob_reference(filename: &str) -> String {
    format!("blob:bulk-harvest/{filename}")
}

/// Record a finished export in the state
///
/// Returns the blob reference that can now be released.
pub(crate) fn finish_export(
    state: &mut HarvestState,
    target: &ExportTarget,
    id: DownloadId,
) -> Option<String> {
    match target {
        ExportTarget::Item(uid) => {
            let pos = state.position_of(uid)?;
            let qitem = &mut state.queue[pos];
            qitem.data_download_id = Some(id);
            if matches!(
                qitem.status,
                ItemStatus::RetrievedData | ItemStatus::DownloadingData
            ) {
                qitem.status = ItemStatus::DownloadedData;
            }
            qitem.data_url.take()
        }
        ExportTarget::Combined => {
            state.batch.data_download_combined_id = Some(id);
            state.batch.data_combined_completed = true;
            state.batch.data_combined_url.take()
        }
    }
}

/// Destination filename of an export already assigned in the state
pub(crate) fn export_filename(state: &HarvestState, target: &ExportTarget) -> Option<String> {
    match target {
        ExportTarget::Item(uid) => state
            .position_of(uid)
            .and_then(|pos| state.queue[pos].data_filename.clone()),
        ExportTarget::Combined => state.batch.data_combined_filename.clone(),
    }
}

impl Harvester {
    /// Export the flattened results of one item
    ///
    /// Zero results complete the item and a single result marks it
    /// `downloaded_data` without a download; that result is only exported as
    /// part of the combined export.
    pub(crate) async fn export_item(&self, uid: &str, token: &CancellationToken) -> Step {
        let job = {
            let mut state = self.state.lock().await;
            let format = state.settings.data_format;
            let Some(pos) = state.position_of(uid) else {
                return Step::Continue;
            };
            let qitem = &mut state.queue[pos];
            let records = qitem.flattened_results();

            if records.len() <= 1 {
                qitem.status = if records.is_empty() {
                    ItemStatus::Completed
                } else {
                    ItemStatus::DownloadedData
                };
                let status = qitem.status;
                self.save(&state).await;
                tracing::debug!(uid = %uid, status = %status, "nothing to export on its own");
                return Step::Continue;
            }

            let filename = qitem
                .data_filename
                .get_or_insert_with(|| format!("{}.{}", uid, format.extension()))
                .clone();
            qitem.status = ItemStatus::DownloadingData;
            let download_id = qitem.data_download_id;
            self.save(&state).await;

            ExportJob {
                target: ExportTarget::Item(uid.to_string()),
                records,
                format,
                download_id,
                filename,
            }
        };

        self.run_export(job, token).await
    }

    /// Export the union of every selected item's results into one file
    pub(crate) async fn export_combined(&self, token: &CancellationToken) -> Step {
        let job = {
            let mut state = self.state.lock().await;
            let format = state.settings.data_format;
            let records: Vec<Record> = state
                .queue
                .iter()
                .filter(|q| q.selected)
                .flat_map(|q| q.flattened_results())
                .collect();

            if records.is_empty() {
                state.batch.data_combined_completed = true;
                self.save(&state).await;
                return Step::Continue;
            }

            let filename = state
                .batch
                .data_combined_filename
                .get_or_insert_with(|| {
                    format!(
                        "combined-{}.{}",
                        Utc::now().format("%Y%m%d%H%M%S"),
                        format.extension()
                    )
                })
                .clone();
            let download_id = state.batch.data_download_combined_id;
            self.save(&state).await;

            ExportJob {
                target: ExportTarget::Combined,
                records,
                format,
                download_id,
                filename,
            }
        };

        self.run_export(job, token).await
    }

    async fn run_export(&self, job: ExportJob, token: &CancellationToken) -> Step {
        let ExportJob {
            target,
            records,
            format,
            download_id,
            filename,
        } = job;

        let existing = self.find_existing_download(download_id, &filename).await;
        if token.is_cancelled() {
            return Step::Halt;
        }
        match existing {
            Existing::InProgress(id) => {
                let mut state = self.state.lock().await;
                set_export_download(&mut state, &target, id, None);
                self.save(&state).await;
                return Step::Wait;
            }
            Existing::Complete(id) => {
                let mut state = self.state.lock().await;
                let reference = finish_export(&mut state, &target, id);
                self.log(
                    &mut state,
                    LogEntry::now(
                        LogKind::Notice,
                        format!("Data download of {filename} already completed"),
                    ),
                    false,
                );
                self.save(&state).await;
                drop(state);
                self.release_blob(reference).await;
                return Step::Continue;
            }
            Existing::Resumable(id) => match self.services.downloads.resume(id).await {
                Ok(()) => {
                    let mut state = self.state.lock().await;
                    set_export_download(&mut state, &target, id, None);
                    self.log(
                        &mut state,
                        LogEntry::now(
                            LogKind::Notice,
                            format!("Resuming data download of {filename}"),
                        ),
                        false,
                    );
                    self.save(&state).await;
                    return if token.is_cancelled() {
                        Step::Halt
                    } else {
                        Step::Wait
                    };
                }
                Err(e) => {
                    tracing::debug!(download_id = %id, error = %e, "resume failed, starting over");
                }
            },
            Existing::None => {}
        }

        let body = match export::serialize(format, &records) {
            Ok(body) => body,
            Err(e) => {
                let mut state = self.state.lock().await;
                self.log(
                    &mut state,
                    LogEntry::now(LogKind::Error, format!("Download error: {e}")),
                    false,
                );
                self.save(&state).await;
                drop(state);
                self.pause(true).await;
                return Step::Halt;
            }
        };

        let reference = blob_reference(&filename);
        {
            let mut state = self.state.lock().await;
            self.log(
                &mut state,
                LogEntry::now(
                    LogKind::Notice,
                    format!("Downloading data to file {filename}"),
                ),
                false,
            );
        }

        let request = DownloadRequest {
            source: DownloadSource::Blob {
                reference: reference.clone(),
                bytes: body.into_bytes(),
                mime: format.mime_type().to_string(),
            },
            filename: filename.clone(),
            conflict: ConflictAction::Overwrite,
        };
        let started = self.services.downloads.download(request).await;

        let mut state = self.state.lock().await;
        match started {
            Ok(id) => {
                set_export_download(&mut state, &target, id, Some(reference));
                self.save(&state).await;
                tracing::info!(download_id = %id, filename = %filename, records = records.len(), "export started");
                if token.is_cancelled() {
                    Step::Halt
                } else {
                    Step::Wait
                }
            }
            Err(e) => {
                self.log(
                    &mut state,
                    LogEntry::now(LogKind::Error, format!("Download error: {e}")),
                    false,
                );
                self.save(&state).await;
                if token.is_cancelled() {
                    Step::Halt
                } else {
                    Step::After(self.config.time_between_requests)
                }
            }
        }
    }

    /// Hand a finished blob reference back to the download manager
    pub(crate) async fn release_blob(&self, reference: Option<String>) {
        let Some(reference) = reference else {
            return;
        };
        if let Err(e) = self.services.downloads.release_blob(&reference).await {
            tracing::warn!(reference = %reference, error = %e, "failed to release export blob");
        }
    }
}

fn set_export_download(
    state: &mut HarvestState,
    target: &ExportTarget,
    id: DownloadId,
    reference: Option<String>,
) {
    match target {
        ExportTarget::Item(uid) => {
            if let Some(pos) = state.position_of(uid) {
                let qitem = &mut state.queue[pos];
                qitem.data_download_id = Some(id);
                if reference.is_some() {
                    qitem.data_url = reference;
                }
            }
        }
        ExportTarget::Combined => {
            state.batch.data_download_combined_id = Some(id);
            if reference.is_some() {
                state.batch.data_combined_url = reference;
            }
        }
    }
}
