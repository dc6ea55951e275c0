//! Reactions to download change notifications.

use crate::download_manager::{DownloadDelta, DownloadState};
use crate::types::{DownloadId, HarvestState, LogAction, LogEntry, LogKind, WorkStatus};

use super::assets::{asset_path, finish_asset, resource_mut};
use super::export_stage::{ExportTarget, export_filename, finish_export};
use super::{Harvester, Step};

/// What a download id belongs to
#[derive(Clone, Debug, PartialEq, Eq)]
enum Owner {
    Export(ExportTarget),
    Asset { uid: String, index: usize },
}

/// Find the single export or resource a download id was recorded on
fn owner_of(state: &HarvestState, id: DownloadId) -> Option<Owner> {
    if state.batch.data_download_combined_id == Some(id) {
        return Some(Owner::Export(ExportTarget::Combined));
    }
    for qitem in &state.queue {
        if qitem.data_download_id == Some(id) {
            return Some(Owner::Export(ExportTarget::Item(qitem.item.uid.clone())));
        }
        if let Some(index) = qitem.resources.iter().position(|r| r.download_id == Some(id)) {
            return Some(Owner::Asset {
                uid: qitem.item.uid.clone(),
                index,
            });
        }
    }
    None
}

/// User-facing name of the download an owner refers to
fn display_name(state: &HarvestState, owner: &Owner) -> String {
    match owner {
        Owner::Export(target) => export_filename(state, target).unwrap_or_default(),
        Owner::Asset { uid, index } => state
            .position_of(uid)
            .and_then(|pos| {
                let resources = &state.queue[pos].resources;
                resources
                    .get(*index)
                    .map(|r| asset_path(uid, resources.len(), &r.filename))
            })
            .unwrap_or_default(),
    }
}

impl Harvester {
    /// React to one change reported by the download manager
    ///
    /// Completion routes to the matching export or asset and moves the
    /// pipeline on. An interruption schedules a retry after the delay of the
    /// download's kind. A paused download stops the whole queue. Changes for
    /// unknown downloads are ignored.
    pub async fn on_download_changed(&self, delta: DownloadDelta) -> Step {
        let enabled = self.is_in_progress().await;
        let mut state = self.state.lock().await;

        let Some(owner) = owner_of(&state, delta.id) else {
            tracing::trace!(download_id = %delta.id, "change for an unknown download");
            return Step::Wait;
        };
        let name = display_name(&state, &owner);
        let mut step = Step::Wait;

        if delta.state == Some(DownloadState::Complete) {
            let reference = match &owner {
                Owner::Export(target) => {
                    let reference = finish_export(&mut state, target, delta.id);
                    let text = match target {
                        ExportTarget::Item(_) => format!("Downloaded data to {name}"),
                        ExportTarget::Combined => format!("Downloaded combined data to {name}"),
                    };
                    self.log(
                        &mut state,
                        LogEntry::now(LogKind::Success, text).with_action(LogAction::OpenFolder {
                            download_id: delta.id,
                        }),
                        true,
                    );
                    if enabled {
                        step = Step::Continue;
                    }
                    reference
                }
                Owner::Asset { uid, index } => {
                    finish_asset(self, &mut state, uid, *index, delta.id);
                    if enabled {
                        step = Step::After(self.config.time_between_asset_download_attempts);
                    }
                    None
                }
            };
            self.save(&state).await;
            drop(state);
            self.release_blob(reference).await;
            return step;
        }

        if let Some(error) = &delta.error {
            self.log(
                &mut state,
                LogEntry::now(LogKind::Error, format!("Download error: {error}")),
                false,
            );
        }

        if delta.state == Some(DownloadState::Interrupted) {
            let delay = match &owner {
                Owner::Asset { uid, index } => {
                    if let Some(resource) = resource_mut(&mut state, uid, *index) {
                        resource.status = WorkStatus::Error;
                    }
                    self.config.time_between_asset_download_attempts
                }
                Owner::Export(_) => self.config.time_between_requests,
            };
            self.log(
                &mut state,
                LogEntry::now(LogKind::Error, format!("Download of {name} interrupted.")),
                false,
            );
            if enabled {
                step = Step::After(delay);
            }
        }

        self.save(&state).await;
        drop(state);

        if delta.paused == Some(true) && enabled {
            tracing::info!(download_id = %delta.id, "download paused externally, pausing queue");
            self.pause(true).await;
            return Step::Halt;
        }
        step
    }
}
