//! Sequential asset downloads for one queue item.

use crate::download_manager::{ConflictAction, DownloadRequest, DownloadSource};
use crate::types::{
    DownloadId, HarvestState, ItemStatus, LogAction, LogEntry, LogKind, QueueItem, Resource,
    ResourceDownload, Settings, WorkStatus,
};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

use super::coordinator::Existing;
use super::{Harvester, Step};

/// Build the resource list of an item from its fetched pages
///
/// One resource per candidate (only the first candidate of each result with
/// [`ResourceDownload::First`]). The URL is picked by the preferred asset
/// size; filenames are sanitized and made unique within the item. A single
/// asset named after its URL is prefixed with the item uid.
pub(crate) fn materialize_resources(qitem: &QueueItem, settings: &Settings) -> Vec<Resource> {
    let mut seen_results = HashSet::new();
    let mut taken = HashSet::new();
    let mut resources = Vec::new();
    let mut url_named = Vec::new();

    for candidate in qitem.flattened_candidates() {
        if settings.resource_download == ResourceDownload::First
            && !seen_results.insert(candidate.result)
        {
            continue;
        }

        let url = settings.asset_size.pick(&candidate.sizes).map(str::to_string);
        let (raw_name, from_url) = match candidate.filename.clone() {
            Some(name) => (name, false),
            None => match url.as_deref().and_then(last_path_segment) {
                Some(segment) => (segment, true),
                None => (format!("asset-{}", resources.len() + 1), false),
            },
        };
        let filename = unique_name(&sanitize_filename(&raw_name), &mut taken);

        url_named.push(from_url);
        resources.push(Resource {
            url,
            filename,
            ..Default::default()
        });
    }

    // A lone asset is stored flat next to other items' files, so a bare URL
    // segment (IIIF `default.jpg`) must carry the uid
    if let [resource] = resources.as_mut_slice()
        && url_named[0]
    {
        resource.filename = format!("{}-{}", qitem.item.uid, resource.filename);
    }
    resources
}

/// Last non-empty path segment of a URL, percent-decoded
fn last_path_segment(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.rev().find(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(segment).ok()?;
    Some(decoded.into_owned())
}

/// Replace anything outside `[A-Za-z0-9._-]` and strip leading dots
pub(crate) fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "asset".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `name`, or `stem-N.ext` for the first free N starting at 2
fn unique_name(name: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.to_string()) {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
        _ => (name, ""),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{stem}-{n}{ext}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Destination of a resource: flat for single-asset items, else in a folder named after the uid
pub(crate) fn asset_path(uid: &str, resource_count: usize, filename: &str) -> String {
    if resource_count == 1 {
        filename.to_string()
    } else {
        format!("{uid}/{filename}")
    }
}

/// Mark an asset downloaded and write its success entry
pub(crate) fn finish_asset(
    harvester: &Harvester,
    state: &mut HarvestState,
    uid: &str,
    index: usize,
    id: DownloadId,
) {
    let Some(pos) = state.position_of(uid) else {
        return;
    };
    let qitem = &mut state.queue[pos];
    let count = qitem.resources.len();
    let Some(resource) = qitem.resources.get_mut(index) else {
        return;
    };
    resource.status = WorkStatus::Completed;
    resource.download_id = Some(id);
    let path = asset_path(uid, count, &resource.filename);

    harvester.log(
        state,
        LogEntry::now(
            LogKind::Success,
            format!("Downloaded asset {path} ({} of {count})", index + 1),
        )
        .with_action(LogAction::OpenFolder { download_id: id }),
        true,
    );
}

/// Snapshot of the resource an asset pass works on
struct AssetJob {
    index: usize,
    count: usize,
    url: String,
    path: String,
    download_id: Option<DownloadId>,
    attempts: u32,
}

impl Harvester {
    /// Work on the first unfinished asset of `uid`
    ///
    /// Resources are handled strictly one at a time. A resource that used up
    /// its attempts is skipped and its siblings continue.
    pub(crate) async fn download_assets(&self, uid: &str, token: &CancellationToken) -> Step {
        let delay = self.config.time_between_asset_download_attempts;

        let job = {
            let mut state = self.state.lock().await;
            let settings = state.settings.clone();
            let Some(pos) = state.position_of(uid) else {
                return Step::Continue;
            };
            let qitem = &mut state.queue[pos];

            if qitem.status != ItemStatus::DownloadingAssets {
                qitem.resources = materialize_resources(qitem, &settings);
                qitem.status = ItemStatus::DownloadingAssets;
                tracing::info!(uid = %uid, resources = qitem.resources.len(), "asset downloads prepared");
            }

            let Some(index) = qitem
                .resources
                .iter()
                .position(|r| r.status != WorkStatus::Completed)
            else {
                qitem.skipped = qitem.count_skipped();
                qitem.status = ItemStatus::Completed;
                let skipped = qitem.skipped;
                self.save(&state).await;
                tracing::info!(uid = %uid, skipped, "item completed");
                return Step::Continue;
            };

            let count = qitem.resources.len();
            let resource = &mut qitem.resources[index];
            let path = asset_path(uid, count, &resource.filename);

            let Some(url) = resource.url.clone() else {
                resource.status = WorkStatus::Completed;
                resource.skipped = true;
                self.log(
                    &mut state,
                    LogEntry::now(
                        LogKind::Error,
                        format!("No download URL for asset {path}. Skipping."),
                    ),
                    false,
                );
                self.save(&state).await;
                return Step::Continue;
            };

            let job = AssetJob {
                index,
                count,
                url,
                path,
                download_id: resource.download_id,
                attempts: resource.attempts,
            };
            self.save(&state).await;
            job
        };

        let existing = self.find_existing_download(job.download_id, &job.path).await;
        if token.is_cancelled() {
            return Step::Halt;
        }

        match existing {
            Existing::InProgress(id) => {
                self.update_resource(uid, job.index, |r| {
                    r.status = WorkStatus::InProgress;
                    r.download_id = Some(id);
                })
                .await;
                return Step::Wait;
            }
            Existing::Complete(id) => {
                let mut state = self.state.lock().await;
                finish_asset(self, &mut state, uid, job.index, id);
                self.save(&state).await;
                return Step::After(delay);
            }
            Existing::Resumable(id) if job.attempts < self.config.max_download_attempts => {
                match self.services.downloads.resume(id).await {
                    Ok(()) => {
                        let mut state = self.state.lock().await;
                        if let Some(resource) = resource_mut(&mut state, uid, job.index) {
                            resource.status = WorkStatus::InProgress;
                            resource.download_id = Some(id);
                            resource.attempts += 1;
                        }
                        self.log(
                            &mut state,
                            LogEntry::now(
                                LogKind::Notice,
                                format!("Resuming asset download of {}", job.path),
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
                }
            }
            Existing::Resumable(_) | Existing::None => {}
        }

        self.start_asset_download(uid, job, token).await
    }

    async fn start_asset_download(
        &self,
        uid: &str,
        job: AssetJob,
        token: &CancellationToken,
    ) -> Step {
        let max_attempts = self.config.max_download_attempts;
        let delay = self.config.time_between_asset_download_attempts;

        {
            let mut state = self.state.lock().await;
            let Some(resource) = resource_mut(&mut state, uid, job.index) else {
                return Step::Continue;
            };

            if resource.attempts >= max_attempts {
                resource.status = WorkStatus::Completed;
                resource.skipped = true;
                self.log(
                    &mut state,
                    LogEntry::now(
                        LogKind::Error,
                        format!("Max attempts to download {} reached. Skipping.", job.url),
                    ),
                    false,
                );
                self.save(&state).await;
                tracing::warn!(uid = %uid, url = %job.url, "asset skipped after exhausting its attempts");
                return Step::After(delay);
            }

            resource.attempts += 1;
            resource.status = WorkStatus::InProgress;
            let attempt = resource.attempts;

            let mut text = format!(
                "Downloading asset {} ({} of {})",
                job.path,
                job.index + 1,
                job.count
            );
            if attempt > 1 {
                text.push_str(&format!(" - attempt #{attempt}"));
            }
            self.log(&mut state, LogEntry::now(LogKind::Notice, text), job.index > 0);
            self.save(&state).await;
        }

        let request = DownloadRequest {
            source: DownloadSource::Url(job.url.clone()),
            filename: job.path.clone(),
            conflict: ConflictAction::Overwrite,
        };
        let started = self.services.downloads.download(request).await;

        let mut state = self.state.lock().await;
        match started {
            Ok(id) => {
                if let Some(resource) = resource_mut(&mut state, uid, job.index) {
                    resource.download_id = Some(id);
                }
                self.save(&state).await;
                tracing::debug!(uid = %uid, download_id = %id, path = %job.path, "asset download started");
                if token.is_cancelled() {
                    Step::Halt
                } else {
                    Step::Wait
                }
            }
            Err(e) => {
                if let Some(resource) = resource_mut(&mut state, uid, job.index) {
                    resource.status = WorkStatus::Error;
                }
                tracing::warn!(url = %job.url, error = %e, "asset download failed to start");
                self.log(
                    &mut state,
                    LogEntry::now(
                        LogKind::Error,
                        format!("Download of {} was interrupted. Retrying.", job.url),
                    ),
                    false,
                );
                self.save(&state).await;
                if token.is_cancelled() {
                    Step::Halt
                } else {
                    Step::After(delay)
                }
            }
        }
    }

    async fn update_resource(&self, uid: &str, index: usize, apply: impl FnOnce(&mut Resource)) {
        let mut state = self.state.lock().await;
        if let Some(resource) = resource_mut(&mut state, uid, index) {
            apply(resource);
            self.save(&state).await;
        }
    }
}

pub(crate) fn resource_mut<'a>(
    state: &'a mut HarvestState,
    uid: &str,
    index: usize,
) -> Option<&'a mut Resource> {
    let pos = state.position_of(uid)?;
    state.queue[pos].resources.get_mut(index)
}
