//! Duplicate-avoiding lookups against the download manager.
//!
//! Before starting a download the stages ask what the manager already knows
//! about the destination, so a restart or a repeated pass never downloads
//! the same file twice.

use crate::download_manager::{DownloadInfo, DownloadQuery, DownloadState};
use crate::types::DownloadId;

use super::Harvester;

/// What the download manager already knows about a destination
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Existing {
    /// Still receiving data; wait for its change notification
    InProgress(DownloadId),
    /// Finished and the file is still on disk
    Complete(DownloadId),
    /// Paused or interrupted and the manager can continue it
    Resumable(DownloadId),
    /// Nothing usable; start a fresh download
    None,
}

/// Classify the most recent matching download
pub(crate) fn classify(info: &DownloadInfo) -> Existing {
    match info.state {
        DownloadState::InProgress if !info.paused => Existing::InProgress(info.id),
        DownloadState::Complete if info.exists => Existing::Complete(info.id),
        DownloadState::InProgress | DownloadState::Interrupted if info.can_resume => {
            Existing::Resumable(info.id)
        }
        _ => Existing::None,
    }
}

impl Harvester {
    /// Look up an existing download by recorded id, else by destination path
    ///
    /// A lookup failure is treated as "nothing known".
    pub(crate) async fn find_existing_download(
        &self,
        id: Option<DownloadId>,
        filename: &str,
    ) -> Existing {
        let mut queries = Vec::with_capacity(2);
        if let Some(id) = id {
            queries.push(DownloadQuery::ById(id));
        }
        queries.push(DownloadQuery::ByFilename(filename.to_string()));

        for query in queries {
            match self.services.downloads.search(query).await {
                Ok(found) => {
                    if let Some(info) = found.first() {
                        return classify(info);
                    }
                }
                Err(e) => {
                    tracing::debug!(filename, error = %e, "download lookup failed");
                    return Existing::None;
                }
            }
        }
        Existing::None
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn info(state: DownloadState, paused: bool, can_resume: bool, exists: bool) -> DownloadInfo {
        DownloadInfo {
            id: DownloadId(7),
            filename: "a.jpg".to_string(),
            state,
            paused,
            can_resume,
            exists,
        }
    }

    #[test]
    fn test_running_download_is_awaited() {
        assert_eq!(
            classify(&info(DownloadState::InProgress, false, false, true)),
            Existing::InProgress(DownloadId(7))
        );
    }

    #[test]
    fn test_complete_download_needs_its_file() {
        assert_eq!(
            classify(&info(DownloadState::Complete, false, false, true)),
            Existing::Complete(DownloadId(7))
        );
        assert_eq!(
            classify(&info(DownloadState::Complete, false, false, false)),
            Existing::None,
            "a deleted file must be downloaded again"
        );
    }

    #[test]
    fn test_paused_or_interrupted_resumes_when_possible() {
        assert_eq!(
            classify(&info(DownloadState::InProgress, true, true, true)),
            Existing::Resumable(DownloadId(7))
        );
        assert_eq!(
            classify(&info(DownloadState::Interrupted, false, true, true)),
            Existing::Resumable(DownloadId(7))
        );
        assert_eq!(
            classify(&info(DownloadState::Interrupted, false, false, true)),
            Existing::None
        );
        assert_eq!(
            classify(&info(DownloadState::InProgress, true, false, true)),
            Existing::None
        );
    }
}
