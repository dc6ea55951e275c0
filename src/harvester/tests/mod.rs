use super::test_helpers::*;
use super::*;
use crate::download_manager::{DownloadDelta, DownloadSource, DownloadState};
use crate::error::{Error, ValidationError};
use crate::types::{
    DataFormat, DownloadId, DownloadOption, HarvestState, ItemStatus, LogAction, LogKind,
    Settings, WorkStatus,
};
use serde_json::json;

mod export;
mod retrieval;

/// Switch processing on without a running driver loop
async fn enable(harvester: &Harvester) {
    if !harvester.is_in_progress().await {
        harvester.toggle().await;
    }
}

async fn set_option(harvester: &Harvester, option: DownloadOption) {
    harvester
        .update_settings(Settings {
            download_option: option,
            ..Default::default()
        })
        .await
        .unwrap();
}

/// Pages are indexed by position and at most one is in flight
fn assert_request_invariants(state: &HarvestState) {
    for qitem in &state.queue {
        for (i, request) in qitem.api_requests.iter().enumerate() {
            assert_eq!(request.index, i, "request index of {}", qitem.item.uid);
        }
        let in_flight = qitem
            .api_requests
            .iter()
            .filter(|r| r.status == WorkStatus::InProgress)
            .count();
        assert!(in_flight <= 1, "{} has {in_flight} pages in flight", qitem.item.uid);
    }
}

fn log_count(state: &HarvestState, needle: &str) -> usize {
    state.log.iter().filter(|e| e.text.contains(needle)).count()
}
