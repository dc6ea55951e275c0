use super::*;

/// Fetch every page of the first item
async fn retrieve(harvester: &Harvester) {
    assert!(matches!(harvester.advance().await, Step::After(_)));
    assert_eq!(harvester.advance().await, Step::Continue);
}

#[tokio::test]
async fn test_no_results_completes_without_export() {
    let rig = create_test_harvester().await;
    queue_with_results(&rig, "empty", 0).await;
    enable(&rig.harvester).await;

    retrieve(&rig.harvester).await;
    assert_eq!(rig.harvester.advance().await, Step::Continue);

    let state = rig.harvester.snapshot().await;
    assert_eq!(state.queue[0].status, ItemStatus::Completed);
    assert!(rig.downloads.started().is_empty());
}

#[tokio::test]
async fn test_single_result_waits_for_combined_export() {
    let rig = create_test_harvester().await;
    queue_with_results(&rig, "one", 1).await;
    enable(&rig.harvester).await;

    retrieve(&rig.harvester).await;
    assert_eq!(rig.harvester.advance().await, Step::Continue);

    let state = rig.harvester.snapshot().await;
    assert_eq!(state.queue[0].status, ItemStatus::DownloadedData);
    assert!(rig.downloads.started().is_empty());
}

#[tokio::test]
async fn test_item_export_round_trip() {
    let rig = create_test_harvester().await;
    queue_with_results(&rig, "maps", 5).await;
    enable(&rig.harvester).await;
    retrieve(&rig.harvester).await;

    assert_eq!(rig.harvester.advance().await, Step::Wait);

    let started = rig.downloads.started();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].filename, "maps.csv");
    let DownloadSource::Blob {
        reference,
        bytes,
        mime,
    } = &started[0].source
    else {
        panic!("exports are handed over as blobs");
    };
    assert_eq!(reference, "blob:bulk-harvest/maps.csv");
    assert_eq!(mime, "text/csv;charset=utf-8");
    let csv = String::from_utf8(bytes.clone()).unwrap();
    assert_eq!(csv.split("\r\n").count(), 6, "header plus five rows");
    assert!(csv.starts_with("\"id\",\"title\""));

    let state = rig.harvester.snapshot().await;
    let id = state.queue[0].data_download_id.unwrap();
    assert_eq!(state.queue[0].status, ItemStatus::DownloadingData);
    assert_eq!(state.queue[0].data_url.as_deref(), Some("blob:bulk-harvest/maps.csv"));

    let delta = rig.downloads.transition(id, DownloadState::Complete);
    assert_eq!(rig.harvester.on_download_changed(delta).await, Step::Continue);

    let state = rig.harvester.snapshot().await;
    assert_eq!(state.queue[0].status, ItemStatus::DownloadedData);
    assert_eq!(state.queue[0].data_url, None);
    assert_eq!(
        *rig.downloads.released.lock().unwrap(),
        vec!["blob:bulk-harvest/maps.csv".to_string()]
    );
    assert_eq!(state.log[0].kind, LogKind::Success);
    assert_eq!(state.log[0].text, "Downloaded data to maps.csv");
    assert_eq!(
        state.log[0].action,
        Some(LogAction::OpenFolder { download_id: id })
    );

    // Data-only: the item completes and a lone item needs no combined export
    assert_eq!(rig.harvester.advance().await, Step::Continue);
    assert_eq!(rig.harvester.advance().await, Step::Halt);
    let state = rig.harvester.snapshot().await;
    assert_eq!(state.queue[0].status, ItemStatus::Completed);
    assert!(!state.queue[0].selected);
    assert_eq!(state.log[0].kind, LogKind::Done);
    assert_eq!(state.log[0].text, "Queue finished!");
    assert_eq!(rig.downloads.started().len(), 1);
}

#[tokio::test]
async fn test_json_format_exports_an_array() {
    let rig = create_test_harvester().await;
    rig.harvester
        .update_settings(Settings {
            data_format: DataFormat::Json,
            ..Default::default()
        })
        .await
        .unwrap();
    queue_with_results(&rig, "maps", 2).await;
    enable(&rig.harvester).await;
    retrieve(&rig.harvester).await;

    rig.harvester.advance().await;

    let started = rig.downloads.started();
    assert_eq!(started[0].filename, "maps.json");
    let DownloadSource::Blob { bytes, .. } = &started[0].source else {
        panic!("exports are handed over as blobs");
    };
    let parsed: serde_json::Value = serde_json::from_slice(bytes).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 2);
    assert_eq!(parsed[1]["id"], "r1");
}

#[tokio::test]
async fn test_existing_complete_export_is_not_repeated() {
    let rig = create_test_harvester().await;
    queue_with_results(&rig, "maps", 5).await;
    let id = rig
        .downloads
        .preload("maps.csv", DownloadState::Complete, false, false);
    enable(&rig.harvester).await;
    retrieve(&rig.harvester).await;

    assert_eq!(rig.harvester.advance().await, Step::Continue);

    let state = rig.harvester.snapshot().await;
    assert_eq!(state.queue[0].status, ItemStatus::DownloadedData);
    assert_eq!(state.queue[0].data_download_id, Some(id));
    assert_eq!(state.log[0].text, "Data download of maps.csv already completed");
    assert!(rig.downloads.started().is_empty());
}

#[tokio::test]
async fn test_export_start_failure_retries_later() {
    let rig = create_test_harvester().await;
    queue_with_results(&rig, "maps", 5).await;
    rig.downloads.refuse_all();
    enable(&rig.harvester).await;
    retrieve(&rig.harvester).await;

    let step = rig.harvester.advance().await;
    assert_eq!(step, Step::After(rig.harvester.get_config().time_between_requests));

    let state = rig.harvester.snapshot().await;
    assert_eq!(state.queue[0].status, ItemStatus::DownloadingData);
    assert!(state.log[0].text.starts_with("Download error:"));
}

#[tokio::test]
async fn test_combined_export_runs_once_for_several_items() {
    let rig = create_test_harvester().await;
    queue_with_results(&rig, "north", 5).await;
    queue_with_results(&rig, "south", 5).await;
    enable(&rig.harvester).await;

    // Drive both items through their own exports
    for _ in 0..2 {
        assert_eq!(advance_until_idle(&rig.harvester, 10).await, Step::Wait);
        let id = rig.downloads.started().len() as i64;
        let delta = rig.downloads.transition(DownloadId(id), DownloadState::Complete);
        rig.harvester.on_download_changed(delta).await;
    }

    // No active item left: the combined export starts
    assert_eq!(advance_until_idle(&rig.harvester, 10).await, Step::Wait);
    let started = rig.downloads.started();
    assert_eq!(started.len(), 3);
    let combined = &started[2];
    assert!(combined.filename.starts_with("combined-"));
    assert!(combined.filename.ends_with(".csv"));
    let DownloadSource::Blob { bytes, .. } = &combined.source else {
        panic!("exports are handed over as blobs");
    };
    assert_eq!(String::from_utf8_lossy(bytes).split("\r\n").count(), 11);

    let state = rig.harvester.snapshot().await;
    let combined_id = state.batch.data_download_combined_id.unwrap();
    let delta = rig.downloads.transition(combined_id, DownloadState::Complete);
    assert_eq!(rig.harvester.on_download_changed(delta).await, Step::Continue);
    assert!(rig.harvester.snapshot().await.batch.data_combined_completed);

    // The next advance finishes the queue instead of exporting again
    assert_eq!(rig.harvester.advance().await, Step::Halt);
    let state = rig.harvester.snapshot().await;
    assert_eq!(rig.downloads.started().len(), 3);
    assert_eq!(state.log[0].text, "Queue finished!");
    assert_eq!(state.batch, crate::types::Batch::default(), "batch resets after a pass");
    assert_eq!(state.selected_count(), 0);
}
