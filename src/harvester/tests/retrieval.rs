use super::*;

#[tokio::test]
async fn test_three_failures_stop_the_queue() {
    let rig = create_test_harvester().await;
    let item = source_item("maps");
    rig.fetcher.fail(&item.api_url);
    rig.harvester.add_to_queue(item.clone()).await.unwrap();
    enable(&rig.harvester).await;

    for attempt in 1..=3 {
        let step = rig.harvester.advance().await;
        assert!(matches!(step, Step::After(_)), "attempt {attempt} should retry later");
    }
    let step = rig.harvester.advance().await;
    assert_eq!(step, Step::Halt);

    let state = rig.harvester.snapshot().await;
    let qitem = &state.queue[0];
    assert_eq!(qitem.status, ItemStatus::DataRetrievalError);
    assert_eq!(qitem.api_requests[0].attempts, 0, "attempts reset for a manual retry");
    assert_eq!(qitem.api_requests[0].status, WorkStatus::Error);
    assert_eq!(log_count(&state, "Reached max attempts"), 1);
    assert_eq!(log_count(&state, "Could not retrieve data"), 3);
    assert!(!rig.harvester.is_in_progress().await);
    assert_eq!(rig.fetcher.calls().len(), 3);
}

#[tokio::test]
async fn test_failed_item_retries_when_restarted() {
    let rig = create_test_harvester().await;
    let item = source_item("maps");
    rig.fetcher.fail(&item.api_url);
    rig.harvester.add_to_queue(item.clone()).await.unwrap();
    enable(&rig.harvester).await;
    assert_eq!(advance_until_idle(&rig.harvester, 10).await, Step::Halt);

    // The catalog recovers and the user starts the queue again
    rig.fetcher.set(&item.api_url, page(2, 0, None));
    enable(&rig.harvester).await;
    rig.harvester.advance().await;

    let state = rig.harvester.snapshot().await;
    assert_eq!(state.queue[0].api_requests[0].status, WorkStatus::Completed);
    assert_eq!(state.queue[0].api_requests[0].attempts, 1);
}

#[tokio::test]
async fn test_pages_are_fetched_in_order_until_last() {
    let rig = create_test_harvester().await;
    let item = source_item("maps");
    let second = "https://x.gov/maps/?fo=json&c=150&sp=2";
    let mut first_page = page(150, 0, Some(second));
    first_page["total"] = json!(300);
    let mut second_page = page(150, 150, None);
    second_page["total"] = json!(300);
    rig.fetcher.ok(&item.api_url, first_page);
    rig.fetcher.ok(second, second_page);
    rig.harvester.add_to_queue(item).await.unwrap();
    enable(&rig.harvester).await;

    assert!(matches!(rig.harvester.advance().await, Step::After(_)));
    let state = rig.harvester.snapshot().await;
    assert_eq!(state.queue[0].status, ItemStatus::RetrievingData);
    assert_eq!(state.log[0].text, "Retrieving API data from \"maps\" (first request)");

    // The next page is only appended once the first one is recorded
    assert!(matches!(rig.harvester.advance().await, Step::After(_)));
    let state = rig.harvester.snapshot().await;
    assert_request_invariants(&state);
    assert_eq!(state.queue[0].api_requests.len(), 2);
    assert_eq!(state.queue[0].api_requests[1].url, second);
    assert_eq!(state.queue[0].status, ItemStatus::RetrievingData);
    assert_eq!(
        state.log[0].text,
        "Retrieving API data from \"maps\" (request 2 of 2)"
    );
    assert_eq!(log_count(&state, "Retrieving API data"), 1, "progress notices collapse");

    assert_eq!(rig.harvester.advance().await, Step::Continue);
    let state = rig.harvester.snapshot().await;
    assert_eq!(state.queue[0].status, ItemStatus::RetrievedData);
    assert_eq!(state.queue[0].flattened_results().len(), 300);
    assert_eq!(rig.fetcher.calls(), vec![state.queue[0].item.api_url.clone(), second.to_string()]);
}

#[tokio::test]
async fn test_unparseable_page_counts_as_attempt() {
    let rig = create_test_harvester().await;
    let item = source_item("maps");
    rig.fetcher.ok(&item.api_url, json!({"garbage": true}));
    rig.harvester.add_to_queue(item.clone()).await.unwrap();
    enable(&rig.harvester).await;

    rig.harvester.advance().await;

    let state = rig.harvester.snapshot().await;
    assert_eq!(state.queue[0].api_requests[0].status, WorkStatus::Error);
    assert_eq!(
        state.log[0].text,
        format!("Could not parse data from {} (attempt #1 of 3)", item.api_url)
    );
    assert_eq!(state.log[0].kind, LogKind::Error);
}

#[tokio::test]
async fn test_page_without_next_url_is_not_final() {
    let rig = create_test_harvester().await;
    let item = source_item("maps");
    // Claims more pages but does not say where
    rig.fetcher.ok(
        &item.api_url,
        json!({"results": [{"id": "1"}], "isLast": false, "nextPageURL": null}),
    );
    rig.harvester.add_to_queue(item).await.unwrap();
    enable(&rig.harvester).await;

    rig.harvester.advance().await;
    rig.harvester.advance().await;

    let state = rig.harvester.snapshot().await;
    assert_ne!(state.queue[0].status, ItemStatus::RetrievedData);
    assert_eq!(state.queue[0].api_requests.len(), 1);
    assert_eq!(log_count(&state, "Could not parse data"), 2);
}

#[tokio::test]
async fn test_advance_while_disabled_changes_nothing() {
    let rig = create_test_harvester().await;
    queue_with_results(&rig, "maps", 3).await;
    let before = rig.harvester.snapshot().await;

    assert_eq!(rig.harvester.advance().await, Step::Halt);

    assert_eq!(rig.harvester.snapshot().await, before);
    assert!(rig.fetcher.calls().is_empty());
}

#[tokio::test]
async fn test_pause_during_fetch_discards_the_response() {
    let rig = create_test_harvester().await;
    let item = queue_with_results(&rig, "maps", 3).await;
    let gate = rig.fetcher.hold();
    enable(&rig.harvester).await;

    let harvester = rig.harvester.clone();
    let step = tokio::spawn(async move { harvester.advance().await });
    while rig.fetcher.calls().is_empty() {
        tokio::task::yield_now().await;
    }

    rig.harvester.toggle().await;
    gate.notify_one();

    assert_eq!(step.await.unwrap(), Step::Halt);
    let state = rig.harvester.snapshot().await;
    let request = &state.queue[0].api_requests[0];
    assert!(request.response.is_none(), "stale response must not be recorded");
    assert_ne!(request.status, WorkStatus::Completed);
    assert_eq!(rig.fetcher.calls(), vec![item.api_url]);
}
