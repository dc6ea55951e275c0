//! Shared test helpers: scripted collaborators and a ready-made harvester.

use crate::catalog::{CatalogAdapter, PageFetcher, PageResponse, ResponseValidation};
use crate::config::Config;
use crate::download_manager::{
    DownloadDelta, DownloadInfo, DownloadManager, DownloadQuery, DownloadRequest, DownloadSource,
    DownloadState,
};
use crate::error::{Error, Result};
use crate::harvester::{Harvester, Services};
use crate::store::MemoryStore;
use crate::types::{DownloadId, SourceItem};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Catalog accepting `https://x.gov/...` URLs
///
/// Validation reads `title`, `count` and `facets` straight from the payload
/// (`"invalid": "<message>"` rejects it). Pages are deserialized directly
/// into [`PageResponse`]; a payload without `results` does not parse.
pub(crate) struct FakeCatalog;

impl CatalogAdapter for FakeCatalog {
    fn name(&self) -> &str {
        "fake"
    }

    fn build_api_url(&self, page_url: &str, page_size: Option<u32>) -> Option<String> {
        if !page_url.starts_with("https://x.gov/") {
            return None;
        }
        Some(match page_size {
            Some(size) => format!("{page_url}?fo=json&c={size}"),
            None => format!("{page_url}?fo=json"),
        })
    }

    fn validate_response(&self, payload: &Value) -> ResponseValidation {
        if let Some(message) = payload.get("invalid").and_then(Value::as_str) {
            return ResponseValidation::invalid(message);
        }
        ResponseValidation {
            valid: true,
            message: String::new(),
            kind: "collection".to_string(),
            count: payload.get("count").and_then(Value::as_u64).unwrap_or(0),
            title: payload
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("Untitled")
                .to_string(),
            facets: payload
                .get("facets")
                .and_then(Value::as_array)
                .map(|f| f.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }

    fn parse_response_page(&self, payload: &Value) -> Option<PageResponse> {
        payload.get("results")?;
        serde_json::from_value(payload.clone()).ok()
    }
}

/// Page fetcher answering from per-URL scripts
///
/// Each URL has a queue of answers consumed in order; the last answer is
/// repeated once the queue runs dry. Unknown URLs fail.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<std::result::Result<Value, String>>>>,
    calls: Mutex<Vec<String>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedFetcher {
    /// Answer `url` with `payload`
    pub fn ok(&self, url: &str, payload: Value) {
        self.push(url, Ok(payload));
    }

    /// Forget earlier answers for `url` and answer with `payload` from now on
    pub fn set(&self, url: &str, payload: Value) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), VecDeque::from([Ok(payload)]));
    }

    /// Fail requests to `url`
    pub fn fail(&self, url: &str) {
        self.push(url, Err("connection reset".to_string()));
    }

    fn push(&self, url: &str, answer: std::result::Result<Value, String>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(answer);
    }

    /// Hold every fetch until the returned notify is signalled
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// URLs fetched so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch_json(&self, url: &str) -> Result<Value> {
        self.calls.lock().unwrap().push(url.to_string());
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let answer = {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.get_mut(url).and_then(|answers| {
                if answers.len() > 1 {
                    answers.pop_front()
                } else {
                    answers.front().cloned()
                }
            })
        };
        match answer {
            Some(Ok(payload)) => Ok(payload),
            Some(Err(message)) => Err(Error::Other(message)),
            None => Err(Error::Other(format!("no script for {url}"))),
        }
    }
}

/// Download manager recording every call
///
/// Downloads are registered as in progress and stay that way until a test
/// reports a change built with [`FakeDownloads::transition`], unless
/// `auto_complete` is set.
#[derive(Default)]
pub(crate) struct FakeDownloads {
    next_id: Mutex<i64>,
    known: Mutex<Vec<DownloadInfo>>,
    pub started: Mutex<Vec<DownloadRequest>>,
    pub paused: Mutex<Vec<DownloadId>>,
    pub resumed: Mutex<Vec<DownloadId>>,
    pub released: Mutex<Vec<String>>,
    pub refuse: Mutex<bool>,
    pub auto_complete: Mutex<Option<Harvester>>,
}

impl FakeDownloads {
    /// Requests handed to `download`, in order
    pub fn started(&self) -> Vec<DownloadRequest> {
        self.started.lock().unwrap().clone()
    }

    /// Make every `download` call fail
    pub fn refuse_all(&self) {
        *self.refuse.lock().unwrap() = true;
    }

    /// Complete every download immediately by notifying `harvester`
    pub fn auto_complete(&self, harvester: &Harvester) {
        *self.auto_complete.lock().unwrap() = Some(harvester.clone());
    }

    /// Pretend a download for `filename` already exists
    pub fn preload(
        &self,
        filename: &str,
        state: DownloadState,
        paused: bool,
        can_resume: bool,
    ) -> DownloadId {
        let id = self.allocate();
        self.known.lock().unwrap().insert(
            0,
            DownloadInfo {
                id,
                filename: filename.to_string(),
                state,
                paused,
                can_resume,
                exists: true,
            },
        );
        id
    }

    /// Update a known download and build the matching delta
    pub fn transition(&self, id: DownloadId, state: DownloadState) -> DownloadDelta {
        if let Some(info) = self.known.lock().unwrap().iter_mut().find(|d| d.id == id) {
            info.state = state;
        }
        DownloadDelta::state(id, state)
    }

    fn allocate(&self) -> DownloadId {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        DownloadId(*next)
    }
}

#[async_trait::async_trait]
impl DownloadManager for FakeDownloads {
    async fn download(&self, request: DownloadRequest) -> Result<DownloadId> {
        self.started.lock().unwrap().push(request.clone());
        if *self.refuse.lock().unwrap() {
            return Err(Error::DownloadManager("refused".to_string()));
        }
        let id = self.allocate();
        self.known.lock().unwrap().insert(
            0,
            DownloadInfo {
                id,
                filename: request.filename.clone(),
                state: DownloadState::InProgress,
                paused: false,
                can_resume: matches!(request.source, DownloadSource::Url(_)),
                exists: false,
            },
        );

        let notify = self.auto_complete.lock().unwrap().clone();
        if let Some(harvester) = notify {
            let delta = self.transition(id, DownloadState::Complete);
            if let Some(info) = self.known.lock().unwrap().iter_mut().find(|d| d.id == id) {
                info.exists = true;
            }
            harvester.notify_download_changed(delta);
        }
        Ok(id)
    }

    async fn search(&self, query: DownloadQuery) -> Result<Vec<DownloadInfo>> {
        let known = self.known.lock().unwrap();
        Ok(known
            .iter()
            .filter(|d| match &query {
                DownloadQuery::ById(id) => d.id == *id,
                DownloadQuery::ByFilename(name) => &d.filename == name,
            })
            .cloned()
            .collect())
    }

    async fn pause(&self, id: DownloadId) -> Result<()> {
        self.paused.lock().unwrap().push(id);
        Ok(())
    }

    async fn resume(&self, id: DownloadId) -> Result<()> {
        self.resumed.lock().unwrap().push(id);
        if let Some(info) = self.known.lock().unwrap().iter_mut().find(|d| d.id == id) {
            info.state = DownloadState::InProgress;
            info.paused = false;
        }
        Ok(())
    }

    async fn show(&self, id: DownloadId) -> Result<()> {
        if self.known.lock().unwrap().iter().any(|d| d.id == id) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("download {id}")))
        }
    }

    async fn release_blob(&self, reference: &str) -> Result<()> {
        self.released.lock().unwrap().push(reference.to_string());
        Ok(())
    }
}

/// Handles to the collaborators behind a test harvester
pub(crate) struct TestRig {
    pub harvester: Harvester,
    pub fetcher: Arc<ScriptedFetcher>,
    pub downloads: Arc<FakeDownloads>,
    pub store: Arc<MemoryStore>,
}

/// Config with short delays for timer-driven tests
pub(crate) fn test_config() -> Config {
    Config {
        time_between_requests: Duration::from_millis(10),
        time_between_asset_download_attempts: Duration::from_millis(20),
        ..Config::default()
    }
}

/// Helper to create a harvester over fresh fakes and an empty memory store
pub(crate) async fn create_test_harvester() -> TestRig {
    create_test_harvester_with(test_config(), Arc::new(MemoryStore::new())).await
}

/// Helper to create a harvester with a given config and store
pub(crate) async fn create_test_harvester_with(config: Config, store: Arc<MemoryStore>) -> TestRig {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let downloads = Arc::new(FakeDownloads::default());
    let services = Services {
        store: store.clone(),
        catalog: Arc::new(FakeCatalog),
        fetcher: fetcher.clone(),
        downloads: downloads.clone(),
    };
    let harvester = Harvester::new(config, services).await.unwrap();
    TestRig {
        harvester,
        fetcher,
        downloads,
        store,
    }
}

/// A checked source item for `https://x.gov/<name>/`
pub(crate) fn source_item(name: &str) -> SourceItem {
    let url = format!("https://x.gov/{name}/");
    SourceItem {
        api_url: format!("{url}?fo=json&c=150"),
        title: name.to_string(),
        full_title: name.to_string(),
        kind: "collection".to_string(),
        uid: name.to_string(),
        url,
        ..Default::default()
    }
}

/// One page with `n` results, each offering one asset
pub(crate) fn page(n: usize, offset: usize, next: Option<&str>) -> Value {
    let results: Vec<Value> = (0..n)
        .map(|i| {
            json!({"id": format!("r{}", offset + i), "title": format!("Result {}", offset + i)})
        })
        .collect();
    let resources: Vec<Value> = (0..n)
        .map(|i| {
            json!({
                "result": i,
                "sizes": [format!("https://x.gov/img/{}.jpg", offset + i)],
                "filename": format!("{}.jpg", offset + i),
            })
        })
        .collect();
    json!({
        "results": results,
        "resources": resources,
        "nextPageURL": next,
        "isLast": next.is_none(),
        "total": n + offset,
    })
}

/// Queue `name` with a single page of `n` results scripted at its API URL
pub(crate) async fn queue_with_results(rig: &TestRig, name: &str, n: usize) -> SourceItem {
    let item = source_item(name);
    rig.fetcher.ok(&item.api_url, page(n, 0, None));
    rig.harvester.add_to_queue(item.clone()).await.unwrap();
    item
}

/// Advance until the step is no longer an immediate or delayed continuation
///
/// Delays are ignored; this drives stages directly without the scheduler.
pub(crate) async fn advance_until_idle(
    harvester: &Harvester,
    limit: usize,
) -> crate::harvester::Step {
    use crate::harvester::Step;
    for _ in 0..limit {
        match harvester.advance().await {
            Step::Continue | Step::After(_) => continue,
            other => return other,
        }
    }
    panic!("pipeline did not settle within {limit} steps");
}
