//! Catalog seam: everything the engine needs to know about one data source.
//!
//! The driver never looks inside a catalog payload. It asks a
//! [`CatalogAdapter`] to build API URLs, validate the first response and
//! normalize every page, and it asks a [`PageFetcher`] to fetch JSON.

mod loc;

pub use loc::LocCatalog;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One normalized result row; key order is the export column order
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Outcome of validating the payload behind a page URL
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseValidation {
    /// Whether the page can be harvested
    pub valid: bool,
    /// Explanation suitable for the user
    pub message: String,
    /// Kind of page (e.g. "item", "query", "collection")
    pub kind: String,
    /// Number of results behind the page
    pub count: u64,
    /// Title of the page
    pub title: String,
    /// Facets / filters applied on the page
    pub facets: Vec<String>,
}

impl ResponseValidation {
    /// An invalid result carrying only a message
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
            ..Self::default()
        }
    }
}

/// One downloadable asset offered by a result
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetCandidate {
    /// Index of the owning result within its page
    pub result: usize,
    /// Alternative URLs ordered smallest to largest
    pub sizes: Vec<String>,
    /// Preferred filename, derived from the URL when absent
    pub filename: Option<String>,
}

/// One normalized catalog page
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageResponse {
    /// Normalized results on this page
    pub results: Vec<Record>,
    /// Asset candidates for the results on this page
    pub resources: Vec<AssetCandidate>,
    /// URL of the following page
    #[serde(rename = "nextPageURL")]
    pub next_page_url: Option<String>,
    /// Whether this is the final page
    pub is_last: bool,
    /// Overall result count across pages
    pub total: Option<u64>,
}

/// Catalog-specific knowledge, injected into the engine at construction
pub trait CatalogAdapter: Send + Sync {
    /// Short name used in tracing output
    fn name(&self) -> &str;

    /// API URL for a page URL, or `None` when the page is not supported
    ///
    /// `page_size` asks for that many results per page.
    fn build_api_url(&self, page_url: &str, page_size: Option<u32>) -> Option<String>;

    /// Inspect the payload behind a page URL before it is queued
    fn validate_response(&self, payload: &serde_json::Value) -> ResponseValidation;

    /// Normalize one API page; `None` for an unexpected payload
    fn parse_response_page(&self, payload: &serde_json::Value) -> Option<PageResponse>;
}

/// Fetches a JSON document
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    /// GET `url` and decode the body as JSON
    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value>;
}

/// [`PageFetcher`] backed by reqwest
#[derive(Clone, Debug)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    /// Build a fetcher with a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bulk-harvest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value> {
        tracing::debug!(url, "fetching catalog page");
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_fetcher_decodes_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"results": []})),
            )
            .mount(&server)
            .await;

        let fetcher = HttpPageFetcher::new(Duration::from_secs(5)).unwrap();
        let value = fetcher
            .fetch_json(&format!("{}/search/", server.uri()))
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!({"results": []}));
    }

    #[tokio::test]
    async fn test_http_fetcher_treats_server_error_as_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = HttpPageFetcher::new(Duration::from_secs(5)).unwrap();
        let result = fetcher.fetch_json(&server.uri()).await;
        assert!(
            matches!(result, Err(crate::Error::Network(_))),
            "503 should surface as a network error, got {result:?}"
        );
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_non_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let fetcher = HttpPageFetcher::new(Duration::from_secs(5)).unwrap();
        assert!(fetcher.fetch_json(&server.uri()).await.is_err());
    }

    #[test]
    fn test_page_response_uses_camel_case_keys() {
        let page = PageResponse {
            next_page_url: Some("https://x.gov/?sp=2".to_string()),
            is_last: false,
            total: Some(300),
            ..Default::default()
        };
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["nextPageURL"], "https://x.gov/?sp=2");
        assert_eq!(json["isLast"], false);
        assert_eq!(json["total"], 300);
    }
}
