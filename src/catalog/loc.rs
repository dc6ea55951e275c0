//! Library of Congress (loc.gov) catalog adapter

use super::{AssetCandidate, CatalogAdapter, PageResponse, Record, ResponseValidation};
use serde_json::Value;
use url::Url;

const INVALID_PAGE: &str =
    "This is not a valid page. Please search or navigate to a page with at least one collection item.";

/// Adapter for the loc.gov JSON API (`fo=json`)
#[derive(Clone, Debug, Default)]
pub struct LocCatalog;

impl LocCatalog {
    /// Create the adapter
    pub fn new() -> Self {
        Self
    }
}

impl CatalogAdapter for LocCatalog {
    fn name(&self) -> &str {
        "loc.gov"
    }

    fn build_api_url(&self, page_url: &str, page_size: Option<u32>) -> Option<String> {
        let mut url = Url::parse(page_url).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let host = url.host_str()?.to_ascii_lowercase();
        if !host.ends_with(".loc.gov") {
            return None;
        }

        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != "fo" && key != "c")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        params.push(("fo".to_string(), "json".to_string()));
        if let Some(size) = page_size {
            params.push(("c".to_string(), size.to_string()));
        }

        url.set_fragment(None);
        url.query_pairs_mut().clear().extend_pairs(params);
        Some(url.into())
    }

    fn validate_response(&self, payload: &Value) -> ResponseValidation {
        if let Some(item) = payload.get("item") {
            return ResponseValidation {
                valid: true,
                message: "Found one item on this page.".to_string(),
                kind: "item".to_string(),
                count: 1,
                title: string_field(item, "title"),
                facets: Vec::new(),
            };
        }

        let (Some(pagination), Some(results)) = (payload.get("pagination"), list_results(payload))
        else {
            return ResponseValidation::invalid(INVALID_PAGE);
        };
        if !results.first().is_some_and(|r| r.get("item").is_some()) {
            return ResponseValidation::invalid(INVALID_PAGE);
        }

        let count = pagination.get("of").and_then(Value::as_u64).unwrap_or(0);
        let mut validation = ResponseValidation {
            valid: true,
            message: format!("Found {count} items in this search result."),
            kind: "query".to_string(),
            count,
            title: "Search result".to_string(),
            facets: Vec::new(),
        };

        if payload.get("site_type").and_then(Value::as_str) == Some("collections") {
            validation.message = format!("Found {count} items in this collection.");
            validation.kind = "collection".to_string();
            if let Some(title) = payload.get("title").and_then(Value::as_str) {
                validation.title = title.to_string();
            }
        }

        if let Some(search) = payload.get("search") {
            if let Some(limits) = search.get("facet_limits").and_then(Value::as_str) {
                validation.facets = limits
                    .split('|')
                    .filter(|facet| !facet.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            if let Some(query) = search.get("query").and_then(Value::as_str)
                && !query.is_empty()
            {
                validation.facets.insert(0, format!("query:\"{query}\""));
            }
        }

        validation
    }

    fn parse_response_page(&self, payload: &Value) -> Option<PageResponse> {
        if let Some(item) = payload.get("item") {
            let (record, candidate) = parse_item(item, 0);
            return Some(PageResponse {
                results: vec![record],
                resources: candidate.into_iter().collect(),
                next_page_url: None,
                is_last: true,
                total: Some(1),
            });
        }

        let pagination = payload.get("pagination")?;
        let results = list_results(payload)?;
        if !results.first().is_some_and(|r| r.get("item").is_some()) {
            return None;
        }

        let next_page_url = pagination
            .get("next")
            .and_then(Value::as_str)
            .filter(|next| !next.is_empty())
            .map(str::to_string);

        let mut page = PageResponse {
            is_last: next_page_url.is_none(),
            next_page_url,
            // `of` counts results, `total` counts pages
            total: pagination.get("of").and_then(Value::as_u64),
            ..Default::default()
        };
        for (index, result) in results.iter().enumerate() {
            let (record, candidate) = parse_item(result, index);
            page.results.push(record);
            page.resources.extend(candidate);
        }
        Some(page)
    }
}

fn list_results(payload: &Value) -> Option<&Vec<Value>> {
    payload.get("results").and_then(Value::as_array)
}

/// Normalize one loc.gov record and its image candidate
fn parse_item(item: &Value, index: usize) -> (Record, Option<AssetCandidate>) {
    let id = string_field(item, "number_lccn");
    let images: Vec<String> = array_field(item, "image_url")
        .into_iter()
        .map(|url| absolute_url(&url))
        .collect();

    let mut record = Record::new();
    record.insert("id".into(), Value::String(id.clone()));
    record.insert("title".into(), string_field(item, "title").into());
    record.insert("url".into(), string_field(item, "url").into());
    record.insert("type".into(), string_field(item, "type").into());
    record.insert("subjects".into(), array_field(item, "subject").into());
    record.insert("date".into(), string_field(item, "date").into());
    record.insert("description".into(), string_field(item, "description").into());
    record.insert("contributors".into(), array_field(item, "contributor").into());
    record.insert("locations".into(), array_field(item, "location").into());
    record.insert("partof".into(), array_field(item, "partof").into());
    record.insert(
        "access_restricted".into(),
        string_field(item, "access_restricted").into(),
    );
    // The largest image is listed last
    record.insert(
        "image_url".into(),
        images.last().cloned().unwrap_or_default().into(),
    );

    let candidate = (!images.is_empty()).then(|| AssetCandidate {
        result: index,
        filename: image_filename(&id, &images[0]),
        sizes: images,
    });
    (record, candidate)
}

/// A scalar field as a string; arrays yield their first entry
fn string_field(object: &Value, key: &str) -> String {
    let value = match object.get(key) {
        Some(Value::Array(values)) => values.first(),
        other => other,
    };
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// A list field as strings; objects contribute their `title`
fn array_field(object: &Value, key: &str) -> Vec<String> {
    let values = match object.get(key) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => return Vec::new(),
        Some(Value::Array(values)) => values.clone(),
        Some(other) => vec![other.clone()],
    };
    values
        .into_iter()
        .map(|entry| match entry {
            Value::String(s) => s,
            Value::Object(map) => match map.get("title") {
                Some(Value::String(title)) => title.clone(),
                Some(title) => title.to_string(),
                None => map.keys().next().cloned().unwrap_or_default(),
            },
            Value::Null => String::new(),
            other => other.to_string(),
        })
        .collect()
}

// loc.gov hands out protocol-relative image URLs
fn absolute_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_string()
    }
}

/// `<lccn>-<last path segment>`; without an lccn the engine names the file
fn image_filename(id: &str, url: &str) -> Option<String> {
    if id.is_empty() {
        return None;
    }
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.rev().find(|s| !s.is_empty())?;
    let segment = urlencoding::decode(segment).ok()?;
    Some(format!("{id}-{segment}"))
}
