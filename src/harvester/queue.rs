//! Queue management: URL checks and queue edits.

use crate::error::{Result, ValidationError};
use crate::types::{HarvestState, ItemStatus, QueueItem, Settings, SourceItem};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

use super::Harvester;

/// Longest slug kept before the timestamp suffix
const MAX_SLUG_LEN: usize = 80;

#[allow(clippy::expect_used)]
static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-z0-9]+").expect("static pattern is valid"));

/// Filesystem-safe identifier for a queued source
///
/// The title and facets are lowercased, every run of non-alphanumeric
/// characters becomes a single `-`, the slug is cut at 80 characters and a
/// `-YYYYMMDDHHMMSS` timestamp is appended.
///
/// # Examples
///
/// ```
/// # use bulk_harvest::harvester::make_uid;
/// use chrono::TimeZone;
/// let at = chrono::Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
/// let uid = make_uid("Civil War Maps", &["partof:maps".to_string()], at);
/// assert_eq!(uid, "civil-war-maps-partof-maps-20240309140500");
/// ```
pub fn make_uid(title: &str, facets: &[String], timestamp: DateTime<Utc>) -> String {
    let mut source = title.to_lowercase();
    for facet in facets {
        source.push(' ');
        source.push_str(&facet.to_lowercase());
    }

    let collapsed = NON_ALPHANUMERIC.replace_all(&source, "-");
    // Only ASCII survives the replacement, so byte slicing is safe
    let mut slug = collapsed.trim_matches('-');
    if slug.len() > MAX_SLUG_LEN {
        slug = slug[..MAX_SLUG_LEN].trim_end_matches('-');
    }
    let slug = if slug.is_empty() { "item" } else { slug };

    format!("{}-{}", slug, timestamp.format("%Y%m%d%H%M%S"))
}

/// Drop the oldest completed items beyond `max_completed`
///
/// Non-completed items are always kept and relative order is preserved.
/// Returns the number of removed items.
pub(crate) fn prune(state: &mut HarvestState, max_completed: usize) -> usize {
    let completed = state
        .queue
        .iter()
        .filter(|q| q.status == ItemStatus::Completed)
        .count();
    let mut excess = completed.saturating_sub(max_completed);
    if excess == 0 {
        return 0;
    }

    let removed = excess;
    state.queue.retain(|q| {
        if excess > 0 && q.status == ItemStatus::Completed {
            excess -= 1;
            false
        } else {
            true
        }
    });
    removed
}

impl Harvester {
    /// Validate a catalog page URL and describe what would be queued
    ///
    /// The catalog adapter builds the API URL, the payload behind it is
    /// fetched once and validated. Nothing is added to the queue.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::AlreadyQueued`] when the URL is already in the queue
    /// - [`ValidationError::UnsupportedUrl`] when the adapter rejects the URL
    /// - [`ValidationError::InvalidPage`] when the payload is not harvestable
    /// - [`ValidationError::TooManyResults`] when `max_result_count` is exceeded
    /// - a network error when the payload cannot be fetched
    pub async fn check_url(&self, page_url: &str) -> Result<SourceItem> {
        if self.contains_url(page_url).await {
            return Err(ValidationError::AlreadyQueued {
                url: page_url.to_string(),
            }
            .into());
        }

        let catalog = &self.services.catalog;
        let unsupported = || ValidationError::UnsupportedUrl {
            url: page_url.to_string(),
        };
        let first_page_url = catalog
            .build_api_url(page_url, None)
            .ok_or_else(unsupported)?;

        let payload = self.services.fetcher.fetch_json(&first_page_url).await?;
        let validation = catalog.validate_response(&payload);
        if !validation.valid {
            tracing::debug!(url = page_url, message = %validation.message, "page rejected by catalog");
            return Err(ValidationError::InvalidPage {
                message: validation.message,
            }
            .into());
        }
        if let Some(limit) = self.config.max_result_count
            && validation.count > limit
        {
            return Err(ValidationError::TooManyResults {
                count: validation.count,
                limit,
            }
            .into());
        }

        let api_url = catalog
            .build_api_url(page_url, Some(self.config.api_items_per_page))
            .ok_or_else(unsupported)?;

        Ok(SourceItem {
            url: page_url.to_string(),
            api_url,
            full_title: SourceItem::compose_full_title(&validation.title, &validation.facets),
            uid: make_uid(&validation.title, &validation.facets, Utc::now()),
            title: validation.title,
            facets: validation.facets,
            kind: validation.kind,
            count: validation.count,
        })
    }

    /// Check `page_url` and add it to the queue
    ///
    /// Returns the queue index of the new item.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use bulk_harvest::*;
    /// # async fn example(harvester: Harvester) -> Result<()> {
    /// let index = harvester
    ///     .add_url("https://www.loc.gov/collections/civil-war-maps/")
    ///     .await?;
    /// println!("queued at position {index}");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn add_url(&self, page_url: &str) -> Result<usize> {
        let item = self.check_url(page_url).await?;
        self.add_to_queue(item).await
    }

    /// Append a checked source item to the queue
    ///
    /// The item starts `queued` and selected. A uid collision with an existing
    /// item gets a numeric suffix. When the state cannot be persisted the
    /// speculative entry is removed again and the error is returned.
    pub async fn add_to_queue(&self, mut item: SourceItem) -> Result<usize> {
        let mut state = self.state.lock().await;

        if state.queue.iter().any(|q| q.item.url == item.url) {
            return Err(ValidationError::AlreadyQueued { url: item.url }.into());
        }

        if state.position_of(&item.uid).is_some() {
            let base = item.uid.clone();
            let mut n = 2;
            while state.position_of(&format!("{base}-{n}")).is_some() {
                n += 1;
            }
            item.uid = format!("{base}-{n}");
        }
        item.refresh_full_title();

        let uid = item.uid.clone();
        state.queue.push(QueueItem::new(item));
        let index = state.queue.len() - 1;

        if let Err(e) = self.persist(&state).await {
            state.queue.pop();
            tracing::error!(error = %e, uid = %uid, "failed to persist new queue item");
            return Err(e);
        }

        tracing::info!(uid = %uid, index, "added item to queue");
        Ok(index)
    }

    /// Remove the item at `index`
    pub async fn remove_queue_item(&self, index: usize) -> Result<()> {
        self.ensure_idle("remove queue item").await?;
        let mut state = self.state.lock().await;
        if index >= state.queue.len() {
            return Err(ValidationError::NoSuchItem { index }.into());
        }
        let removed = state.queue.remove(index);
        self.persist(&state).await?;
        tracing::info!(uid = %removed.item.uid, "removed item from queue");
        Ok(())
    }

    /// Move the item at `index` by `delta` positions
    ///
    /// The target position is clamped to the queue bounds; moving onto the
    /// same position does nothing. Returns the new index.
    pub async fn move_queue_item(&self, index: usize, delta: isize) -> Result<usize> {
        self.ensure_idle("move queue item").await?;
        let mut state = self.state.lock().await;
        let len = state.queue.len();
        if index >= len {
            return Err(ValidationError::NoSuchItem { index }.into());
        }

        let target = index.saturating_add_signed(delta).min(len - 1);
        if target == index {
            return Ok(index);
        }
        let qitem = state.queue.remove(index);
        state.queue.insert(target, qitem);
        self.persist(&state).await?;
        Ok(target)
    }

    /// Select or deselect the item at `index`
    ///
    /// Selecting a completed item puts it back at the start of the pipeline.
    pub async fn select_queue_item(&self, index: usize, selected: bool) -> Result<()> {
        self.ensure_idle("select queue item").await?;
        let mut state = self.state.lock().await;
        let qitem = state
            .queue
            .get_mut(index)
            .ok_or(ValidationError::NoSuchItem { index })?;
        apply_selection(qitem, selected);
        self.persist(&state).await
    }

    /// Select or deselect every item
    pub async fn select_all(&self, selected: bool) -> Result<()> {
        self.ensure_idle("select queue items").await?;
        let mut state = self.state.lock().await;
        for qitem in &mut state.queue {
            apply_selection(qitem, selected);
        }
        self.persist(&state).await
    }

    /// Replace the user settings
    pub async fn update_settings(&self, settings: Settings) -> Result<()> {
        let mut state = self.state.lock().await;
        state.settings = settings;
        self.persist(&state).await
    }

    /// Empty the activity log
    pub async fn clear_log(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.log.clear();
        self.persist(&state).await
    }

    /// Drop the oldest completed items beyond `max_archived_queue_items`
    ///
    /// Returns the number of removed items.
    pub async fn prune_queue(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let removed = prune(&mut state, self.config.max_archived_queue_items);
        if removed > 0 {
            self.persist(&state).await?;
            tracing::info!(removed, "pruned archived queue items");
        }
        Ok(removed)
    }

    async fn contains_url(&self, page_url: &str) -> bool {
        self.state
            .lock()
            .await
            .queue
            .iter()
            .any(|q| q.item.url == page_url)
    }

    async fn ensure_idle(&self, operation: &str) -> Result<()> {
        if self.is_in_progress().await {
            return Err(ValidationError::ProcessingActive {
                operation: operation.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn apply_selection(qitem: &mut QueueItem, selected: bool) {
    if selected && qitem.status == ItemStatus::Completed {
        qitem.requeue();
    }
    qitem.selected = selected;
}
