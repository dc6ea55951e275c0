//! Paginated catalog retrieval for one queue item.

use crate::catalog::PageResponse;
use crate::types::{ApiRequest, ItemStatus, LogEntry, LogKind, WorkStatus};
use tokio_util::sync::CancellationToken;

use super::{Harvester, Step};

/// Why a page attempt failed
enum PageFailure {
    Transport,
    Parse,
}

impl Harvester {
    /// Fetch the next page of `uid`, one page per call
    ///
    /// Pages are strictly sequential. The item becomes `retrieved_data` only
    /// once the newest completed page reports itself as the last one. A page
    /// that keeps failing past `max_download_attempts` stops the whole queue.
    pub(crate) async fn retrieve_data(&self, uid: &str, token: &CancellationToken) -> Step {
        let max_attempts = self.config.max_download_attempts;
        let delay = self.config.time_between_requests;

        let (page_index, url, attempt) = {
            let mut state = self.state.lock().await;
            let Some(pos) = state.position_of(uid) else {
                return Step::Continue;
            };
            let qitem = &mut state.queue[pos];

            if qitem.api_requests.is_empty() {
                let first = ApiRequest::queued(0, qitem.item.api_url.clone(), None);
                qitem.api_requests.push(first);
            }

            let page_index = match qitem
                .api_requests
                .iter()
                .position(|r| r.status != WorkStatus::Completed)
            {
                Some(i) => i,
                None => {
                    let last = qitem.api_requests.len() - 1;
                    let newest = qitem.api_requests[last]
                        .response
                        .as_ref()
                        .map(|page| (page.is_last, page.next_page_url.clone(), page.total));
                    match newest {
                        Some((true, _, _)) => {
                            qitem.status = ItemStatus::RetrievedData;
                            let pages = qitem.api_requests.len();
                            self.save(&state).await;
                            tracing::info!(uid = %uid, pages, "retrieved all catalog pages");
                            return Step::Continue;
                        }
                        Some((false, Some(next_url), total)) => {
                            qitem
                                .api_requests
                                .push(ApiRequest::queued(last + 1, next_url, total));
                            last + 1
                        }
                        // A completed page without a usable response is fetched again
                        _ => {
                            let request = &mut qitem.api_requests[last];
                            request.status = WorkStatus::Error;
                            request.response = None;
                            last
                        }
                    }
                }
            };

            qitem.status = ItemStatus::RetrievingData;
            let full_title = qitem.item.full_title.clone();
            let request = &mut qitem.api_requests[page_index];
            request.attempts += 1;

            if request.attempts > max_attempts {
                request.status = WorkStatus::Error;
                request.attempts = 0;
                let url = request.url.clone();
                qitem.status = ItemStatus::DataRetrievalError;
                self.log(
                    &mut state,
                    LogEntry::now(
                        LogKind::Error,
                        format!(
                            "Reached max attempts for API request {url}. Stopping queue. \
                             The website might be down or we reached a data request limit. \
                             Please try again later."
                        ),
                    ),
                    false,
                );
                self.save(&state).await;
                drop(state);
                tracing::warn!(uid = %uid, url = %url, "page exceeded its attempts, pausing queue");
                self.pause(true).await;
                return Step::Halt;
            }

            request.status = WorkStatus::InProgress;
            let url = request.url.clone();
            let attempt = request.attempts;
            let progress = match request.total {
                Some(total) => {
                    let pages = total.div_ceil(u64::from(self.config.api_items_per_page)).max(1);
                    format!("request {} of {}", page_index + 1, pages)
                }
                None => "first request".to_string(),
            };
            self.log(
                &mut state,
                LogEntry::now(
                    LogKind::Notice,
                    format!("Retrieving API data from \"{full_title}\" ({progress})"),
                ),
                page_index > 0,
            );
            self.save(&state).await;
            (page_index, url, attempt)
        };

        let outcome = match self.services.fetcher.fetch_json(&url).await {
            Ok(payload) => self
                .services
                .catalog
                .parse_response_page(&payload)
                // A page that is not the last must say where to continue
                .filter(|page| page.is_last || page.next_page_url.is_some())
                .ok_or(PageFailure::Parse),
            Err(e) => {
                tracing::warn!(url = %url, attempt, error = %e, "catalog page fetch failed");
                Err(PageFailure::Transport)
            }
        };
        if token.is_cancelled() {
            return Step::Halt;
        }

        let mut state = self.state.lock().await;
        let Some(pos) = state.position_of(uid) else {
            return Step::Continue;
        };
        let Some(request) = state.queue[pos].api_requests.get_mut(page_index) else {
            return Step::Continue;
        };

        match outcome {
            Ok(page) => {
                record_page(request, page);
                tracing::debug!(uid = %uid, page = page_index, "catalog page retrieved");
                self.save(&state).await;
            }
            Err(failure) => {
                request.status = WorkStatus::Error;
                let verb = match failure {
                    PageFailure::Transport => "retrieve",
                    PageFailure::Parse => "parse",
                };
                self.log(
                    &mut state,
                    LogEntry::now(
                        LogKind::Error,
                        format!(
                            "Could not {verb} data from {url} (attempt #{attempt} of {max_attempts})"
                        ),
                    ),
                    false,
                );
                self.save(&state).await;
            }
        }

        Step::After(delay)
    }
}

fn record_page(request: &mut ApiRequest, page: PageResponse) {
    request.status = WorkStatus::Completed;
    request.total = page.total.or(request.total);
    request.response = Some(page);
}
