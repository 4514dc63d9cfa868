//! Link Verifier: load a candidate's detail link and classify the result.

use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::extract::visible_text;
use crate::error::FetchError;
use crate::traits::fetcher::{FetchedPage, PageFetcher};
use crate::types::candidate::{Candidate, StatusCategory, VerificationResult};

/// Visible text kept from a verified page.
pub const MAX_EXCERPT_CHARS: usize = 20_000;

/// Verifies candidate links through a [`PageFetcher`].
pub struct LinkVerifier<F> {
    fetcher: F,
    retry_backoff: Duration,
}

impl<F: PageFetcher> LinkVerifier<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            retry_backoff: Duration::from_secs(2),
        }
    }

    /// Wait before the single retry of a network failure.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Load `raw_link` and classify the outcome.
    ///
    /// Only network failures are retried, once. Nothing here is fatal to
    /// the batch.
    pub async fn verify(&self, candidate: &Candidate) -> VerificationResult {
        let link = candidate.raw_link.trim();
        let Some(requested) = parse_http_url(link) else {
            debug!(title = %candidate.title, link = %link, "Candidate has no usable link");
            return VerificationResult::rejected(StatusCategory::ClientError, None);
        };

        let page = match self.fetch_with_retry(link).await {
            Ok(page) => page,
            Err(e) if e.is_network_failure() => {
                warn!(url = %link, error = %e, "Link unreachable after retry");
                return VerificationResult::rejected(StatusCategory::NetworkFailure, None);
            }
            Err(e) => {
                debug!(url = %link, error = %e, "Link rejected");
                return VerificationResult::rejected(StatusCategory::ClientError, None);
            }
        };

        let category = StatusCategory::from_status(page.status);
        if category != StatusCategory::Ok {
            debug!(url = %link, status = page.status, category = %category, "Link failed verification");
            return VerificationResult::rejected(category, Some(page.status));
        }

        if is_soft_404(&requested, &page.final_url) {
            debug!(url = %link, final_url = %page.final_url, "Link redirected to site root");
            return VerificationResult::rejected(StatusCategory::ClientError, Some(page.status));
        }

        VerificationResult::ok(
            page.status,
            page.final_url,
            visible_text(&page.body, MAX_EXCERPT_CHARS),
        )
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<FetchedPage, FetchError> {
        match self.fetcher.fetch(url).await {
            Err(e) if e.is_network_failure() => {
                debug!(url = %url, error = %e, backoff_ms = self.retry_backoff.as_millis() as u64, "Retrying after network failure");
                tokio::time::sleep(self.retry_backoff).await;
                self.fetcher.fetch(url).await
            }
            other => other,
        }
    }
}

fn parse_http_url(link: &str) -> Option<Url> {
    let url = Url::parse(link).ok()?;
    (matches!(url.scheme(), "http" | "https") && url.host_str().is_some()).then_some(url)
}

/// A deep link that landed on the bare site root.
fn is_soft_404(requested: &Url, final_url: &str) -> bool {
    let Ok(landed) = Url::parse(final_url) else {
        return false;
    };
    let requested_deep = !requested.path().trim_matches('/').is_empty();
    let landed_root = landed.path().trim_matches('/').is_empty() && landed.query().is_none();
    requested_deep && landed_root
}
