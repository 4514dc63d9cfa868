//! Per-host rate-limited fetcher wrapper.
//!
//! Wraps any PageFetcher with a keyed governor limiter so each target host
//! sees at most the configured request rate, while different hosts proceed
//! independently.

use async_trait::async_trait;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::error::FetchResult;
use crate::traits::fetcher::{FetchedPage, PageFetcher};

/// A fetcher wrapper that enforces per-host politeness.
pub struct RateLimitedFetcher<F: PageFetcher> {
    inner: F,
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
}

impl<F: PageFetcher> RateLimitedFetcher<F> {
    /// Create a limiter allowing `requests_per_second` per host.
    ///
    /// Zero is treated as one.
    pub fn new(fetcher: F, requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(nonzero!(1u32));
        Self::with_quota(fetcher, Quota::per_second(rps))
    }

    /// Create with a custom quota.
    pub fn with_quota(fetcher: F, quota: Quota) -> Self {
        Self {
            inner: fetcher,
            limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    /// Limiter key for a URL. Unparsable URLs share one bucket.
    fn host_key(url: &str) -> String {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_lowercase()))
            .unwrap_or_default()
    }
}

#[async_trait]
impl<F: PageFetcher> PageFetcher for RateLimitedFetcher<F> {
    async fn fetch(&self, url: &str) -> FetchResult<FetchedPage> {
        let key = Self::host_key(url);
        self.limiter.until_key_ready(&key).await;
        self.inner.fetch(url).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
