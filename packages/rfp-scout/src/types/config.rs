//! Pipeline configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum lead time, in calendar days, between today and a bid's deadline.
///
/// Not configurable per run.
pub const ACTIONABILITY_WINDOW_DAYS: i64 = 4;

/// Tunables for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Entities processed concurrently.
    ///
    /// Bounds politeness toward target sites and load on the oracle.
    /// Default: 4.
    pub concurrency: usize,

    /// Per-request page fetch timeout. Default: 20s.
    #[serde(with = "duration_secs")]
    pub fetch_timeout: Duration,

    /// Per-call oracle timeout. Default: 30s.
    #[serde(with = "duration_secs")]
    pub oracle_timeout: Duration,

    /// Extra oracle attempts after the first failure. Default: 1.
    pub oracle_retries: u32,

    /// Wait before retrying a network failure. Default: 2s.
    #[serde(with = "duration_secs")]
    pub retry_backoff: Duration,

    /// Hard ceiling on listing pages followed through pagination. Default: 10.
    pub max_listing_pages: usize,

    /// Run the Deep Scanner after the Listing Crawler. Default: true.
    pub deep_scan: bool,

    /// Deep scan hop limit from the site root. Default: 2.
    pub max_depth: usize,

    /// Deep scan page budget. Default: 25.
    pub max_pages: usize,

    /// Honour robots.txt during deep scans. Default: true.
    pub respect_robots: bool,

    /// Let the oracle read opportunities out of procurement pages that
    /// have no table, cards or link list. Default: true.
    pub oracle_page_extraction: bool,

    /// Per-host request rate. Default: 1.
    pub requests_per_second: u32,

    /// Check .gov/.edu/.us proposals before others. Default: true.
    pub prefer_government_domains: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            fetch_timeout: Duration::from_secs(20),
            oracle_timeout: Duration::from_secs(30),
            oracle_retries: 1,
            retry_backoff: Duration::from_secs(2),
            max_listing_pages: 10,
            deep_scan: true,
            max_depth: 2,
            max_pages: 25,
            respect_robots: true,
            oracle_page_extraction: true,
            requests_per_second: 1,
            prefer_government_domains: true,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = timeout;
        self
    }

    pub fn with_oracle_retries(mut self, retries: u32) -> Self {
        self.oracle_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_max_listing_pages(mut self, pages: usize) -> Self {
        self.max_listing_pages = pages.max(1);
        self
    }

    pub fn with_deep_scan(mut self, enabled: bool) -> Self {
        self.deep_scan = enabled;
        self
    }

    /// Set deep scan depth and page limits.
    pub fn with_deep_scan_limits(mut self, max_depth: usize, max_pages: usize) -> Self {
        self.max_depth = max_depth;
        self.max_pages = max_pages;
        self
    }

    pub fn with_respect_robots(mut self, respect: bool) -> Self {
        self.respect_robots = respect;
        self
    }

    pub fn with_oracle_page_extraction(mut self, enabled: bool) -> Self {
        self.oracle_page_extraction = enabled;
        self
    }

    pub fn with_requests_per_second(mut self, rps: u32) -> Self {
        self.requests_per_second = rps.max(1);
        self
    }

    pub fn with_prefer_government_domains(mut self, prefer: bool) -> Self {
        self.prefer_government_domains = prefer;
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.fetch_timeout, Duration::from_secs(20));
        assert_eq!(config.oracle_retries, 1);
        assert_eq!(config.max_pages, 25);
        assert!(config.respect_robots);
    }

    #[test]
    fn test_builder_clamps_zero_concurrency() {
        let config = PipelineConfig::new().with_concurrency(0).with_deep_scan(false);
        assert_eq!(config.concurrency, 1);
        assert!(!config.deep_scan);
    }

    #[test]
    fn test_serde_round_trip_uses_seconds() {
        let json = serde_json::to_value(PipelineConfig::default()).unwrap();
        assert_eq!(json["fetch_timeout"], 20.0);
        let back: PipelineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.oracle_timeout, Duration::from_secs(30));
    }
}
