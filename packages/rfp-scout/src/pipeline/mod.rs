//! The discovery-and-filtering pipeline.
//!
//! Stages, in order:
//! - Entity Registry (`registry`)
//! - Site Resolver (`resolver`)
//! - Listing Crawler (`listing`) and Deep Scanner (`deep_scan`)
//! - Link Verifier (`verifier`)
//! - Relevance & Deadline Filter (`filter`, `deadline`)
//!
//! `runner` chains them per entity and writes accepted bids to the store.

pub mod deadline;
pub mod deep_scan;
pub mod extract;
pub mod filter;
pub mod listing;
pub mod registry;
pub mod resolver;
pub mod runner;
pub mod urls;
pub mod verifier;

pub use deadline::{is_actionable, parse_deadline};
pub use deep_scan::{DeepScanOutcome, DeepScanner};
pub use extract::{extract_candidates, Extracted};
pub use filter::RelevanceFilter;
pub use listing::{CrawlOutcome, ListingCrawler};
pub use registry::{seed_states, EntityRegistry, EntitySeed};
pub use resolver::{search_scope, SiteResolver};
pub use runner::Pipeline;
pub use verifier::LinkVerifier;

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::{OracleError, OracleResult};

/// Call the oracle with a per-attempt timeout, retrying any failure up to
/// `retries` extra times.
pub(crate) async fn call_oracle<T, F, Fut>(
    timeout: Duration,
    retries: u32,
    backoff: Duration,
    mut call: F,
) -> OracleResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = OracleResult<T>>,
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout),
        };
        match result {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retries => {
                attempt += 1;
                debug!(error = %e, attempt, "Oracle call failed, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_call_oracle_retries_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let result = call_oracle(Duration::from_secs(1), 2, Duration::from_millis(1), || async {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(OracleError::Unavailable("503".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_call_oracle_times_out() {
        let result: OracleResult<()> = call_oracle(
            Duration::from_millis(10),
            0,
            Duration::from_millis(1),
            || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;
        assert_eq!(result, Err(OracleError::Timeout));
    }
}
