//! Pipeline runner: resolve → crawl → verify → filter → store, per entity.
//!
//! Entities run through a bounded pool. Within one entity the stages are
//! strictly sequential. Cancellation stops scheduling new entities; an
//! entity already in flight finishes its chain so no bid is half-written.

use chrono::NaiveDate;
use futures::{future, stream, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::deep_scan::{DeepScanner, DESCRIPTION_KEY};
use super::filter::RelevanceFilter;
use super::listing::ListingCrawler;
use super::resolver::SiteResolver;
use super::urls::canonical_url;
use super::verifier::LinkVerifier;
use crate::error::Result;
use crate::fetchers::{RobotsCache, DEFAULT_USER_AGENT};
use crate::traits::{
    fetcher::PageFetcher,
    oracle::SemanticOracle,
    store::{BidStore, EntityStore, ScoutStore, SiteStore},
};
use crate::types::{
    bid::Bid,
    candidate::{Candidate, DecisionReason},
    config::PipelineConfig,
    entity::{Entity, EntityFilter},
    run::{EntityReport, RunSummary},
    site::{ResolvedSite, SiteShape},
};

#[derive(Debug, Clone, Copy)]
struct Stages {
    resolve: bool,
    scan: bool,
}

/// The discovery-and-filtering pipeline over a store, a fetcher and an oracle.
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = Pipeline::new(store, fetcher, oracle)
///     .with_config(PipelineConfig::default().with_concurrency(8));
///
/// let summary = pipeline
///     .run(&EntityFilter::new().with_state("Connecticut"))
///     .await?;
/// println!("stored {}", summary.stored_total());
/// ```
pub struct Pipeline<S: ?Sized, F, O> {
    store: Arc<S>,
    fetcher: Arc<F>,
    oracle: Arc<O>,
    config: PipelineConfig,
    robots: Arc<RobotsCache>,
    cancel: CancellationToken,
    today: Option<NaiveDate>,
}

impl<S, F, O> Pipeline<S, F, O>
where
    S: ScoutStore + ?Sized,
    F: PageFetcher,
    O: SemanticOracle,
{
    pub fn new(store: Arc<S>, fetcher: F, oracle: O) -> Self {
        Self {
            store,
            fetcher: Arc::new(fetcher),
            oracle: Arc::new(oracle),
            config: PipelineConfig::default(),
            robots: Arc::new(RobotsCache::new(DEFAULT_USER_AGENT)),
            cancel: CancellationToken::new(),
            today: None,
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Token that stops the run between entities when cancelled.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Share a robots.txt cache (its user agent should match the fetcher's).
    pub fn with_robots(mut self, robots: Arc<RobotsCache>) -> Self {
        self.robots = robots;
        self
    }

    /// Pin the date deadlines are judged against (defaults to the local date).
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolve the sites of every matching entity.
    pub async fn resolve_entities(&self, filter: &EntityFilter) -> Result<RunSummary> {
        self.drive(filter, Stages { resolve: true, scan: false }).await
    }

    /// Scan the stored verified sites of every matching entity.
    ///
    /// Nothing is re-resolved, so an interrupted run can resume here.
    pub async fn scan_entities(&self, filter: &EntityFilter) -> Result<RunSummary> {
        self.drive(filter, Stages { resolve: false, scan: true }).await
    }

    /// Resolve then scan every matching entity.
    pub async fn run(&self, filter: &EntityFilter) -> Result<RunSummary> {
        self.drive(filter, Stages { resolve: true, scan: true }).await
    }

    async fn drive(&self, filter: &EntityFilter, stages: Stages) -> Result<RunSummary> {
        let today = self
            .today
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        let entities = self.store.list_entities(filter).await?;
        let total = entities.len();

        info!(
            entities = total,
            concurrency = self.config.concurrency,
            resolve = stages.resolve,
            scan = stages.scan,
            "Starting run"
        );

        let mut summary = RunSummary::new();
        let mut reports = stream::iter(entities)
            .take_while(|_| future::ready(!self.cancel.is_cancelled()))
            .map(|entity| self.process_entity(entity, stages, today))
            .buffer_unordered(self.config.concurrency.max(1));

        while let Some(report) = reports.next().await {
            // Only storage failures surface here; they end the run.
            summary.absorb(report?);
        }

        summary.cancelled = self.cancel.is_cancelled() && summary.entities_processed < total;
        if summary.cancelled {
            warn!(
                processed = summary.entities_processed,
                remaining = total - summary.entities_processed,
                "Run cancelled"
            );
        }
        info!(
            processed = summary.entities_processed,
            discovered = summary.discovered,
            verified = summary.verified,
            classified = summary.classified,
            inserted = summary.stored.inserted,
            updated = summary.stored.updated,
            rejected = summary.rejected_total(),
            failed = summary.failed_entities.len(),
            "Run complete"
        );
        Ok(summary)
    }

    async fn process_entity(&self, entity: Entity, stages: Stages, today: NaiveDate) -> Result<EntityReport> {
        let mut report = EntityReport::default();

        if stages.resolve {
            let resolver = SiteResolver::new(self.store.as_ref(), self.fetcher.as_ref(), self.oracle.as_ref())
                .with_config(&self.config);
            match resolver.resolve(&entity).await {
                Ok(sites) => {
                    report.sites_resolved = sites.len();
                    report.sites_verified = sites.iter().filter(|s| s.verified).count();
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(entity = %entity.name, error = %e, "Entity failed to resolve");
                    return Ok(EntityReport::failed(entity.id, entity.name.as_str(), e));
                }
            }
        }

        if !stages.scan {
            return Ok(report);
        }

        let sites = self.store.list_verified_sites(entity.id).await?;
        if sites.is_empty() {
            debug!(entity = %entity.name, "No verified sites to scan");
            return Ok(report);
        }

        let candidates = self.discover(&entity, &sites).await?;
        report.discovered = candidates.len();

        let state = self.store.state_of(&entity).await?.map(|s| s.name).unwrap_or_default();
        let verifier = LinkVerifier::new(self.fetcher.clone()).with_retry_backoff(self.config.retry_backoff);
        let relevance = RelevanceFilter::new(self.oracle.clone())
            .with_timeout(self.config.oracle_timeout)
            .with_retries(self.config.oracle_retries, self.config.retry_backoff);

        for candidate in candidates {
            let verification = verifier.verify(&candidate).await;
            if !verification.is_ok() {
                info!(
                    entity = %entity.name,
                    title = %candidate.title,
                    link = %candidate.raw_link,
                    reason = %DecisionReason::Unreachable,
                    status = %verification.status_category,
                    "Rejected candidate"
                );
                report.record_reject(DecisionReason::Unreachable);
                continue;
            }
            report.verified += 1;

            let decision = relevance.classify(&candidate, &verification.excerpt, today).await;
            let deadline = match decision.deadline {
                Some(deadline) if decision.accept => deadline,
                _ => {
                    info!(
                        entity = %entity.name,
                        title = %candidate.title,
                        link = %candidate.raw_link,
                        reason = %decision.reason,
                        "Rejected candidate"
                    );
                    report.record_reject(decision.reason);
                    continue;
                }
            };
            report.classified += 1;

            // The listing link, not the redirect target: redirects often carry
            // per-session query strings that would change the slug every run.
            let source_url =
                canonical_url(&candidate.raw_link).unwrap_or_else(|| candidate.raw_link.clone());
            let bid = Bid::new(entity.name.as_str(), entity.kind, candidate.title.as_str(), source_url, deadline)
                .with_description(description_of(&candidate, verification.excerpt))
                .with_state(state.as_str());

            let outcome = self.store.upsert_bid(&bid).await?;
            debug!(slug = %bid.slug, title = %bid.title, deadline = %bid.deadline, outcome = ?outcome, "Stored bid");
            report.record_stored(outcome);
        }

        info!(
            entity = %entity.name,
            discovered = report.discovered,
            verified = report.verified,
            stored = report.inserted + report.updated,
            "Scanned entity"
        );
        Ok(report)
    }

    /// Crawl and deep-scan every site, then drop repeated candidates.
    async fn discover(&self, entity: &Entity, sites: &[ResolvedSite]) -> Result<Vec<Candidate>> {
        let crawler = ListingCrawler::new(self.fetcher.clone()).with_max_pages(self.config.max_listing_pages);
        let mut scanner = DeepScanner::new(self.fetcher.clone(), self.oracle.clone())
            .with_cancellation(self.cancel.clone());
        if self.config.oracle_page_extraction {
            scanner = scanner.with_oracle_extraction(
                self.config.oracle_timeout,
                self.config.oracle_retries,
                self.config.retry_backoff,
            );
        }
        if self.config.respect_robots {
            scanner = scanner.with_robots(self.robots.clone());
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        let mut scanned_roots: HashSet<String> = HashSet::new();

        for site in sites {
            match crawler.crawl_detailed(site).await {
                Ok(outcome) => {
                    if site.shape == SiteShape::Auto && outcome.shape != SiteShape::Auto {
                        debug!(url = %site.url, shape = %outcome.shape, "Learned listing shape");
                        self.store
                            .upsert_sites(&[site.clone().with_shape(outcome.shape)])
                            .await?;
                    }
                    candidates.extend(outcome.candidates);
                }
                Err(e) => {
                    warn!(entity = %entity.name, url = %site.url, error = %e, "Listing crawl failed");
                }
            }

            if !self.config.deep_scan {
                continue;
            }
            let Some(root) = site.root_url() else {
                continue;
            };
            if !scanned_roots.insert(root) {
                continue;
            }
            let outcome = scanner
                .deep_scan(site, self.config.max_depth, self.config.max_pages)
                .await;
            candidates.extend(outcome.candidates);
        }

        let found = candidates.len();
        let mut seen = HashSet::new();
        candidates.retain(|c| seen.insert(c.dedup_key()));
        if candidates.len() < found {
            debug!(entity = %entity.name, dropped = found - candidates.len(), "Dropped repeated candidates");
        }
        Ok(candidates)
    }
}

/// The oracle's summary when it read the candidate out of prose, else the
/// detail page's text.
fn description_of(candidate: &Candidate, excerpt: String) -> String {
    candidate
        .raw_metadata
        .get(DESCRIPTION_KEY)
        .filter(|d| !d.trim().is_empty())
        .cloned()
        .unwrap_or(excerpt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::testing::{MockFetcher, MockOracle};
    use crate::error::OracleError;
    use crate::traits::{
        fetcher::FetchedPage,
        oracle::{Category, SiteProposal},
    };
    use crate::types::{
        bid::BidFilter,
        entity::{EntityKind, EntityStatus},
    };
    use std::time::Duration;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn config() -> PipelineConfig {
        PipelineConfig::default()
            .with_deep_scan(false)
            .with_respect_robots(false)
            .with_oracle_timeout(Duration::from_millis(100))
            .with_retry_backoff(Duration::from_millis(1))
    }

    const LISTING: &str = r#"
        <table>
          <tr><th>Title</th><th>Closes</th></tr>
          <tr><td><a href="/bids/roof">Roof Replacement - City Hall</a></td><td>2025-05-20</td></tr>
          <tr><td><a href="/bids/janitorial">Janitorial Services Contract</a></td><td>2025-05-21</td></tr>
          <tr><td><a href="/bids/paving">Paving of Main Street</a></td><td>2025-04-02</td></tr>
          <tr><td><a href="/bids/gone">Boiler Replacement Project</a></td><td>2025-06-01</td></tr>
        </table>"#;

    async fn hartford() -> (Arc<MemoryStore>, Entity) {
        let store = Arc::new(MemoryStore::new());
        let ct = Entity::new(EntityKind::State, "Connecticut");
        let city = Entity::new(EntityKind::City, "Hartford").with_parent(ct.id);
        store.upsert_entities(&[ct, city.clone()]).await.unwrap();
        (store, city)
    }

    fn fetcher() -> MockFetcher {
        MockFetcher::new()
            .with_page("https://hartford.gov/bids", LISTING)
            .with_page("https://hartford.gov/bids/roof", "<p>Remove and replace roofing membrane.</p>")
            .with_page("https://hartford.gov/bids/janitorial", "<p>Nightly cleaning.</p>")
            .with_page("https://hartford.gov/bids/paving", "<p>Mill and overlay.</p>")
    }

    fn oracle() -> MockOracle {
        MockOracle::new()
            .with_entity_proposals(
                "Hartford",
                "Purchasing",
                vec![SiteProposal::new("https://hartford.gov/bids", "Purchasing")],
            )
            .with_classification("roof", Category::Construction)
            .with_classification("paving", Category::Construction)
    }

    #[tokio::test]
    async fn test_run_stores_only_accepted_bids() {
        let (store, city) = hartford().await;
        let pipeline = Pipeline::new(store.clone(), fetcher(), oracle())
            .with_config(config())
            .with_today(date(2025, 4, 1));

        let summary = pipeline
            .run(&EntityFilter::new().with_kind(EntityKind::City))
            .await
            .unwrap();

        assert_eq!(summary.entities_processed, 1);
        assert_eq!(summary.sites_verified, 1);
        assert_eq!(summary.discovered, 4);
        assert_eq!(summary.verified, 3);
        assert_eq!(summary.classified, 1);
        assert_eq!(summary.stored.inserted, 1);
        assert_eq!(summary.rejects[&DecisionReason::Unreachable], 1);
        assert_eq!(summary.rejects[&DecisionReason::NotRelevant], 1);
        assert_eq!(summary.rejects[&DecisionReason::DeadlineTooSoon], 1);

        let bids = store.list_bids(&BidFilter::new()).await.unwrap();
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].title, "Roof Replacement - City Hall");
        assert_eq!(bids[0].client_name, "Hartford");
        assert_eq!(bids[0].state, "Connecticut");
        assert_eq!(bids[0].source_url, "https://hartford.gov/bids/roof");
        assert!(bids[0].description.as_deref().unwrap().contains("roofing membrane"));

        let sites = store.list_sites(city.id).await.unwrap();
        assert_eq!(sites[0].shape, SiteShape::Table);
    }

    #[tokio::test]
    async fn test_second_run_updates_in_place() {
        let (store, _) = hartford().await;
        let pipeline = Pipeline::new(store.clone(), fetcher(), oracle())
            .with_config(config())
            .with_today(date(2025, 4, 1));

        pipeline.run(&EntityFilter::new()).await.unwrap();
        let again = pipeline.scan_entities(&EntityFilter::new()).await.unwrap();

        assert_eq!(again.stored.inserted, 0);
        assert_eq!(again.stored.updated, 1);
        assert_eq!(store.bid_count().await, 1);
    }

    #[tokio::test]
    async fn test_session_redirects_keep_one_bid() {
        let (store, _) = hartford().await;
        let redirecting = |sid: &str| {
            fetcher().with_response(
                "https://hartford.gov/bids/roof",
                FetchedPage::ok("https://hartford.gov/bids/roof", "<p>Roofing membrane.</p>")
                    .with_final_url(format!("https://hartford.gov/bids/roof?sid={}", sid)),
            )
        };

        Pipeline::new(store.clone(), redirecting("aaa"), oracle())
            .with_config(config())
            .with_today(date(2025, 4, 1))
            .run(&EntityFilter::new())
            .await
            .unwrap();
        let again = Pipeline::new(store.clone(), redirecting("bbb"), oracle())
            .with_config(config())
            .with_today(date(2025, 4, 1))
            .scan_entities(&EntityFilter::new())
            .await
            .unwrap();

        assert_eq!(again.stored.updated, 1);
        let bids = store.list_bids(&BidFilter::new()).await.unwrap();
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].source_url, "https://hartford.gov/bids/roof");
    }

    #[tokio::test]
    async fn test_oracle_failure_isolated_to_entity() {
        let (store, city) = hartford().await;
        let oracle = oracle().failing_propose(OracleError::Timeout);
        let pipeline = Pipeline::new(store.clone(), fetcher(), oracle).with_config(config());

        let summary = pipeline.resolve_entities(&EntityFilter::new()).await.unwrap();

        assert_eq!(summary.entities_processed, 2);
        assert_eq!(summary.failed_entities.len(), 2);
        let refreshed = store.get_entity(city.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, EntityStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_schedules_nothing() {
        let (store, _) = hartford().await;
        let oracle = oracle();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pipeline = Pipeline::new(store.clone(), fetcher(), oracle.clone())
            .with_config(config())
            .with_cancellation(cancel);

        let summary = pipeline.run(&EntityFilter::new()).await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.entities_processed, 0);
        assert_eq!(oracle.propose_count(), 0);
    }

    #[tokio::test]
    async fn test_scan_without_sites_does_nothing() {
        let (store, _) = hartford().await;
        let fetcher = fetcher();
        let pipeline = Pipeline::new(store, fetcher.clone(), oracle()).with_config(config());

        let summary = pipeline.scan_entities(&EntityFilter::new()).await.unwrap();

        assert_eq!(summary.entities_processed, 2);
        assert_eq!(summary.discovered, 0);
        assert!(fetcher.fetched_urls().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_candidates_counted_once() {
        let (store, city) = hartford().await;
        store
            .upsert_sites(&[
                ResolvedSite::new(city.id, "https://hartford.gov/bids", "Purchasing").with_verified(true),
                ResolvedSite::new(city.id, "https://hartford.gov/bids?page=1", "Public Works").with_verified(true),
            ])
            .await
            .unwrap();
        let fetcher = fetcher().with_page("https://hartford.gov/bids?page=1", LISTING);
        let pipeline = Pipeline::new(store, fetcher, oracle())
            .with_config(config())
            .with_today(date(2025, 4, 1));

        let summary = pipeline
            .scan_entities(&EntityFilter::new().with_kind(EntityKind::City))
            .await
            .unwrap();

        assert_eq!(summary.discovered, 4);
        assert_eq!(summary.stored.inserted, 1);
    }
}
