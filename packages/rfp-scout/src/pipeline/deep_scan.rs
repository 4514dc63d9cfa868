//! Deep Scanner: bounded breadth-first traversal of a site beyond its
//! listing page.
//!
//! Level by level from the site root. Within a level, links that look like
//! procurement pages go first. The visited set is keyed by
//! [`normalize_url`] and lives only for one scan.
//!
//! Procurement pages are read structurally first. When that finds nothing
//! and oracle extraction is on, the page's visible text goes to the oracle,
//! which reads the opportunities out of prose.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::call_oracle;
use super::deadline::contains_date;
use super::extract::{extract_candidates, page_links, page_title, visible_text};
use super::urls::{has_procurement_keyword, is_document_link, normalize_url, same_site};
use crate::fetchers::robots::RobotsCache;
use crate::traits::fetcher::PageFetcher;
use crate::traits::oracle::SemanticOracle;
use crate::types::{
    candidate::Candidate,
    site::{ResolvedSite, SiteShape},
};

/// Characters of page text handed to the oracle.
const MAX_PAGE_TEXT: usize = 10_000;

/// Metadata key carrying the oracle's summary of an extracted opportunity.
pub const DESCRIPTION_KEY: &str = "description";

#[derive(Debug, Clone, Copy)]
struct OracleExtraction {
    timeout: Duration,
    retries: u32,
    backoff: Duration,
}

/// What one deep scan produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeepScanOutcome {
    pub candidates: Vec<Candidate>,
    /// Normalized URLs fetched, in order
    pub visited: Vec<String>,
}

/// Bounded same-site explorer.
pub struct DeepScanner<F, O> {
    fetcher: F,
    oracle: O,
    extraction: Option<OracleExtraction>,
    robots: Option<Arc<RobotsCache>>,
    cancel: Option<CancellationToken>,
}

impl<F: PageFetcher, O: SemanticOracle> DeepScanner<F, O> {
    pub fn new(fetcher: F, oracle: O) -> Self {
        Self {
            fetcher,
            oracle,
            extraction: None,
            robots: None,
            cancel: None,
        }
    }

    /// Ask the oracle about procurement pages structural extraction cannot
    /// read. Each call gets `timeout`, and up to `retries` extra attempts.
    pub fn with_oracle_extraction(mut self, timeout: Duration, retries: u32, backoff: Duration) -> Self {
        self.extraction = Some(OracleExtraction {
            timeout,
            retries,
            backoff,
        });
        self
    }

    /// Consult robots.txt before each page.
    pub fn with_robots(mut self, robots: Arc<RobotsCache>) -> Self {
        self.robots = Some(robots);
        self
    }

    /// Stop between pages once the token is cancelled.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Scan a site from its root, at most `max_depth` hops and `max_pages`
    /// fetched pages.
    pub async fn deep_scan(
        &self,
        site: &ResolvedSite,
        max_depth: usize,
        max_pages: usize,
    ) -> DeepScanOutcome {
        let mut outcome = DeepScanOutcome::default();
        let Some(root) = site.root_url() else {
            debug!(url = %site.url, "Site URL has no root, skipping deep scan");
            return outcome;
        };
        let listing_key = normalize_url(&site.url);

        let mut seen: HashSet<String> = HashSet::new();
        let mut current_level: Vec<String> = vec![root.clone()];
        seen.insert(normalize_url(&root).unwrap_or_else(|| root.clone()));

        info!(url = %root, max_depth, max_pages, "Starting deep scan");

        'levels: for depth in 0..=max_depth {
            if current_level.is_empty() {
                break;
            }
            let mut next_level: Vec<(String, bool)> = Vec::new();

            for url in std::mem::take(&mut current_level) {
                if outcome.visited.len() >= max_pages {
                    break 'levels;
                }
                if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                    debug!(url = %root, "Deep scan cancelled");
                    break 'levels;
                }
                if let Some(robots) = &self.robots {
                    if !robots.is_allowed(&self.fetcher, &url).await {
                        debug!(url = %url, "Disallowed by robots.txt");
                        continue;
                    }
                }

                let key = normalize_url(&url).unwrap_or_else(|| url.clone());
                outcome.visited.push(key.clone());

                let page = match self.fetcher.fetch(&url).await {
                    Ok(page) if page.is_success() => page,
                    Ok(page) => {
                        debug!(url = %url, status = page.status, "Deep scan page unavailable");
                        continue;
                    }
                    Err(e) => {
                        debug!(url = %url, error = %e, "Deep scan fetch failed");
                        continue;
                    }
                };
                if !same_site(&page.final_url, &root) {
                    debug!(url = %url, final_url = %page.final_url, "Redirected off-site");
                    continue;
                }

                let title = page_title(&page.body);
                let is_listing = listing_key.as_deref() == Some(key.as_str());
                if !is_listing {
                    let flagged = has_procurement_keyword(&url) || has_procurement_keyword(&title);
                    let mut found = if flagged {
                        extract_candidates(&page.body, &page.final_url, &site.id, SiteShape::Auto).candidates
                    } else {
                        Vec::new()
                    };
                    if found.is_empty() {
                        found = self.read_with_oracle(&page.body, &page.final_url, &site.id, flagged).await;
                    }
                    if !found.is_empty() {
                        debug!(url = %url, found = found.len(), "Deep scan found candidates");
                    }
                    outcome.candidates.extend(found);
                }

                if depth < max_depth {
                    for (link, text) in page_links(&page.body, &page.final_url) {
                        if !same_site(&link, &root) || is_document_link(&link) {
                            continue;
                        }
                        let Some(link_key) = normalize_url(&link) else {
                            continue;
                        };
                        if seen.insert(link_key) {
                            let priority = has_procurement_keyword(&link) || has_procurement_keyword(&text);
                            next_level.push((link, priority));
                        }
                    }
                }
            }

            // Stable: keyword links first, discovery order otherwise.
            next_level.sort_by_key(|(_, priority)| !priority);
            current_level = next_level.into_iter().map(|(link, _)| link).collect();
        }

        info!(
            url = %root,
            pages = outcome.visited.len(),
            found = outcome.candidates.len(),
            "Deep scan complete"
        );
        outcome
    }

    /// Oracle fallback for a page with no structure to extract.
    ///
    /// Only pages that look procurement-related are sent: flagged by URL or
    /// title, or mentioning procurement alongside a date in their text.
    async fn read_with_oracle(&self, html: &str, page_url: &str, site_id: &str, flagged: bool) -> Vec<Candidate> {
        let Some(extraction) = self.extraction else {
            return Vec::new();
        };
        let text = visible_text(html, MAX_PAGE_TEXT);
        if text.is_empty() || !(flagged || (has_procurement_keyword(&text) && contains_date(&text))) {
            return Vec::new();
        }

        let found = call_oracle(extraction.timeout, extraction.retries, extraction.backoff, || {
            self.oracle.extract_opportunities(&text)
        })
        .await;

        match found {
            Ok(found) => found
                .into_iter()
                .map(|opportunity| {
                    let mut candidate = Candidate::new(site_id, opportunity.title)
                        .with_link(page_url)
                        .with_deadline_text(opportunity.deadline.unwrap_or_default());
                    if let Some(description) = opportunity.description {
                        candidate = candidate.with_metadata(DESCRIPTION_KEY, description);
                    }
                    candidate
                })
                .collect(),
            Err(e) => {
                warn!(url = %page_url, error = %e, "Oracle page extraction failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockFetcher, MockOracle};
    use crate::traits::oracle::ExtractedOpportunity;
    use uuid::Uuid;

    fn scanner(fetcher: MockFetcher) -> DeepScanner<MockFetcher, MockOracle> {
        DeepScanner::new(fetcher, MockOracle::new())
    }

    fn site(url: &str) -> ResolvedSite {
        ResolvedSite::new(Uuid::now_v7(), url, "Main Office")
    }

    fn mesh_site() -> MockFetcher {
        MockFetcher::new()
            .with_page(
                "https://town.gov",
                r#"<title>Town Hall</title>
                   <a href="/parks">Parks</a>
                   <a href="/finance/bids">Bids</a>
                   <a href="/finance/bids/#top">Bids again</a>
                   <a href="/agenda.pdf">Agenda</a>
                   <a href="https://elsewhere.com/bids">Partner</a>"#,
            )
            .with_page(
                "https://town.gov/parks",
                r#"<a href="/">Home</a><a href="/parks?sort=name">Sorted</a><a href="/parks/fields">Fields</a>"#,
            )
            .with_page(
                "https://town.gov/finance/bids",
                r#"<title>Open Bids</title>
                   <ul><li><a href="/finance/bids/12">Salt Shed Construction</a> due 6/2/2025</li></ul>
                   <a href="/finance/bids?page=2">2</a>"#,
            )
            .with_page(
                "https://town.gov/finance/bids?page=2",
                r#"<ul><li><a href="/finance/bids/13">Roof Repairs RFP</a></li></ul>"#,
            )
    }

    #[tokio::test]
    async fn test_finds_candidates_off_the_listing_page() {
        let fetcher = mesh_site();
        let outcome = scanner(fetcher.clone())
            .deep_scan(&site("https://town.gov/departments"), 2, 25)
            .await;

        let titles: Vec<_> = outcome.candidates.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, ["Salt Shed Construction", "Roof Repairs RFP"]);
        assert!(!fetcher.fetched_urls().iter().any(|u| u.contains("elsewhere.com")));
        assert!(!fetcher.fetched_urls().iter().any(|u| u.ends_with(".pdf")));
    }

    #[tokio::test]
    async fn test_keyword_links_first_within_level() {
        let fetcher = mesh_site();
        let outcome = scanner(fetcher)
            .deep_scan(&site("https://town.gov/x"), 1, 25)
            .await;
        assert_eq!(
            outcome.visited,
            ["https://town.gov", "https://town.gov/finance/bids", "https://town.gov/parks"]
        );
    }

    #[tokio::test]
    async fn test_never_revisits_and_respects_page_budget() {
        let fetcher = mesh_site();
        let outcome = scanner(fetcher.clone())
            .deep_scan(&site("https://town.gov"), 5, 3)
            .await;

        assert!(outcome.visited.len() <= 3);
        let fetched = fetcher.fetched_urls();
        assert!(fetched.len() <= 3);
        let unique: HashSet<_> = fetched.iter().filter_map(|u| normalize_url(u)).collect();
        assert_eq!(unique.len(), fetched.len());
    }

    #[tokio::test]
    async fn test_listing_page_itself_is_not_extracted() {
        let fetcher = mesh_site();
        let outcome = scanner(fetcher)
            .deep_scan(&site("https://town.gov/finance/bids"), 1, 25)
            .await;
        assert!(outcome.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_robots_disallow() {
        let fetcher = mesh_site().with_page(
            "https://town.gov/robots.txt",
            "User-agent: *\nDisallow: /finance",
        );
        let outcome = scanner(fetcher)
            .with_robots(Arc::new(RobotsCache::new("RfpScout")))
            .deep_scan(&site("https://town.gov/x"), 2, 25)
            .await;
        assert!(outcome.candidates.is_empty());
        assert!(!outcome.visited.iter().any(|u| u.contains("/finance")));
    }

    fn prose_site() -> MockFetcher {
        MockFetcher::new()
            .with_page(
                "https://town.gov",
                r#"<a href="/public-works">Public Works</a><a href="/parks">Parks</a>"#,
            )
            .with_page(
                "https://town.gov/public-works",
                r#"<title>Public Works</title>
                   <p>The Town is seeking sealed bids for the Salt Shed Construction project.
                   Bids are due June 2, 2025 at 2:00 PM at Town Hall.</p>"#,
            )
            .with_page("https://town.gov/parks", "<p>Summer hours start in June.</p>")
    }

    fn salt_shed() -> ExtractedOpportunity {
        ExtractedOpportunity::new("Salt Shed Construction")
            .with_deadline("2025-06-02")
            .with_description("Sealed bids for a salt storage shed.")
    }

    #[tokio::test]
    async fn test_oracle_reads_pages_without_structure() {
        let oracle = MockOracle::new().with_extraction("salt shed", vec![salt_shed()]);
        let outcome = DeepScanner::new(prose_site(), oracle.clone())
            .with_oracle_extraction(Duration::from_secs(1), 0, Duration::from_millis(1))
            .deep_scan(&site("https://town.gov/x"), 1, 25)
            .await;

        assert_eq!(outcome.candidates.len(), 1);
        let candidate = &outcome.candidates[0];
        assert_eq!(candidate.title, "Salt Shed Construction");
        assert_eq!(candidate.raw_link, "https://town.gov/public-works");
        assert_eq!(candidate.raw_deadline_text, "2025-06-02");
        assert_eq!(
            candidate.raw_metadata.get(DESCRIPTION_KEY).map(String::as_str),
            Some("Sealed bids for a salt storage shed.")
        );
        // The root and the parks page carry no procurement signal.
        assert_eq!(oracle.extract_count(), 1);
    }

    #[tokio::test]
    async fn test_oracle_extraction_is_off_by_default() {
        let oracle = MockOracle::new().with_extraction("salt shed", vec![salt_shed()]);
        let outcome = DeepScanner::new(prose_site(), oracle.clone())
            .deep_scan(&site("https://town.gov/x"), 1, 25)
            .await;
        assert!(outcome.candidates.is_empty());
        assert_eq!(oracle.extract_count(), 0);
    }

    #[tokio::test]
    async fn test_structured_pages_skip_the_oracle() {
        let oracle = MockOracle::new().with_extraction("salt shed", vec![salt_shed()]);
        let outcome = DeepScanner::new(mesh_site(), oracle.clone())
            .with_oracle_extraction(Duration::from_secs(1), 0, Duration::from_millis(1))
            .deep_scan(&site("https://town.gov/departments"), 2, 25)
            .await;
        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(oracle.extract_count(), 0);
    }

    #[tokio::test]
    async fn test_oracle_failure_yields_nothing() {
        let oracle = MockOracle::new()
            .with_extraction("salt shed", vec![salt_shed()])
            .with_delay(Duration::from_millis(200));
        let outcome = DeepScanner::new(prose_site(), oracle)
            .with_oracle_extraction(Duration::from_millis(20), 0, Duration::from_millis(1))
            .deep_scan(&site("https://town.gov/x"), 1, 25)
            .await;
        assert!(outcome.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_scan_fetches_nothing() {
        let fetcher = mesh_site();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = scanner(fetcher.clone())
            .with_cancellation(cancel)
            .deep_scan(&site("https://town.gov"), 2, 25)
            .await;
        assert!(outcome.visited.is_empty());
        assert!(fetcher.fetched_urls().is_empty());
    }
}
