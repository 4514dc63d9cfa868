//! Listing Crawler: fetch a resolved site's listing pages and extract
//! candidates, following pagination up to a hard ceiling.

use std::collections::HashSet;
use tracing::{debug, warn};

use super::extract::{extract_candidates, next_page_url};
use super::urls::normalize_url;
use crate::error::{ParseError, Result};
use crate::traits::fetcher::PageFetcher;
use crate::types::{
    candidate::Candidate,
    site::{ResolvedSite, SiteShape},
};

/// What one listing crawl produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlOutcome {
    pub candidates: Vec<Candidate>,
    /// Shape that matched on the first page (`Auto` when nothing matched)
    pub shape: SiteShape,
    /// Listing pages fetched
    pub pages: usize,
}

/// Crawls listing pages through a [`PageFetcher`].
pub struct ListingCrawler<F> {
    fetcher: F,
    max_pages: usize,
}

impl<F: PageFetcher> ListingCrawler<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            max_pages: 10,
        }
    }

    /// Hard ceiling on pages followed through pagination.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Candidates found on a site's listing pages.
    pub async fn crawl(&self, site: &ResolvedSite) -> Result<Vec<Candidate>> {
        Ok(self.crawl_detailed(site).await?.candidates)
    }

    /// Crawl and report the detected shape and page count as well.
    ///
    /// A failing first page is an error. A failing later page ends
    /// pagination and keeps what was already extracted.
    pub async fn crawl_detailed(&self, site: &ResolvedSite) -> Result<CrawlOutcome> {
        let mut outcome = CrawlOutcome::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut shape = site.shape;
        let mut next = Some(site.url.clone());

        while let Some(url) = next.take() {
            if outcome.pages >= self.max_pages {
                debug!(url = %site.url, pages = outcome.pages, "Listing page ceiling reached");
                break;
            }
            visited.insert(normalize_url(&url).unwrap_or_else(|| url.clone()));

            let page = match self.fetcher.fetch(&url).await {
                Ok(page) => page,
                Err(e) if outcome.pages == 0 => return Err(e.into()),
                Err(e) => {
                    warn!(url = %url, error = %e, "Listing pagination fetch failed");
                    break;
                }
            };
            if !page.is_success() {
                if outcome.pages == 0 {
                    return Err(ParseError::Listing {
                        url,
                        reason: format!("HTTP {}", page.status),
                    }
                    .into());
                }
                warn!(url = %url, status = page.status, "Listing pagination page unavailable");
                break;
            }
            outcome.pages += 1;

            let extracted = extract_candidates(&page.body, &page.final_url, &site.id, shape);
            if outcome.pages == 1 {
                outcome.shape = extracted.shape;
                // Later pages use the layout the first page matched.
                if extracted.shape != SiteShape::Auto {
                    shape = extracted.shape;
                }
            }
            debug!(
                url = %url,
                shape = %extracted.shape,
                found = extracted.candidates.len(),
                "Extracted listing page"
            );
            outcome.candidates.extend(extracted.candidates);

            next = next_page_url(&page.body, &page.final_url).filter(|candidate| {
                let key = normalize_url(candidate).unwrap_or_else(|| candidate.clone());
                !visited.contains(&key)
            });
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScoutError;
    use crate::testing::MockFetcher;
    use uuid::Uuid;

    fn site(url: &str) -> ResolvedSite {
        ResolvedSite::new(Uuid::now_v7(), url, "Purchasing").with_verified(true)
    }

    fn listing(title: &str, next: Option<&str>) -> String {
        let next = next
            .map(|n| format!(r#"<a href="{}">Next</a>"#, n))
            .unwrap_or_default();
        format!(
            r#"<ul><li><a href="/bid/{0}">RFP {0}</a> due 5/20/2025</li></ul>{1}"#,
            title, next
        )
    }

    #[tokio::test]
    async fn test_follows_pagination() {
        let fetcher = MockFetcher::new()
            .with_page("https://a.gov/bids", listing("one", Some("/bids?page=2")))
            .with_page("https://a.gov/bids?page=2", listing("two", Some("/bids?page=3")))
            .with_page("https://a.gov/bids?page=3", listing("three", None));

        let outcome = ListingCrawler::new(fetcher)
            .crawl_detailed(&site("https://a.gov/bids"))
            .await
            .unwrap();
        assert_eq!(outcome.pages, 3);
        assert_eq!(outcome.shape, SiteShape::Links);
        let titles: Vec<_> = outcome.candidates.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, ["RFP one", "RFP two", "RFP three"]);
    }

    #[tokio::test]
    async fn test_pagination_loop_is_bounded() {
        let fetcher = MockFetcher::new()
            .with_page("https://a.gov/bids", listing("one", Some("/bids?page=2")))
            .with_page("https://a.gov/bids?page=2", listing("two", Some("/bids")));

        let outcome = ListingCrawler::new(fetcher.clone())
            .crawl_detailed(&site("https://a.gov/bids"))
            .await
            .unwrap();
        assert_eq!(outcome.pages, 2);
        assert_eq!(fetcher.fetch_count("https://a.gov/bids"), 1);
    }

    #[tokio::test]
    async fn test_page_ceiling() {
        let mut fetcher = MockFetcher::new();
        for i in 1..=20 {
            let url = format!("https://a.gov/bids?page={}", i);
            let next = format!("/bids?page={}", i + 1);
            fetcher = fetcher.with_page(&url, listing(&i.to_string(), Some(&next)));
        }
        let outcome = ListingCrawler::new(fetcher)
            .with_max_pages(3)
            .crawl_detailed(&site("https://a.gov/bids?page=1"))
            .await
            .unwrap();
        assert_eq!(outcome.pages, 3);
        assert_eq!(outcome.candidates.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_listing_is_not_an_error() {
        let fetcher = MockFetcher::new().with_page("https://a.gov/bids", "<p>No open solicitations at this time.</p>");
        let found = ListingCrawler::new(fetcher)
            .crawl(&site("https://a.gov/bids"))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_missing_listing_page_is_parse_error() {
        let err = ListingCrawler::new(MockFetcher::new())
            .crawl(&site("https://a.gov/gone"))
            .await
            .unwrap_err();
        assert!(matches!(err, ScoutError::Parse(ParseError::Listing { .. })));
    }
}
