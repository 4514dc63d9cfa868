//! Testing utilities including mock implementations.
//!
//! These are useful for testing pipelines without making real network or
//! oracle calls. Both mocks are cheap to clone and clones share state, so a
//! test can hand one copy to the pipeline and inspect the other.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{FetchError, FetchResult, OracleError, OracleResult};
use crate::traits::{
    fetcher::{FetchedPage, PageFetcher},
    oracle::{
        Category, Classification, ExtractedOpportunity, SemanticOracle, SiteProposal, SiteQuery,
    },
};

#[derive(Debug, Clone)]
enum MockResponse {
    Page(FetchedPage),
    Error(FetchError),
}

/// A mock page fetcher with canned responses.
///
/// Unknown URLs come back as an empty 404 page.
#[derive(Clone, Default)]
pub struct MockFetcher {
    responses: Arc<RwLock<HashMap<String, MockResponse>>>,
    fetched: Arc<RwLock<Vec<String>>>,
    delay: Option<Duration>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with status 200 at `url`.
    pub fn with_page(self, url: impl Into<String>, body: impl Into<String>) -> Self {
        let url = url.into();
        let page = FetchedPage::ok(url.clone(), body);
        self.responses
            .write()
            .unwrap()
            .insert(url, MockResponse::Page(page));
        self
    }

    /// Serve a fully specified page (status, final URL) at `url`.
    pub fn with_response(self, url: impl Into<String>, page: FetchedPage) -> Self {
        self.responses
            .write()
            .unwrap()
            .insert(url.into(), MockResponse::Page(page));
        self
    }

    /// Fail every fetch of `url` with `error`.
    pub fn with_error(self, url: impl Into<String>, error: FetchError) -> Self {
        self.responses
            .write()
            .unwrap()
            .insert(url.into(), MockResponse::Error(error));
        self
    }

    /// Sleep before answering each fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every URL fetched, in order.
    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetched.read().unwrap().clone()
    }

    /// How many times `url` was fetched.
    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetched
            .read()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<FetchedPage> {
        self.fetched.write().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let response = self.responses.read().unwrap().get(url).cloned();
        match response {
            Some(MockResponse::Page(page)) => Ok(page),
            Some(MockResponse::Error(e)) => Err(e),
            None => Ok(FetchedPage::ok(url, "").with_status(404)),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Record of a call made to the mock oracle.
#[derive(Debug, Clone, PartialEq)]
pub enum MockOracleCall {
    Propose { entity: String, department: String },
    Extract { text: String },
    Classify { text: String },
}

/// A mock semantic oracle.
///
/// Proposals are looked up by (entity, department), then by department
/// alone. Extraction and classification pick the first registered phrase
/// found in the text (case-insensitive). Extraction falls back to nothing
/// found, classification to a non-construction verdict.
#[derive(Clone)]
pub struct MockOracle {
    proposals: Arc<RwLock<HashMap<(String, String), Vec<SiteProposal>>>>,
    extractions: Arc<RwLock<Vec<(String, Vec<ExtractedOpportunity>)>>>,
    classifications: Arc<RwLock<Vec<(String, Result<Classification, OracleError>)>>>,
    default_classification: Classification,
    propose_error: Option<OracleError>,
    delay: Option<Duration>,
    calls: Arc<RwLock<Vec<MockOracleCall>>>,
}

impl Default for MockOracle {
    fn default() -> Self {
        Self {
            proposals: Default::default(),
            extractions: Default::default(),
            classifications: Default::default(),
            default_classification: Classification::new(Category::Other("unrelated".into()), 0.9),
            propose_error: None,
            delay: None,
            calls: Default::default(),
        }
    }
}

fn key(s: &str) -> String {
    s.trim().to_lowercase()
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Proposals for a department of any entity.
    pub fn with_proposals(self, department: &str, proposals: Vec<SiteProposal>) -> Self {
        self.proposals
            .write()
            .unwrap()
            .insert((String::new(), key(department)), proposals);
        self
    }

    /// Proposals for one entity's department.
    pub fn with_entity_proposals(
        self,
        entity: &str,
        department: &str,
        proposals: Vec<SiteProposal>,
    ) -> Self {
        self.proposals
            .write()
            .unwrap()
            .insert((key(entity), key(department)), proposals);
        self
    }

    /// Extract `found` from any page text containing `phrase`.
    pub fn with_extraction(self, phrase: &str, found: Vec<ExtractedOpportunity>) -> Self {
        self.extractions.write().unwrap().push((key(phrase), found));
        self
    }

    /// Classify any text containing `phrase` as `category`.
    pub fn with_classification(self, phrase: &str, category: Category) -> Self {
        self.classifications
            .write()
            .unwrap()
            .push((key(phrase), Ok(Classification::new(category, 0.9))));
        self
    }

    /// Fail classification of any text containing `phrase`.
    pub fn with_classify_error(self, phrase: &str, error: OracleError) -> Self {
        self.classifications
            .write()
            .unwrap()
            .push((key(phrase), Err(error)));
        self
    }

    /// Verdict for text matching no registered phrase.
    pub fn with_default_classification(mut self, classification: Classification) -> Self {
        self.default_classification = classification;
        self
    }

    /// Fail every `propose` call.
    pub fn failing_propose(mut self, error: OracleError) -> Self {
        self.propose_error = Some(error);
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockOracleCall> {
        self.calls.read().unwrap().clone()
    }

    pub fn propose_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockOracleCall::Propose { .. }))
            .count()
    }

    pub fn extract_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockOracleCall::Extract { .. }))
            .count()
    }

    pub fn classify_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockOracleCall::Classify { .. }))
            .count()
    }
}

#[async_trait]
impl SemanticOracle for MockOracle {
    async fn propose(&self, query: &SiteQuery) -> OracleResult<Vec<SiteProposal>> {
        self.calls.write().unwrap().push(MockOracleCall::Propose {
            entity: query.entity_name.clone(),
            department: query.department.clone(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = &self.propose_error {
            return Err(e.clone());
        }

        let proposals = self.proposals.read().unwrap();
        let department = key(&query.department);
        Ok(proposals
            .get(&(key(&query.entity_name), department.clone()))
            .or_else(|| proposals.get(&(String::new(), department)))
            .cloned()
            .unwrap_or_default())
    }

    async fn extract_opportunities(&self, text: &str) -> OracleResult<Vec<ExtractedOpportunity>> {
        self.calls.write().unwrap().push(MockOracleCall::Extract {
            text: text.to_string(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let lowered = text.to_lowercase();
        let extractions = self.extractions.read().unwrap();
        Ok(extractions
            .iter()
            .find(|(phrase, _)| lowered.contains(phrase.as_str()))
            .map(|(_, found)| found.clone())
            .unwrap_or_default())
    }

    async fn classify(&self, text: &str) -> OracleResult<Classification> {
        self.calls.write().unwrap().push(MockOracleCall::Classify {
            text: text.to_string(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let lowered = text.to_lowercase();
        let classifications = self.classifications.read().unwrap();
        classifications
            .iter()
            .find(|(phrase, _)| lowered.contains(phrase.as_str()))
            .map(|(_, verdict)| verdict.clone())
            .unwrap_or_else(|| Ok(self.default_classification.clone()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
