//! Site Resolver: ask the oracle where an entity posts bids, then check
//! each proposal is reachable.
//!
//! Oracle failure marks the entity `failed` and writes no sites, so the
//! next run can retry it cleanly. Oracle success marks it `resolved` even
//! when nothing verifies.

use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::call_oracle;
use super::urls::canonical_url;
use crate::error::Result;
use crate::traits::fetcher::{is_government_domain, PageFetcher, UrlValidator};
use crate::traits::oracle::{SemanticOracle, SiteProposal, SiteQuery};
use crate::traits::store::{EntityStore, SiteStore};
use crate::types::{
    config::PipelineConfig,
    entity::{Entity, EntityKind, EntityStatus},
    site::ResolvedSite,
};

/// Departments asked about for each entity kind.
pub fn search_scope(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::State => &[
            "Procurement",
            "Department of Transportation",
            "Department of Administrative Services",
            "Public Works",
        ],
        EntityKind::County | EntityKind::City | EntityKind::Town => &[
            "Main Office",
            "Public Works",
            "Purchasing",
            "School District",
            "Housing Authority",
        ],
        EntityKind::Agency | EntityKind::University => &["Main Office", "Purchasing"],
    }
}

/// Resolves entities to procurement sites.
pub struct SiteResolver<'a, S: ?Sized, F, O> {
    store: &'a S,
    fetcher: &'a F,
    oracle: &'a O,
    validator: UrlValidator,
    oracle_timeout: Duration,
    oracle_retries: u32,
    retry_backoff: Duration,
    prefer_government_domains: bool,
}

impl<'a, S, F, O> SiteResolver<'a, S, F, O>
where
    S: EntityStore + SiteStore + ?Sized,
    F: PageFetcher,
    O: SemanticOracle,
{
    pub fn new(store: &'a S, fetcher: &'a F, oracle: &'a O) -> Self {
        let defaults = PipelineConfig::default();
        Self {
            store,
            fetcher,
            oracle,
            validator: UrlValidator::new(),
            oracle_timeout: defaults.oracle_timeout,
            oracle_retries: defaults.oracle_retries,
            retry_backoff: defaults.retry_backoff,
            prefer_government_domains: defaults.prefer_government_domains,
        }
    }

    /// Take oracle timing and domain preference from a run config.
    pub fn with_config(mut self, config: &PipelineConfig) -> Self {
        self.oracle_timeout = config.oracle_timeout;
        self.oracle_retries = config.oracle_retries;
        self.retry_backoff = config.retry_backoff;
        self.prefer_government_domains = config.prefer_government_domains;
        self
    }

    /// Replace the SSRF guard applied to proposed URLs.
    pub fn with_validator(mut self, validator: UrlValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Resolve one entity and persist its sites.
    ///
    /// Returns every site written, verified or not. An oracle error is
    /// returned after the entity is marked `failed`.
    pub async fn resolve(&self, entity: &Entity) -> Result<Vec<ResolvedSite>> {
        let state = self
            .store
            .state_of(entity)
            .await?
            .map(|s| s.name);

        let mut proposals: Vec<SiteProposal> = Vec::new();
        for department in search_scope(entity.kind) {
            let mut query = SiteQuery::new(entity.name.as_str(), entity.kind, *department);
            if let Some(state) = &state {
                query = query.with_state(state.as_str());
            }

            let proposed = call_oracle(
                self.oracle_timeout,
                self.oracle_retries,
                self.retry_backoff,
                || self.oracle.propose(&query),
            )
            .await;

            match proposed {
                Ok(found) => {
                    debug!(query = %query.describe(), count = found.len(), "Oracle proposals");
                    proposals.extend(found);
                }
                Err(e) => {
                    warn!(entity = %entity.name, department = %department, error = %e, "Site lookup failed");
                    self.store
                        .set_entity_status(entity.id, EntityStatus::Failed)
                        .await?;
                    return Err(e.into());
                }
            }
        }

        let candidates = self.screen(proposals);

        let mut sites = Vec::with_capacity(candidates.len());
        for proposal in candidates {
            let verified = self.is_reachable(&proposal.url).await;
            sites.push(ResolvedSite::new(entity.id, proposal.url, proposal.label).with_verified(verified));
        }

        self.store.upsert_sites(&sites).await?;
        self.store
            .set_entity_status(entity.id, EntityStatus::Resolved)
            .await?;

        info!(
            entity = %entity.name,
            sites = sites.len(),
            verified = sites.iter().filter(|s| s.verified).count(),
            "Resolved entity"
        );
        Ok(sites)
    }

    /// Drop unparsable, blocked and duplicate proposals, then order them.
    fn screen(&self, proposals: Vec<SiteProposal>) -> Vec<SiteProposal> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut kept: Vec<SiteProposal> = proposals
            .into_iter()
            .filter(|p| {
                let Some(key) = canonical_url(&p.url) else {
                    warn!(url = %p.url, "Dropping unparsable proposal");
                    return false;
                };
                if let Err(e) = self.validator.validate(&p.url) {
                    warn!(url = %p.url, error = %e, "Dropping blocked proposal");
                    return false;
                }
                seen.insert(key)
            })
            .collect();

        if self.prefer_government_domains {
            kept.sort_by_key(|p| !is_government_domain(&p.url));
        }
        kept
    }

    async fn is_reachable(&self, url: &str) -> bool {
        match self.fetcher.fetch(url).await {
            Ok(page) if page.is_success() => true,
            Ok(page) => {
                debug!(url = %url, status = page.status, "Proposal not reachable");
                false
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Proposal not reachable");
                false
            }
        }
    }
}
