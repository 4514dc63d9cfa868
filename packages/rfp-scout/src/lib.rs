//! Construction RFP Discovery Library
//!
//! Finds construction, architecture and engineering bid opportunities posted
//! on government procurement sites, verifies them, and keeps only the ones
//! that are relevant and still actionable.
//!
//! # Pipeline
//!
//! 1. **Entity Registry** - the governmental units to scan (states, counties,
//!    cities, towns, agencies, universities)
//! 2. **Site Resolver** - asks a semantic oracle where each entity posts bids
//!    and checks every proposal is reachable
//! 3. **Listing Crawler** / **Deep Scanner** - extract raw candidates from
//!    listing pages, then from the rest of the site, asking the oracle to
//!    read pages that have no table or list
//! 4. **Link Verifier** - loads each candidate's link
//! 5. **Relevance & Deadline Filter** - drops anything closing within four
//!    days or not construction-related
//! 6. **Store** - upserts accepted bids keyed by a deterministic slug
//!
//! # Usage
//!
//! ```rust,ignore
//! use rfp_scout::{EntityFilter, EntityRegistry, MemoryStore, Pipeline};
//! use rfp_scout::testing::{MockFetcher, MockOracle};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! EntityRegistry::new(store.as_ref()).seed_us_states().await?;
//!
//! let pipeline = Pipeline::new(store.clone(), MockFetcher::new(), MockOracle::new());
//! let summary = pipeline.run(&EntityFilter::new().with_state("Vermont")).await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Capability traits (PageFetcher, SemanticOracle, stores)
//! - [`types`] - Entities, sites, candidates, bids, run summaries
//! - [`pipeline`] - The stages and the runner that chains them
//! - [`stores`] - MemoryStore and SqliteStore
//! - [`fetchers`] - HTTP, rate limiting, robots.txt
//! - [`oracle`] - OpenAI-compatible oracle
//! - [`export`] - CSV and JSON bid export
//! - [`testing`] - Mock implementations for testing

pub mod error;
pub mod export;
pub mod fetchers;
pub mod oracle;
pub mod pipeline;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{
    FetchError, OracleError, ParseError, Result, ScoutError, SecurityError, ValidationError,
};
pub use traits::{
    fetcher::{FetchedPage, PageFetcher, UrlValidator, ValidatedFetcher},
    oracle::{
        Category, Classification, ExtractedOpportunity, SemanticOracle, SiteProposal, SiteQuery,
    },
    store::{BidStore, EntityStore, ScoutStore, SiteStore},
};
pub use types::{
    bid::{Bid, BidFilter, UpsertOutcome},
    candidate::{Candidate, Decision, DecisionReason, StatusCategory, VerificationResult},
    config::{PipelineConfig, ACTIONABILITY_WINDOW_DAYS},
    entity::{Entity, EntityFilter, EntityKind, EntityStatus, UpsertCounts},
    run::{EntityReport, FailedEntity, RunSummary},
    site::{ResolvedSite, SiteShape},
};

// Re-export pipeline components
pub use pipeline::{
    is_actionable, parse_deadline, search_scope, seed_states, DeepScanner, EntityRegistry,
    EntitySeed, LinkVerifier, ListingCrawler, Pipeline, RelevanceFilter, SiteResolver,
};

// Re-export stores
pub use stores::MemoryStore;

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;

// Re-export fetchers and oracle
pub use fetchers::{HttpFetcher, RateLimitedFetcher, RobotsCache};
pub use oracle::{OpenAiOracle, OracleCredentials};
