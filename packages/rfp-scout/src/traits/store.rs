//! Storage traits for entities, resolved sites, and bids.
//!
//! The storage layer is split into focused traits:
//! - `EntityStore`: Entity registry
//! - `SiteStore`: Resolved procurement sites
//! - `BidStore`: Persisted, de-duplicated bids
//! - `ScoutStore`: Composite trait combining all three
//!
//! Every method failing here is a storage failure, which aborts a run.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    bid::{Bid, BidFilter, UpsertOutcome},
    entity::{Entity, EntityFilter, EntityKind, EntityStatus, UpsertCounts},
    site::ResolvedSite,
};

/// Registry of entities.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// List entities matching a filter, ordered by kind rank then name.
    async fn list_entities(&self, filter: &EntityFilter) -> Result<Vec<Entity>>;

    /// Insert or update entities keyed by (kind, normalized name, parent).
    ///
    /// An existing row keeps its id, status and creation time.
    async fn upsert_entities(&self, entities: &[Entity]) -> Result<UpsertCounts>;

    /// Get an entity by id.
    async fn get_entity(&self, id: Uuid) -> Result<Option<Entity>>;

    /// Find an entity by kind and name (case-insensitive), any parent.
    async fn find_entity(&self, kind: Option<EntityKind>, name: &str) -> Result<Option<Entity>>;

    /// Transition an entity's status.
    async fn set_entity_status(&self, id: Uuid, status: EntityStatus) -> Result<()>;

    /// Walk parents until a state entity is found.
    async fn state_of(&self, entity: &Entity) -> Result<Option<Entity>> {
        let mut current = entity.clone();
        // Bounded walk so a corrupt cycle cannot spin forever.
        for _ in 0..16 {
            if current.kind == EntityKind::State {
                return Ok(Some(current));
            }
            let Some(parent) = current.parent_entity else {
                return Ok(None);
            };
            match self.get_entity(parent).await? {
                Some(p) => current = p,
                None => return Ok(None),
            }
        }
        Ok(None)
    }
}

/// Resolved procurement sites.
#[async_trait]
pub trait SiteStore: Send + Sync {
    /// Insert or update sites keyed by site id.
    async fn upsert_sites(&self, sites: &[ResolvedSite]) -> Result<()>;

    /// All sites owned by an entity, ordered by URL.
    async fn list_sites(&self, entity_id: Uuid) -> Result<Vec<ResolvedSite>>;

    /// Verified sites only.
    async fn list_verified_sites(&self, entity_id: Uuid) -> Result<Vec<ResolvedSite>> {
        Ok(self
            .list_sites(entity_id)
            .await?
            .into_iter()
            .filter(|s| s.verified)
            .collect())
    }
}

/// Persisted bids keyed by slug.
#[async_trait]
pub trait BidStore: Send + Sync {
    /// Insert a bid, or refresh an existing one in place.
    ///
    /// Atomic per call. No transaction spans several bids.
    async fn upsert_bid(&self, bid: &Bid) -> Result<UpsertOutcome>;

    /// Get a bid by slug.
    async fn get_bid(&self, slug: &str) -> Result<Option<Bid>>;

    /// List bids matching a filter, ordered by deadline then slug.
    async fn list_bids(&self, filter: &BidFilter) -> Result<Vec<Bid>>;
}

/// Composite storage trait used by the pipeline.
pub trait ScoutStore: EntityStore + SiteStore + BidStore {}

impl<T> ScoutStore for T where T: EntityStore + SiteStore + BidStore {}
