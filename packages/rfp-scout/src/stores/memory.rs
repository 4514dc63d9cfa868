//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Result, ValidationError};
use crate::traits::store::{BidStore, EntityStore, SiteStore};
use crate::types::{
    bid::{sort_bids, Bid, BidFilter, UpsertOutcome},
    entity::{normalize_name, sort_entities, Entity, EntityFilter, EntityKind, EntityStatus, UpsertCounts},
    site::{ResolvedSite, SiteShape},
};

/// In-memory storage for entities, sites, and bids.
///
/// Useful for testing and development. Data is lost on restart.
pub struct MemoryStore {
    entities: RwLock<HashMap<Uuid, Entity>>,
    sites: RwLock<HashMap<String, ResolvedSite>>,
    bids: RwLock<HashMap<String, Bid>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            sites: RwLock::new(HashMap::new()),
            bids: RwLock::new(HashMap::new()),
        }
    }

    pub async fn entity_count(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn site_count(&self) -> usize {
        self.sites.read().await.len()
    }

    pub async fn bid_count(&self) -> usize {
        self.bids.read().await.len()
    }

}

/// Ids of the named states and every entity below them.
pub(crate) fn state_scope(entities: &HashMap<Uuid, Entity>, state: &str) -> HashSet<Uuid> {
    let wanted = normalize_name(state);
    let roots: HashSet<Uuid> = entities
        .values()
        .filter(|e| e.kind == EntityKind::State && e.name_key() == wanted)
        .map(|e| e.id)
        .collect();

    entities
        .values()
        .filter(|e| {
            let mut current = Some(e.id);
            for _ in 0..16 {
                let Some(id) = current else { return false };
                if roots.contains(&id) {
                    return true;
                }
                current = entities.get(&id).and_then(|x| x.parent_entity);
            }
            false
        })
        .map(|e| e.id)
        .collect()
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn list_entities(&self, filter: &EntityFilter) -> Result<Vec<Entity>> {
        let entities = self.entities.read().await;
        let scope = filter.state.as_deref().map(|s| state_scope(&entities, s));

        let mut matched: Vec<Entity> = entities
            .values()
            .filter(|e| filter.kind.map_or(true, |k| e.kind == k))
            .filter(|e| filter.status.map_or(true, |s| e.status == s))
            .filter(|e| scope.as_ref().map_or(true, |ids| ids.contains(&e.id)))
            .cloned()
            .collect();
        sort_entities(&mut matched);
        Ok(matched)
    }

    async fn upsert_entities(&self, batch: &[Entity]) -> Result<UpsertCounts> {
        let mut entities = self.entities.write().await;
        let mut counts = UpsertCounts::default();

        // Check the whole batch first so a bad entry writes nothing.
        let mut keys: HashSet<_> = entities.values().map(|e| e.natural_key()).collect();
        let mut inserted: HashSet<Uuid> = HashSet::new();
        for incoming in batch {
            incoming.validate()?;
            if let Some(parent) = incoming.parent_entity {
                if !entities.contains_key(&parent) && !inserted.contains(&parent) {
                    return Err(ValidationError::UnknownParent(parent.to_string()).into());
                }
            }
            if keys.insert(incoming.natural_key()) {
                inserted.insert(incoming.id);
            }
        }

        for incoming in batch {
            let key = incoming.natural_key();
            let existing = entities
                .values_mut()
                .find(|e| e.natural_key() == key);
            match existing {
                Some(current) => {
                    current.name = incoming.name.clone();
                    counts.updated += 1;
                }
                None => {
                    entities.insert(incoming.id, incoming.clone());
                    counts.inserted += 1;
                }
            }
        }

        Ok(counts)
    }

    async fn get_entity(&self, id: Uuid) -> Result<Option<Entity>> {
        Ok(self.entities.read().await.get(&id).cloned())
    }

    async fn find_entity(&self, kind: Option<EntityKind>, name: &str) -> Result<Option<Entity>> {
        let wanted = normalize_name(name);
        let entities = self.entities.read().await;
        let mut found: Vec<Entity> = entities
            .values()
            .filter(|e| kind.map_or(true, |k| e.kind == k) && e.name_key() == wanted)
            .cloned()
            .collect();
        sort_entities(&mut found);
        Ok(found.into_iter().next())
    }

    async fn set_entity_status(&self, id: Uuid, status: EntityStatus) -> Result<()> {
        let mut entities = self.entities.write().await;
        let entity = entities
            .get_mut(&id)
            .ok_or_else(|| ValidationError::UnknownEntity(id.to_string()))?;
        entity.status = status;
        Ok(())
    }
}

#[async_trait]
impl SiteStore for MemoryStore {
    async fn upsert_sites(&self, batch: &[ResolvedSite]) -> Result<()> {
        let mut sites = self.sites.write().await;
        for incoming in batch {
            match sites.get_mut(&incoming.id) {
                Some(current) => {
                    current.url = incoming.url.clone();
                    current.department_label = incoming.department_label.clone();
                    current.verified = incoming.verified;
                    if incoming.shape != SiteShape::Auto {
                        current.shape = incoming.shape;
                    }
                }
                None => {
                    sites.insert(incoming.id.clone(), incoming.clone());
                }
            }
        }
        Ok(())
    }

    async fn list_sites(&self, entity_id: Uuid) -> Result<Vec<ResolvedSite>> {
        let mut owned: Vec<ResolvedSite> = self
            .sites
            .read()
            .await
            .values()
            .filter(|s| s.entity_id == entity_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(owned)
    }
}

#[async_trait]
impl BidStore for MemoryStore {
    async fn upsert_bid(&self, bid: &Bid) -> Result<UpsertOutcome> {
        let mut bids = self.bids.write().await;
        let outcome = if bids.contains_key(&bid.slug) {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        };
        bids.insert(bid.slug.clone(), bid.clone());
        Ok(outcome)
    }

    async fn get_bid(&self, slug: &str) -> Result<Option<Bid>> {
        Ok(self.bids.read().await.get(slug).cloned())
    }

    async fn list_bids(&self, filter: &BidFilter) -> Result<Vec<Bid>> {
        let mut matched: Vec<Bid> = self
            .bids
            .read()
            .await
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        sort_bids(&mut matched);
        Ok(matched)
    }
}
