//! Entity Registry: the canonical list of governmental units to scan.
//!
//! Seeding is idempotent. Re-running it refreshes names and never
//! duplicates entities.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, ScoutError, ValidationError};
use crate::traits::store::EntityStore;
use crate::types::entity::{Entity, EntityFilter, EntityKind, UpsertCounts};

/// The 50 states plus the District of Columbia with postal abbreviations.
pub const US_STATES: [(&str, &str); 51] = [
    ("Alabama", "AL"),
    ("Alaska", "AK"),
    ("Arizona", "AZ"),
    ("Arkansas", "AR"),
    ("California", "CA"),
    ("Colorado", "CO"),
    ("Connecticut", "CT"),
    ("Delaware", "DE"),
    ("District of Columbia", "DC"),
    ("Florida", "FL"),
    ("Georgia", "GA"),
    ("Hawaii", "HI"),
    ("Idaho", "ID"),
    ("Illinois", "IL"),
    ("Indiana", "IN"),
    ("Iowa", "IA"),
    ("Kansas", "KS"),
    ("Kentucky", "KY"),
    ("Louisiana", "LA"),
    ("Maine", "ME"),
    ("Maryland", "MD"),
    ("Massachusetts", "MA"),
    ("Michigan", "MI"),
    ("Minnesota", "MN"),
    ("Mississippi", "MS"),
    ("Missouri", "MO"),
    ("Montana", "MT"),
    ("Nebraska", "NE"),
    ("Nevada", "NV"),
    ("New Hampshire", "NH"),
    ("New Jersey", "NJ"),
    ("New Mexico", "NM"),
    ("New York", "NY"),
    ("North Carolina", "NC"),
    ("North Dakota", "ND"),
    ("Ohio", "OH"),
    ("Oklahoma", "OK"),
    ("Oregon", "OR"),
    ("Pennsylvania", "PA"),
    ("Rhode Island", "RI"),
    ("South Carolina", "SC"),
    ("South Dakota", "SD"),
    ("Tennessee", "TN"),
    ("Texas", "TX"),
    ("Utah", "UT"),
    ("Vermont", "VT"),
    ("Virginia", "VA"),
    ("Washington", "WA"),
    ("West Virginia", "WV"),
    ("Wisconsin", "WI"),
    ("Wyoming", "WY"),
];

/// State entities for every entry of [`US_STATES`].
pub fn seed_states() -> Vec<Entity> {
    US_STATES
        .iter()
        .map(|(name, _)| Entity::new(EntityKind::State, *name))
        .collect()
}

/// Postal abbreviation of a state name (case-insensitive).
pub fn state_abbreviation(name: &str) -> Option<&'static str> {
    let name = name.trim();
    US_STATES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, abbr)| *abbr)
}

/// State name for a postal abbreviation (case-insensitive).
pub fn state_name(abbreviation: &str) -> Option<&'static str> {
    let abbreviation = abbreviation.trim();
    US_STATES
        .iter()
        .find(|(_, a)| a.eq_ignore_ascii_case(abbreviation))
        .map(|(name, _)| *name)
}

/// One entry of a JSON seed file.
///
/// `parent` names an already-registered entity (a state may be given by
/// its postal abbreviation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySeed {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
}

/// Registry operations over an [`EntityStore`].
pub struct EntityRegistry<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: EntityStore + ?Sized> EntityRegistry<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Entities matching a filter, ordered by kind rank then name.
    pub async fn list_entities(&self, filter: &EntityFilter) -> Result<Vec<Entity>> {
        self.store.list_entities(filter).await
    }

    /// Idempotent upsert by (kind, normalized name, parent).
    ///
    /// The whole batch is validated before anything is written.
    pub async fn upsert_entities(&self, entities: &[Entity]) -> Result<UpsertCounts> {
        for entity in entities {
            entity.validate()?;
        }
        let counts = self.store.upsert_entities(entities).await?;
        info!(
            inserted = counts.inserted,
            updated = counts.updated,
            "Upserted entities"
        );
        Ok(counts)
    }

    /// Register the 50 states and DC.
    pub async fn seed_us_states(&self) -> Result<UpsertCounts> {
        self.upsert_entities(&seed_states()).await
    }

    /// Register the entries of a JSON seed file, in order, so later entries
    /// may name earlier ones as parents.
    pub async fn seed_from_json(&self, json: &str) -> Result<UpsertCounts> {
        let seeds: Vec<EntitySeed> = serde_json::from_str(json)
            .map_err(|e| ScoutError::Config(format!("invalid seed file: {}", e)))?;

        let mut total = UpsertCounts::default();
        for seed in seeds {
            let entity = self.entity_from_seed(&seed).await?;
            let counts = self.store.upsert_entities(&[entity]).await?;
            total.inserted += counts.inserted;
            total.updated += counts.updated;
        }
        info!(
            inserted = total.inserted,
            updated = total.updated,
            "Seeded entities from file"
        );
        Ok(total)
    }

    async fn entity_from_seed(&self, seed: &EntitySeed) -> Result<Entity> {
        let kind: EntityKind = seed.kind.parse()?;
        let entity = Entity::new(kind, seed.name.as_str());
        entity.validate()?;

        let Some(parent_name) = seed.parent.as_deref().filter(|p| !p.trim().is_empty()) else {
            return Ok(entity);
        };
        let parent = match self.store.find_entity(None, parent_name).await? {
            Some(parent) => Some(parent),
            None => match state_name(parent_name) {
                Some(state) => self.store.find_entity(Some(EntityKind::State), state).await?,
                None => None,
            },
        };
        match parent {
            Some(parent) => Ok(entity.with_parent(parent.id)),
            None => Err(ValidationError::UnknownParent(parent_name.to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;

    #[test]
    fn test_seed_states_covers_fifty_plus_dc() {
        let states = seed_states();
        assert_eq!(states.len(), 51);
        assert!(states.iter().all(|s| s.kind == EntityKind::State));
        assert_eq!(state_abbreviation("connecticut"), Some("CT"));
        assert_eq!(state_name("dc"), Some("District of Columbia"));
    }

    #[tokio::test]
    async fn test_seeding_twice_does_not_duplicate() {
        let store = MemoryStore::new();
        let registry = EntityRegistry::new(&store);

        let first = registry.seed_us_states().await.unwrap();
        assert_eq!(first.inserted, 51);
        let second = registry.seed_us_states().await.unwrap();
        assert_eq!(second, UpsertCounts { inserted: 0, updated: 51 });
        assert_eq!(store.entity_count().await, 51);
    }

    #[tokio::test]
    async fn test_empty_name_rejects_batch() {
        let store = MemoryStore::new();
        let registry = EntityRegistry::new(&store);
        let batch = [
            Entity::new(EntityKind::State, "Vermont"),
            Entity::new(EntityKind::City, " "),
        ];
        assert!(registry.upsert_entities(&batch).await.is_err());
        assert_eq!(store.entity_count().await, 0);
    }

    #[tokio::test]
    async fn test_seed_from_json() {
        let store = MemoryStore::new();
        let registry = EntityRegistry::new(&store);
        registry.seed_us_states().await.unwrap();

        let json = r#"[
            {"kind": "county", "name": "Hartford County", "parent": "Connecticut"},
            {"kind": "city", "name": "Hartford", "parent": "Hartford County"},
            {"kind": "university", "name": "UConn", "parent": "CT"}
        ]"#;
        let counts = registry.seed_from_json(json).await.unwrap();
        assert_eq!(counts.inserted, 3);

        let ct = registry
            .list_entities(&EntityFilter::new().with_state("Connecticut"))
            .await
            .unwrap();
        let names: Vec<_> = ct.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Connecticut", "Hartford County", "Hartford", "UConn"]);
    }

    #[tokio::test]
    async fn test_seed_with_unknown_parent_or_kind() {
        let store = MemoryStore::new();
        let registry = EntityRegistry::new(&store);

        let unknown_parent = r#"[{"kind": "city", "name": "Springfield", "parent": "Atlantis"}]"#;
        assert!(matches!(
            registry.seed_from_json(unknown_parent).await,
            Err(ScoutError::Validation(ValidationError::UnknownParent(_)))
        ));

        let unknown_kind = r#"[{"kind": "village", "name": "Springfield"}]"#;
        assert!(matches!(
            registry.seed_from_json(unknown_kind).await,
            Err(ScoutError::Validation(ValidationError::UnknownKind(_)))
        ));
    }
}
