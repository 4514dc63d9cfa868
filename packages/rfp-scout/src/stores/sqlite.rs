//! SQLite storage implementation.
//!
//! A file-based storage backend using SQLite. Good for:
//! - Operator runs from the CLI
//! - Resuming a scan against sites resolved in an earlier run
//! - Testing with persistent data

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Result, ScoutError, ValidationError};
use crate::traits::store::{BidStore, EntityStore, SiteStore};
use crate::types::{
    bid::{Bid, BidFilter, UpsertOutcome},
    entity::{normalize_name, sort_entities, Entity, EntityFilter, EntityKind, EntityStatus, UpsertCounts},
    site::ResolvedSite,
};

/// How long a writer waits on another connection's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Batch upserts read before they write. Taking the write lock up front
/// keeps a concurrent commit from invalidating the read snapshot.
const BEGIN_WRITE: &str = "BEGIN IMMEDIATE";

/// SQLite-based scout store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given connection URL.
    ///
    /// # Example URLs
    /// - `sqlite://rfp_scout.db?mode=rwc` - File-based, created if missing
    /// - `sqlite::memory:` - Use [`SqliteStore::in_memory`] instead
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(ScoutError::storage)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(ScoutError::storage)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    ///
    /// Every pooled connection would see its own empty database, so the
    /// pool is pinned to one long-lived connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(ScoutError::storage)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create tables if they do not exist yet.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                name_key TEXT NOT NULL,
                parent_entity TEXT,
                parent_key TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                UNIQUE (kind, name_key, parent_key)
            );

            CREATE INDEX IF NOT EXISTS idx_entities_parent ON entities(parent_entity);
            CREATE INDEX IF NOT EXISTS idx_entities_status ON entities(status);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(ScoutError::storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sites (
                id TEXT PRIMARY KEY,
                entity_id TEXT NOT NULL,
                url TEXT NOT NULL,
                department_label TEXT NOT NULL DEFAULT '',
                discovered_at TEXT NOT NULL,
                verified INTEGER NOT NULL DEFAULT 0,
                shape TEXT NOT NULL DEFAULT 'auto'
            );

            CREATE INDEX IF NOT EXISTS idx_sites_entity ON sites(entity_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(ScoutError::storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bids (
                slug TEXT PRIMARY KEY,
                client_name TEXT NOT NULL,
                client_kind TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                deadline TEXT NOT NULL,
                source_url TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT '',
                scraped_at TEXT NOT NULL,
                revision INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_bids_state ON bids(state);
            CREATE INDEX IF NOT EXISTS idx_bids_deadline ON bids(deadline);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(ScoutError::storage)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ScoutError::storage(format!("Invalid date: {}", e)))
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| ScoutError::storage(format!("Invalid id {}: {}", raw, e)))
}

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct EntityRow {
    id: String,
    kind: String,
    name: String,
    parent_entity: Option<String>,
    status: String,
    created_at: String,
}

impl EntityRow {
    fn into_entity(self) -> Result<Entity> {
        Ok(Entity {
            id: parse_uuid(&self.id)?,
            kind: self.kind.parse().map_err(ScoutError::storage)?,
            name: self.name,
            parent_entity: self.parent_entity.as_deref().map(parse_uuid).transpose()?,
            status: self.status.parse().map_err(ScoutError::storage)?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct SiteRow {
    id: String,
    entity_id: String,
    url: String,
    department_label: String,
    discovered_at: String,
    verified: bool,
    shape: String,
}

impl SiteRow {
    fn into_site(self) -> Result<ResolvedSite> {
        Ok(ResolvedSite {
            id: self.id,
            entity_id: parse_uuid(&self.entity_id)?,
            url: self.url,
            department_label: self.department_label,
            discovered_at: parse_timestamp(&self.discovered_at)?,
            verified: self.verified,
            shape: self.shape.parse().map_err(ScoutError::storage)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct BidRow {
    slug: String,
    client_name: String,
    client_kind: String,
    title: String,
    description: Option<String>,
    deadline: String,
    source_url: String,
    state: String,
    scraped_at: String,
}

impl BidRow {
    fn into_bid(self) -> Result<Bid> {
        let deadline = NaiveDate::parse_from_str(&self.deadline, "%Y-%m-%d")
            .map_err(|e| ScoutError::storage(format!("Invalid deadline: {}", e)))?;
        Ok(Bid {
            slug: self.slug,
            client_name: self.client_name,
            client_kind: self.client_kind.parse().map_err(ScoutError::storage)?,
            title: self.title,
            description: self.description,
            deadline,
            source_url: self.source_url,
            state: self.state,
            scraped_at: parse_timestamp(&self.scraped_at)?,
        })
    }
}

const ENTITY_COLUMNS: &str = "id, kind, name, parent_entity, status, created_at";
const BID_COLUMNS: &str =
    "slug, client_name, client_kind, title, description, deadline, source_url, state, scraped_at";

#[async_trait]
impl EntityStore for SqliteStore {
    async fn list_entities(&self, filter: &EntityFilter) -> Result<Vec<Entity>> {
        let query = format!(
            r#"
            WITH RECURSIVE scope(id) AS (
                SELECT id FROM entities WHERE kind = 'state' AND name_key = ?1
                UNION
                SELECT e.id FROM entities e JOIN scope s ON e.parent_entity = s.id
            )
            SELECT {} FROM entities
            WHERE (?2 IS NULL OR kind = ?2)
              AND (?3 IS NULL OR status = ?3)
              AND (?1 IS NULL OR id IN (SELECT id FROM scope))
            "#,
            ENTITY_COLUMNS
        );

        let rows = sqlx::query_as::<_, EntityRow>(&query)
            .bind(filter.state.as_deref().map(normalize_name))
            .bind(filter.kind.map(|k| k.as_str()))
            .bind(filter.status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(ScoutError::storage)?;

        let mut entities = rows
            .into_iter()
            .map(|r| r.into_entity())
            .collect::<Result<Vec<_>>>()?;
        sort_entities(&mut entities);
        Ok(entities)
    }

    async fn upsert_entities(&self, entities: &[Entity]) -> Result<UpsertCounts> {
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await.map_err(ScoutError::storage)?;
        let mut counts = UpsertCounts::default();

        for entity in entities {
            entity.validate()?;
            let parent_key = entity
                .parent_entity
                .map(|p| p.to_string())
                .unwrap_or_default();

            if let Some(parent) = entity.parent_entity {
                let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM entities WHERE id = ?")
                    .bind(parent.to_string())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(ScoutError::storage)?;
                if exists.is_none() {
                    return Err(ValidationError::UnknownParent(parent.to_string()).into());
                }
            }

            let existing: Option<(String,)> = sqlx::query_as(
                "SELECT id FROM entities WHERE kind = ? AND name_key = ? AND parent_key = ?",
            )
            .bind(entity.kind.as_str())
            .bind(entity.name_key())
            .bind(&parent_key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ScoutError::storage)?;

            match existing {
                Some((id,)) => {
                    sqlx::query("UPDATE entities SET name = ? WHERE id = ?")
                        .bind(&entity.name)
                        .bind(&id)
                        .execute(&mut *tx)
                        .await
                        .map_err(ScoutError::storage)?;
                    counts.updated += 1;
                }
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO entities (id, kind, name, name_key, parent_entity, parent_key, status, created_at)
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(entity.id.to_string())
                    .bind(entity.kind.as_str())
                    .bind(&entity.name)
                    .bind(entity.name_key())
                    .bind(entity.parent_entity.map(|p| p.to_string()))
                    .bind(&parent_key)
                    .bind(entity.status.as_str())
                    .bind(entity.created_at.to_rfc3339())
                    .execute(&mut *tx)
                    .await
                    .map_err(ScoutError::storage)?;
                    counts.inserted += 1;
                }
            }
        }

        tx.commit().await.map_err(ScoutError::storage)?;
        Ok(counts)
    }

    async fn get_entity(&self, id: Uuid) -> Result<Option<Entity>> {
        let query = format!("SELECT {} FROM entities WHERE id = ?", ENTITY_COLUMNS);
        let row = sqlx::query_as::<_, EntityRow>(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(ScoutError::storage)?;

        row.map(|r| r.into_entity()).transpose()
    }

    async fn find_entity(&self, kind: Option<EntityKind>, name: &str) -> Result<Option<Entity>> {
        let query = format!(
            "SELECT {} FROM entities WHERE name_key = ?1 AND (?2 IS NULL OR kind = ?2)",
            ENTITY_COLUMNS
        );
        let rows = sqlx::query_as::<_, EntityRow>(&query)
            .bind(normalize_name(name))
            .bind(kind.map(|k| k.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(ScoutError::storage)?;

        let mut found = rows
            .into_iter()
            .map(|r| r.into_entity())
            .collect::<Result<Vec<_>>>()?;
        sort_entities(&mut found);
        Ok(found.into_iter().next())
    }

    async fn set_entity_status(&self, id: Uuid, status: EntityStatus) -> Result<()> {
        let result = sqlx::query("UPDATE entities SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(ScoutError::storage)?;

        if result.rows_affected() == 0 {
            return Err(ValidationError::UnknownEntity(id.to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl SiteStore for SqliteStore {
    async fn upsert_sites(&self, sites: &[ResolvedSite]) -> Result<()> {
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await.map_err(ScoutError::storage)?;

        for site in sites {
            sqlx::query(
                r#"
                INSERT INTO sites (id, entity_id, url, department_label, discovered_at, verified, shape)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    url = excluded.url,
                    department_label = excluded.department_label,
                    verified = excluded.verified,
                    shape = CASE WHEN excluded.shape = 'auto' THEN sites.shape ELSE excluded.shape END
                "#,
            )
            .bind(&site.id)
            .bind(site.entity_id.to_string())
            .bind(&site.url)
            .bind(&site.department_label)
            .bind(site.discovered_at.to_rfc3339())
            .bind(site.verified)
            .bind(site.shape.as_str())
            .execute(&mut *tx)
            .await
            .map_err(ScoutError::storage)?;
        }

        tx.commit().await.map_err(ScoutError::storage)?;
        Ok(())
    }

    async fn list_sites(&self, entity_id: Uuid) -> Result<Vec<ResolvedSite>> {
        let rows = sqlx::query_as::<_, SiteRow>(
            "SELECT id, entity_id, url, department_label, discovered_at, verified, shape FROM sites WHERE entity_id = ? ORDER BY url",
        )
        .bind(entity_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(ScoutError::storage)?;

        rows.into_iter().map(|r| r.into_site()).collect()
    }
}

#[async_trait]
impl BidStore for SqliteStore {
    async fn upsert_bid(&self, bid: &Bid) -> Result<UpsertOutcome> {
        // One statement: the revision tells a fresh row from an overwrite.
        let revision: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO bids (slug, client_name, client_kind, title, description, deadline, source_url, state, scraped_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET
                client_name = excluded.client_name,
                client_kind = excluded.client_kind,
                title = excluded.title,
                description = excluded.description,
                deadline = excluded.deadline,
                source_url = excluded.source_url,
                state = excluded.state,
                scraped_at = excluded.scraped_at,
                revision = bids.revision + 1
            RETURNING revision
            "#,
        )
        .bind(&bid.slug)
        .bind(&bid.client_name)
        .bind(bid.client_kind.as_str())
        .bind(&bid.title)
        .bind(&bid.description)
        .bind(bid.deadline.format("%Y-%m-%d").to_string())
        .bind(&bid.source_url)
        .bind(&bid.state)
        .bind(bid.scraped_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(ScoutError::storage)?;

        Ok(if revision == 0 {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn get_bid(&self, slug: &str) -> Result<Option<Bid>> {
        let query = format!("SELECT {} FROM bids WHERE slug = ?", BID_COLUMNS);
        let row = sqlx::query_as::<_, BidRow>(&query)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(ScoutError::storage)?;

        row.map(|r| r.into_bid()).transpose()
    }

    async fn list_bids(&self, filter: &BidFilter) -> Result<Vec<Bid>> {
        let query = format!(
            r#"
            SELECT {} FROM bids
            WHERE (?1 IS NULL OR lower(state) = lower(?1))
              AND (?2 IS NULL OR client_kind = ?2)
            ORDER BY deadline, slug
            "#,
            BID_COLUMNS
        );
        let rows = sqlx::query_as::<_, BidRow>(&query)
            .bind(filter.state.as_deref().map(str::trim))
            .bind(filter.kind.map(|k| k.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(ScoutError::storage)?;

        rows.into_iter().map(|r| r.into_bid()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::site::SiteShape;

    async fn test_store() -> SqliteStore {
        SqliteStore::in_memory().await.unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_entity_upsert_is_idempotent() {
        let store = test_store().await;
        let ct = Entity::new(EntityKind::State, "Connecticut");

        let counts = store.upsert_entities(&[ct.clone(), ct.clone()]).await.unwrap();
        assert_eq!(counts, UpsertCounts { inserted: 1, updated: 1 });

        let again = Entity::new(EntityKind::State, "CONNECTICUT");
        store.upsert_entities(&[again]).await.unwrap();

        let all = store.list_entities(&EntityFilter::new()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, ct.id);
        assert_eq!(all[0].name, "CONNECTICUT");
    }

    #[tokio::test]
    async fn test_same_name_under_different_parents() {
        let store = test_store().await;
        let ct = Entity::new(EntityKind::State, "Connecticut");
        let nh = Entity::new(EntityKind::State, "New Hampshire");
        let a = Entity::new(EntityKind::City, "Manchester").with_parent(ct.id);
        let b = Entity::new(EntityKind::City, "Manchester").with_parent(nh.id);

        let counts = store.upsert_entities(&[ct, nh.clone(), a, b]).await.unwrap();
        assert_eq!(counts.inserted, 4);

        let scoped = store
            .list_entities(
                &EntityFilter::new()
                    .with_state("new hampshire")
                    .with_kind(EntityKind::City),
            )
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].parent_entity, Some(nh.id));
    }

    #[tokio::test]
    async fn test_unknown_parent_and_entity() {
        let store = test_store().await;
        let orphan = Entity::new(EntityKind::Agency, "DOT").with_parent(Uuid::now_v7());
        assert!(store.upsert_entities(&[orphan]).await.is_err());
        assert!(store
            .set_entity_status(Uuid::now_v7(), EntityStatus::Failed)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_state_of_walks_parents() {
        let store = test_store().await;
        let ct = Entity::new(EntityKind::State, "Connecticut");
        let county = Entity::new(EntityKind::County, "Tolland County").with_parent(ct.id);
        let town = Entity::new(EntityKind::Town, "Mansfield").with_parent(county.id);
        store
            .upsert_entities(&[ct, county, town.clone()])
            .await
            .unwrap();

        let state = store.state_of(&town).await.unwrap().unwrap();
        assert_eq!(state.name, "Connecticut");

        let found = store
            .find_entity(Some(EntityKind::Town), "mansfield")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, town.id);
    }

    #[tokio::test]
    async fn test_site_upsert_keeps_learned_shape() {
        let store = test_store().await;
        let owner = Uuid::now_v7();
        let site = ResolvedSite::new(owner, "https://a.gov/bids", "Purchasing")
            .with_shape(SiteShape::Table);
        store.upsert_sites(&[site.clone()]).await.unwrap();

        let reverified = ResolvedSite::new(owner, "https://a.gov/bids/", "Purchasing")
            .with_verified(true);
        assert_eq!(reverified.id, site.id);
        store.upsert_sites(&[reverified]).await.unwrap();

        let sites = store.list_sites(owner).await.unwrap();
        assert_eq!(sites.len(), 1);
        assert!(sites[0].verified);
        assert_eq!(sites[0].shape, SiteShape::Table);
    }

    #[tokio::test]
    async fn test_concurrent_writers_on_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("scout.db").display());
        let store = std::sync::Arc::new(SqliteStore::new(&url).await.unwrap());

        let mut tasks = Vec::new();
        for worker in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let owner = Uuid::now_v7();
                for n in 0..50 {
                    let bid = Bid::new(
                        format!("Client {}", worker),
                        EntityKind::City,
                        format!("Project {}", n),
                        format!("https://w{}.gov/bids/{}", worker, n),
                        date(2025, 5, 1),
                    );
                    store.upsert_bid(&bid).await?;
                    // Every worker also rewrites one shared bid.
                    let shared = Bid::new("Shared", EntityKind::State, "Bridge", "https://s.gov/1", date(2025, 5, 1));
                    store.upsert_bid(&shared).await?;
                    let site = ResolvedSite::new(owner, format!("https://w{}.gov/p{}", worker, n), "Purchasing");
                    store.upsert_sites(&[site]).await?;
                    let state = Entity::new(EntityKind::State, format!("State {}", worker));
                    store.upsert_entities(&[state]).await?;
                }
                Ok::<_, ScoutError>(())
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let bids = store.list_bids(&BidFilter::new()).await.unwrap();
        assert_eq!(bids.len(), 8 * 50 + 1);
        let states = store.list_entities(&EntityFilter::new()).await.unwrap();
        assert_eq!(states.len(), 8);
    }

    #[tokio::test]
    async fn test_bid_upsert_and_filters() {
        let store = test_store().await;
        let first = Bid::new(
            "Hartford",
            EntityKind::City,
            "Roof Replacement",
            "https://hartford.gov/bids/1",
            date(2025, 5, 1),
        )
        .with_state("Connecticut");
        let refreshed = first.clone().with_description("Updated scope");
        let mut later = refreshed.clone();
        later.deadline = date(2025, 5, 20);

        assert_eq!(store.upsert_bid(&first).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert_bid(&later).await.unwrap(), UpsertOutcome::Updated);

        let state_bid = Bid::new(
            "Connecticut DAS",
            EntityKind::State,
            "Bridge Inspection",
            "https://portal.ct.gov/das/2",
            date(2025, 5, 10),
        )
        .with_state("Connecticut");
        store.upsert_bid(&state_bid).await.unwrap();

        let all = store
            .list_bids(&BidFilter::new().with_state("connecticut"))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].title, "Bridge Inspection");
        assert_eq!(all[1].deadline, date(2025, 5, 20));
        assert_eq!(all[1].description.as_deref(), Some("Updated scope"));

        let cities = store
            .list_bids(&BidFilter::new().with_kind(EntityKind::City))
            .await
            .unwrap();
        assert_eq!(cities.len(), 1);
        assert!(store.get_bid("missing").await.unwrap().is_none());
    }
}
