//! Registry entities: the governmental units that may publish RFPs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ValidationError;

/// Kind of governmental/organizational unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    State,
    County,
    City,
    Town,
    Agency,
    University,
}

impl EntityKind {
    /// All kinds in listing order.
    pub const ALL: [EntityKind; 6] = [
        Self::State,
        Self::County,
        Self::City,
        Self::Town,
        Self::Agency,
        Self::University,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::State => "state",
            Self::County => "county",
            Self::City => "city",
            Self::Town => "town",
            Self::Agency => "agency",
            Self::University => "university",
        }
    }

    /// Sort rank used by `list_entities`.
    pub fn rank(&self) -> u8 {
        match self {
            Self::State => 0,
            Self::County => 1,
            Self::City => 2,
            Self::Town => 3,
            Self::Agency => 4,
            Self::University => 5,
        }
    }

    /// Whether this kind is a local jurisdiction (county, city, town).
    pub fn is_local(&self) -> bool {
        matches!(self, Self::County | Self::City | Self::Town)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == lowered)
            .ok_or_else(|| ValidationError::UnknownKind(s.to_string()))
    }
}

/// Resolution status of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    #[default]
    Pending,
    Resolved,
    Failed,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "failed" => Ok(Self::Failed),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

/// A governmental or organizational unit that may issue RFPs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub kind: EntityKind,
    pub name: String,
    /// Parent in the hierarchy (e.g. the state a city belongs to)
    pub parent_entity: Option<Uuid>,
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
}

impl Entity {
    /// Create a new pending entity with a fresh id.
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            name: name.into().trim().to_string(),
            parent_entity: None,
            status: EntityStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Set the parent entity.
    pub fn with_parent(mut self, parent: Uuid) -> Self {
        self.parent_entity = Some(parent);
        self
    }

    /// Reject entities whose name is empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        Ok(())
    }

    /// Normalized name used for idempotent upserts.
    pub fn name_key(&self) -> String {
        normalize_name(&self.name)
    }

    /// Identity used by upsert: (kind, normalized name, parent).
    pub fn natural_key(&self) -> (EntityKind, String, Option<Uuid>) {
        (self.kind, self.name_key(), self.parent_entity)
    }
}

/// Trim, collapse inner whitespace, and lowercase.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Filter for `list_entities`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityFilter {
    /// Only entities of this kind
    pub kind: Option<EntityKind>,

    /// Only the named state and its descendants (case-insensitive)
    pub state: Option<String>,

    /// Only entities in this status
    pub status: Option<EntityStatus>,
}

impl EntityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: EntityKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_status(mut self, status: EntityStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Result of `upsert_entities`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertCounts {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Sort entities the way every store lists them.
pub fn sort_entities(entities: &mut [Entity]) {
    entities.sort_by(|a, b| {
        a.kind
            .rank()
            .cmp(&b.kind.rank())
            .then_with(|| a.name_key().cmp(&b.name_key()))
            .then_with(|| a.id.cmp(&b.id))
    });
}
