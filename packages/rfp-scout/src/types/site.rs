//! Resolved procurement sites.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ValidationError;

/// Structural family of a listing page.
///
/// Picks the extractor used by the Listing Crawler. `Auto` tries each
/// structured extractor in turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteShape {
    #[default]
    Auto,
    Table,
    Cards,
    Links,
}

impl SiteShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Table => "table",
            Self::Cards => "cards",
            Self::Links => "links",
        }
    }
}

impl fmt::Display for SiteShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SiteShape {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "table" => Ok(Self::Table),
            "cards" => Ok(Self::Cards),
            "links" => Ok(Self::Links),
            other => Err(ValidationError::UnknownShape(other.to_string())),
        }
    }
}

/// A web location believed to list an entity's opportunities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSite {
    /// Deterministic id, see [`site_id`]
    pub id: String,

    /// Owning entity
    pub entity_id: Uuid,

    /// Listing URL
    pub url: String,

    /// Department the oracle proposed this URL for (e.g. "Public Works")
    pub department_label: String,

    pub discovered_at: DateTime<Utc>,

    /// Whether the reachability check succeeded
    pub verified: bool,

    #[serde(default)]
    pub shape: SiteShape,
}

impl ResolvedSite {
    /// Create an unverified site for an entity.
    pub fn new(
        entity_id: Uuid,
        url: impl Into<String>,
        department_label: impl Into<String>,
    ) -> Self {
        let url = url.into();
        Self {
            id: site_id(entity_id, &url),
            entity_id,
            url,
            department_label: department_label.into(),
            discovered_at: Utc::now(),
            verified: false,
            shape: SiteShape::Auto,
        }
    }

    pub fn with_verified(mut self, verified: bool) -> Self {
        self.verified = verified;
        self
    }

    pub fn with_shape(mut self, shape: SiteShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_discovered_at(mut self, at: DateTime<Utc>) -> Self {
        self.discovered_at = at;
        self
    }

    /// Scheme + host of the listing URL.
    pub fn root_url(&self) -> Option<String> {
        crate::pipeline::urls::root_url(&self.url)
    }
}

/// Deterministic site id from the owning entity and the normalized URL.
///
/// Re-resolving an entity therefore re-verifies existing rows instead of
/// adding duplicates.
pub fn site_id(entity_id: Uuid, url: &str) -> String {
    let normalized =
        crate::pipeline::urls::canonical_url(url).unwrap_or_else(|| url.trim().to_lowercase());
    let mut hasher = Sha256::new();
    hasher.update(entity_id.as_bytes());
    hasher.update(b"|");
    hasher.update(normalized.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_id_is_stable_across_trivial_url_variants() {
        let entity = Uuid::now_v7();
        let a = site_id(entity, "https://www.ct.gov/das/bids/");
        let b = site_id(entity, "https://www.CT.gov/das/bids#top");
        assert_eq!(a, b);
        assert_ne!(a, site_id(Uuid::now_v7(), "https://www.ct.gov/das/bids/"));
    }

    #[test]
    fn test_root_url() {
        let site = ResolvedSite::new(Uuid::now_v7(), "https://portal.ct.gov/das/bids?x=1", "");
        assert_eq!(site.root_url().as_deref(), Some("https://portal.ct.gov"));
        assert!(!site.verified);
        assert_eq!(site.shape, SiteShape::Auto);
    }

    #[test]
    fn test_shape_parse() {
        assert_eq!("Table".parse::<SiteShape>().unwrap(), SiteShape::Table);
        assert!("grid".parse::<SiteShape>().is_err());
    }
}
