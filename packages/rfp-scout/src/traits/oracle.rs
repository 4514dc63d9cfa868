//! Semantic oracle trait.
//!
//! The oracle abstracts the judgment calls the pipeline cannot make on its
//! own:
//! - Proposing procurement URLs for an entity (Site Resolver)
//! - Reading opportunities out of unstructured page text (Deep Scanner)
//! - Classifying candidate text as construction-related (Relevance Filter)
//!
//! It is fallible, rate limited and possibly slow. Callers wrap every call
//! in a timeout and treat failure as a reject.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::OracleResult;
use crate::types::entity::EntityKind;

/// A site lookup request for one department of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteQuery {
    pub entity_name: String,
    pub entity_kind: EntityKind,
    /// Name of the state the entity sits in, if known
    pub state: Option<String>,
    /// Department to look for (e.g. "Public Works")
    pub department: String,
}

impl SiteQuery {
    pub fn new(
        entity_name: impl Into<String>,
        entity_kind: EntityKind,
        department: impl Into<String>,
    ) -> Self {
        Self {
            entity_name: entity_name.into(),
            entity_kind,
            state: None,
            department: department.into(),
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Human-readable description used in prompts and logs.
    pub fn describe(&self) -> String {
        match &self.state {
            Some(state) if !state.eq_ignore_ascii_case(&self.entity_name) => format!(
                "{} ({}, {}) - {}",
                self.entity_name, self.entity_kind, state, self.department
            ),
            _ => format!(
                "{} ({}) - {}",
                self.entity_name, self.entity_kind, self.department
            ),
        }
    }
}

/// A URL the oracle believes lists opportunities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteProposal {
    pub url: String,
    /// Department label for the resolved site
    pub label: String,
    /// Oracle's own ranking weight (higher first)
    #[serde(default)]
    pub confidence: f32,
}

impl SiteProposal {
    pub fn new(url: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            label: label.into(),
            confidence: 0.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Category assigned to candidate text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Construction,
    Architecture,
    Engineering,
    Other(String),
}

impl Category {
    /// Construction, architecture and engineering are the accepted categories.
    pub fn is_construction_related(&self) -> bool {
        matches!(
            self,
            Self::Construction | Self::Architecture | Self::Engineering
        )
    }

    /// Map a free-form label to a category.
    pub fn from_label(label: &str) -> Self {
        let lowered = label.trim().to_lowercase();
        match lowered.as_str() {
            "construction" => Self::Construction,
            "architecture" | "architectural" => Self::Architecture,
            "engineering" => Self::Engineering,
            _ => Self::Other(lowered),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Construction => f.write_str("construction"),
            Self::Architecture => f.write_str("architecture"),
            Self::Engineering => f.write_str("engineering"),
            Self::Other(label) => f.write_str(label),
        }
    }
}

/// Classification verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    /// 0.0 to 1.0
    pub confidence: f32,
}

impl Classification {
    pub fn new(category: Category, confidence: f32) -> Self {
        Self {
            category,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn is_construction_related(&self) -> bool {
        self.category.is_construction_related()
    }
}

/// An opportunity the oracle read out of a page's text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractedOpportunity {
    pub title: String,
    /// Deadline as the oracle reported it, usually `YYYY-MM-DD`
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ExtractedOpportunity {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_deadline(mut self, deadline: impl Into<String>) -> Self {
        self.deadline = Some(deadline.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Semantic lookup, extraction and classification capability.
#[async_trait]
pub trait SemanticOracle: Send + Sync {
    /// Propose ranked candidate URLs for an entity department.
    async fn propose(&self, query: &SiteQuery) -> OracleResult<Vec<SiteProposal>>;

    /// Read construction opportunities out of a page's visible text.
    ///
    /// An empty list means the page lists nothing relevant.
    async fn extract_opportunities(&self, text: &str) -> OracleResult<Vec<ExtractedOpportunity>>;

    /// Classify title plus excerpt text.
    async fn classify(&self, text: &str) -> OracleResult<Classification>;

    /// Oracle name (for logging/debugging).
    fn name(&self) -> &str {
        "unknown"
    }
}

#[async_trait]
impl<T: SemanticOracle + ?Sized> SemanticOracle for std::sync::Arc<T> {
    async fn propose(&self, query: &SiteQuery) -> OracleResult<Vec<SiteProposal>> {
        (**self).propose(query).await
    }

    async fn extract_opportunities(&self, text: &str) -> OracleResult<Vec<ExtractedOpportunity>> {
        (**self).extract_opportunities(text).await
    }

    async fn classify(&self, text: &str) -> OracleResult<Classification> {
        (**self).classify(text).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_relevance() {
        assert!(Category::Construction.is_construction_related());
        assert!(Category::from_label("Architectural").is_construction_related());
        assert!(Category::from_label(" ENGINEERING ").is_construction_related());
        assert!(!Category::from_label("IT Services").is_construction_related());
        assert_eq!(
            Category::from_label("IT Services"),
            Category::Other("it services".into())
        );
    }

    #[test]
    fn test_confidence_clamped() {
        let c = Classification::new(Category::Construction, 1.7);
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn test_query_description() {
        let query = SiteQuery::new("Hartford", EntityKind::City, "Public Works")
            .with_state("Connecticut");
        assert_eq!(query.describe(), "Hartford (city, Connecticut) - Public Works");

        let state = SiteQuery::new("Connecticut", EntityKind::State, "Procurement")
            .with_state("Connecticut");
        assert_eq!(state.describe(), "Connecticut (state) - Procurement");
    }
}
