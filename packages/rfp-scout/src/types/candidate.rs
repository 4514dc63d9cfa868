//! Ephemeral pipeline records: candidates, verification results, decisions.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An unverified, unfiltered opportunity extracted from a site.
///
/// Every field is best-effort. Missing values are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub source_site_id: String,
    pub title: String,
    /// Detail link, already resolved against the page it was found on
    pub raw_link: String,
    pub raw_deadline_text: String,
    #[serde(default)]
    pub raw_metadata: BTreeMap<String, String>,
}

impl Candidate {
    pub fn new(source_site_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source_site_id: source_site_id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.raw_link = link.into();
        self
    }

    pub fn with_deadline_text(mut self, text: impl Into<String>) -> Self {
        self.raw_deadline_text = text.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.raw_metadata.insert(key.into(), value.into());
        self
    }

    /// Key used to drop duplicate candidates within one entity.
    pub fn dedup_key(&self) -> (String, String) {
        (
            self.raw_link.trim().to_string(),
            self.title.split_whitespace().collect::<Vec<_>>().join(" "),
        )
    }
}

/// Outcome class of a page load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    Ok,
    ClientError,
    ServerError,
    NetworkFailure,
}

impl StatusCategory {
    /// Classify an HTTP status code.
    ///
    /// Redirects that were not followed and 1xx codes count as client
    /// errors: there is no page to read.
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Ok,
            500..=599 => Self::ServerError,
            _ => Self::ClientError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
            Self::NetworkFailure => "network_failure",
        }
    }
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of loading a candidate's detail link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub reachable: bool,
    pub status_category: StatusCategory,
    /// HTTP status when a response was received
    pub http_status: Option<u16>,
    pub final_url: Option<String>,
    /// Visible page text, only populated for `ok` results
    pub excerpt: String,
}

impl VerificationResult {
    pub fn ok(status: u16, final_url: impl Into<String>, excerpt: impl Into<String>) -> Self {
        Self {
            reachable: true,
            status_category: StatusCategory::Ok,
            http_status: Some(status),
            final_url: Some(final_url.into()),
            excerpt: excerpt.into(),
        }
    }

    /// A failed load. `reachable` is always false.
    pub fn rejected(category: StatusCategory, http_status: Option<u16>) -> Self {
        Self {
            reachable: false,
            status_category: category,
            http_status,
            final_url: None,
            excerpt: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.reachable && self.status_category == StatusCategory::Ok
    }
}

/// Why a candidate was accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Accepted,
    NotRelevant,
    ClassificationUnavailable,
    DeadlineUnparseable,
    DeadlineTooSoon,
    /// Link verification failed; carries no oracle call
    Unreachable,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::NotRelevant => "not_relevant",
            Self::ClassificationUnavailable => "classification_unavailable",
            Self::DeadlineUnparseable => "deadline_unparseable",
            Self::DeadlineTooSoon => "deadline_too_soon",
            Self::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter verdict for one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub accept: bool,
    pub reason: DecisionReason,
    /// Parsed deadline, when parsing succeeded
    pub deadline: Option<NaiveDate>,
}

impl Decision {
    pub fn accept(deadline: NaiveDate) -> Self {
        Self {
            accept: true,
            reason: DecisionReason::Accepted,
            deadline: Some(deadline),
        }
    }

    pub fn reject(reason: DecisionReason, deadline: Option<NaiveDate>) -> Self {
        Self {
            accept: false,
            reason,
            deadline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(StatusCategory::from_status(200), StatusCategory::Ok);
        assert_eq!(StatusCategory::from_status(204), StatusCategory::Ok);
        assert_eq!(StatusCategory::from_status(404), StatusCategory::ClientError);
        assert_eq!(StatusCategory::from_status(410), StatusCategory::ClientError);
        assert_eq!(StatusCategory::from_status(503), StatusCategory::ServerError);
        assert_eq!(StatusCategory::from_status(301), StatusCategory::ClientError);
    }

    #[test]
    fn test_reason_labels() {
        assert_eq!(
            DecisionReason::ClassificationUnavailable.to_string(),
            "classification_unavailable"
        );
        assert_eq!(
            serde_json::to_string(&DecisionReason::DeadlineTooSoon).unwrap(),
            "\"deadline_too_soon\""
        );
    }

    #[test]
    fn test_dedup_key_collapses_whitespace() {
        let a = Candidate::new("s", "Roof  Replacement").with_link("https://a.gov/1");
        let b = Candidate::new("s", "Roof Replacement ").with_link(" https://a.gov/1");
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn test_rejected_is_never_reachable() {
        let result = VerificationResult::rejected(StatusCategory::ServerError, Some(500));
        assert!(!result.reachable);
        assert!(!result.is_ok());
    }
}
