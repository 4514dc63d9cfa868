//! Persisted bid records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::entity::EntityKind;

/// A verified, relevant, actionable RFP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    /// Unique key, see [`bid_slug`]
    pub slug: String,
    pub client_name: String,
    /// Kind of the issuing entity
    pub client_kind: EntityKind,
    pub title: String,
    /// Full extracted text of the detail page
    pub description: Option<String>,
    pub deadline: NaiveDate,
    pub source_url: String,
    /// Name of the state the issuing entity belongs to
    pub state: String,
    pub scraped_at: DateTime<Utc>,
}

impl Bid {
    /// Build a bid, deriving its slug.
    pub fn new(
        client_name: impl Into<String>,
        client_kind: EntityKind,
        title: impl Into<String>,
        source_url: impl Into<String>,
        deadline: NaiveDate,
    ) -> Self {
        let client_name = client_name.into();
        let title = title.into();
        let source_url = source_url.into();
        Self {
            slug: bid_slug(&client_name, &title, &source_url),
            client_name,
            client_kind,
            title,
            description: None,
            deadline,
            source_url,
            state: String::new(),
            scraped_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.description = (!description.trim().is_empty()).then_some(description);
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }

    pub fn with_scraped_at(mut self, at: DateTime<Utc>) -> Self {
        self.scraped_at = at;
        self
    }
}

/// Deterministic slug from (client name, title, source URL).
///
/// Each part is trimmed, whitespace-collapsed and lowercased so the same
/// posting scraped in different runs collides to one record.
pub fn bid_slug(client_name: &str, title: &str, source_url: &str) -> String {
    let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalize(client_name).as_bytes());
    hasher.update(b"|");
    hasher.update(normalize(title).as_bytes());
    hasher.update(b"|");
    hasher.update(normalize(source_url).as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Filter for `list_bids`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BidFilter {
    /// Only bids in this state (case-insensitive)
    pub state: Option<String>,

    /// Only bids issued by entities of this kind
    pub kind: Option<EntityKind>,
}

impl BidFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_kind(mut self, kind: EntityKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn matches(&self, bid: &Bid) -> bool {
        if let Some(state) = &self.state {
            if !bid.state.eq_ignore_ascii_case(state.trim()) {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if bid.client_kind != kind {
                return false;
            }
        }
        true
    }
}

/// Result of `upsert_bid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Order bids the way every store lists them: deadline, then slug.
pub fn sort_bids(bids: &mut [Bid]) {
    bids.sort_by(|a, b| a.deadline.cmp(&b.deadline).then_with(|| a.slug.cmp(&b.slug)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_slug_ignores_case_and_spacing() {
        let a = bid_slug("City of Hartford", "Roof Replacement", "https://hartford.gov/bids/1");
        let b = bid_slug(" city of  hartford", "ROOF REPLACEMENT", "https://hartford.gov/bids/1 ");
        assert_eq!(a, b);
        assert_ne!(a, bid_slug("City of Hartford", "Roof Repair", "https://hartford.gov/bids/1"));
    }

    #[test]
    fn test_empty_description_is_none() {
        let bid = Bid::new("X", EntityKind::City, "T", "https://x.gov", date(2025, 5, 1))
            .with_description("   ");
        assert!(bid.description.is_none());
    }

    #[test]
    fn test_filter_matches_state_and_kind() {
        let bid = Bid::new("Hartford", EntityKind::City, "T", "https://x.gov", date(2025, 5, 1))
            .with_state("Connecticut");
        assert!(BidFilter::new().matches(&bid));
        assert!(BidFilter::new().with_state("connecticut").matches(&bid));
        assert!(!BidFilter::new().with_state("Texas").matches(&bid));
        assert!(!BidFilter::new().with_kind(EntityKind::State).matches(&bid));
    }

    fn noisy(s: &str) -> String {
        format!("  {}\t", s.to_uppercase().replace(' ', "   "))
    }

    proptest! {
        #[test]
        fn slug_ignores_case_and_spacing(
            client in "[A-Za-z]{1,12}( [A-Za-z]{1,12}){0,3}",
            title in "[A-Za-z0-9]{1,12}( [A-Za-z0-9-]{1,12}){0,5}",
            path in "[a-z0-9]{1,20}",
        ) {
            let url = format!("https://city.gov/bids/{}", path);
            let slug = bid_slug(&client, &title, &url);
            prop_assert_eq!(&slug, &bid_slug(&noisy(&client), &noisy(&title), &noisy(&url)));
            prop_assert_eq!(slug.len(), 32);
        }

        #[test]
        fn slug_separates_different_postings(
            a in "[a-z]{1,20}",
            b in "[a-z]{1,20}",
            path in "[a-z0-9]{1,20}",
        ) {
            prop_assume!(a != b);
            let url = format!("https://city.gov/bids/{}", path);
            prop_assert_ne!(bid_slug("Hartford", &a, &url), bid_slug("Hartford", &b, &url));
            prop_assert_ne!(bid_slug(&a, "Roof", &url), bid_slug(&b, "Roof", &url));
            prop_assert_ne!(
                bid_slug("Hartford", "Roof", &format!("{}/{}", url, a)),
                bid_slug("Hartford", "Roof", &format!("{}/{}", url, b))
            );
        }
    }
}
