//! Relevance & Deadline Filter.
//!
//! Deadline first: a candidate already out of the window never costs an
//! oracle call. Oracle failure is a reject, never an accept.

use chrono::NaiveDate;
use std::time::Duration;
use tracing::{debug, warn};

use super::call_oracle;
use super::deadline::{is_actionable, parse_deadline};
use crate::traits::oracle::SemanticOracle;
use crate::types::candidate::{Candidate, Decision, DecisionReason};

/// Decides whether a verified candidate becomes a bid.
pub struct RelevanceFilter<O> {
    oracle: O,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
}

impl<O: SemanticOracle> RelevanceFilter<O> {
    pub fn new(oracle: O) -> Self {
        Self {
            oracle,
            timeout: Duration::from_secs(30),
            retries: 1,
            backoff: Duration::from_secs(2),
        }
    }

    /// Per-call oracle timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extra attempts after a failed classification, and the wait between.
    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.backoff = backoff;
        self
    }

    /// Judge one candidate. `excerpt` is the verified page's visible text.
    pub async fn classify(&self, candidate: &Candidate, excerpt: &str, today: NaiveDate) -> Decision {
        let deadline = match parse_deadline(&candidate.raw_deadline_text) {
            Ok(deadline) => deadline,
            Err(_) => return Decision::reject(DecisionReason::DeadlineUnparseable, None),
        };
        if !is_actionable(deadline, today) {
            return Decision::reject(DecisionReason::DeadlineTooSoon, Some(deadline));
        }

        let text = if excerpt.trim().is_empty() {
            candidate.title.clone()
        } else {
            format!("{}\n\n{}", candidate.title, excerpt)
        };

        let verdict = call_oracle(self.timeout, self.retries, self.backoff, || {
            self.oracle.classify(&text)
        })
        .await;

        match verdict {
            Ok(c) if c.is_construction_related() => {
                debug!(title = %candidate.title, category = %c.category, confidence = c.confidence, "Candidate accepted");
                Decision::accept(deadline)
            }
            Ok(c) => {
                debug!(title = %candidate.title, category = %c.category, "Candidate not construction-related");
                Decision::reject(DecisionReason::NotRelevant, Some(deadline))
            }
            Err(e) => {
                warn!(title = %candidate.title, error = %e, "Classification unavailable");
                Decision::reject(DecisionReason::ClassificationUnavailable, Some(deadline))
            }
        }
    }
}
