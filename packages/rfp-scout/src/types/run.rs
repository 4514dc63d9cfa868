//! Run accounting: per-entity reports folded into a run summary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::bid::UpsertOutcome;
use super::candidate::DecisionReason;

/// An entity that ended the run in `failed` status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntity {
    pub id: Uuid,
    pub name: String,
    pub error: String,
}

/// Counters produced by one entity's chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityReport {
    pub sites_resolved: usize,
    pub sites_verified: usize,
    pub discovered: usize,
    pub verified: usize,
    pub classified: usize,
    pub inserted: usize,
    pub updated: usize,
    pub rejects: BTreeMap<DecisionReason, usize>,
    /// Set when the entity's resolution failed
    pub failure: Option<FailedEntity>,
}

impl EntityReport {
    pub fn record_reject(&mut self, reason: DecisionReason) {
        *self.rejects.entry(reason).or_default() += 1;
    }

    pub fn record_stored(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
        }
    }

    pub fn failed(id: Uuid, name: impl Into<String>, error: impl ToString) -> Self {
        Self {
            failure: Some(FailedEntity {
                id,
                name: name.into(),
                error: error.to_string(),
            }),
            ..Default::default()
        }
    }
}

/// Stored bid counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCounts {
    pub inserted: usize,
    pub updated: usize,
}

/// Completion summary of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub entities_processed: usize,
    pub sites_resolved: usize,
    pub sites_verified: usize,
    /// Candidates extracted
    pub discovered: usize,
    /// Candidates whose link loaded
    pub verified: usize,
    /// Candidates accepted by the filter
    pub classified: usize,
    pub stored: StoredCounts,
    pub rejects: BTreeMap<DecisionReason, usize>,
    pub failed_entities: Vec<FailedEntity>,
    /// Whether the run stopped early on cancellation
    pub cancelled: bool,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one entity's report into the summary.
    pub fn absorb(&mut self, report: EntityReport) {
        self.entities_processed += 1;
        self.sites_resolved += report.sites_resolved;
        self.sites_verified += report.sites_verified;
        self.discovered += report.discovered;
        self.verified += report.verified;
        self.classified += report.classified;
        self.stored.inserted += report.inserted;
        self.stored.updated += report.updated;
        for (reason, count) in report.rejects {
            *self.rejects.entry(reason).or_default() += count;
        }
        if let Some(failure) = report.failure {
            self.failed_entities.push(failure);
        }
    }

    /// Total bids written.
    pub fn stored_total(&self) -> usize {
        self.stored.inserted + self.stored.updated
    }

    pub fn rejected_total(&self) -> usize {
        self.rejects.values().sum()
    }
}
