use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::expectation::{Expectation, ProcessingMode};
use crate::types::{BatchKey, ProducerCompletion, TriggerMessage};

/// Effect of folding one completion into a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    /// First completion for the producer.
    Inserted,
    /// The producer had reported before with different fields.
    Updated,
    /// Same completion as the one already folded.
    Unchanged,
}

/// Persisted completion-tracking state of one batch.
///
/// `triggered` moves from `false` to `true` at most once and never back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionState {
    pub batch_key: BatchKey,
    pub mode: ProcessingMode,
    pub completions: BTreeMap<String, ProducerCompletion>,
    pub expected_set: BTreeSet<String>,
    pub critical_set: BTreeSet<String>,
    pub triggered: bool,
    /// Whether the trigger went out with an expected producer missing.
    pub degraded: bool,
    /// Set by the deadline monitor to relax the expected-set requirement.
    pub degraded_authorized: bool,
    pub triggered_at: Option<DateTime<Utc>>,
    pub trigger_correlation_id: Option<String>,
    /// Earliest `completed_at` among the folded completions.
    pub first_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CompletionState {
    /// Creates the state of a batch that has not seen any completion yet.
    pub fn new(
        batch_key: BatchKey,
        expectation: Expectation,
        first_seen_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            batch_key,
            mode: expectation.mode,
            completions: BTreeMap::new(),
            expected_set: expectation.expected,
            critical_set: expectation.critical,
            triggered: false,
            degraded: false,
            degraded_authorized: false,
            triggered_at: None,
            trigger_correlation_id: None,
            first_seen_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// Upserts a producer completion.
    ///
    /// A later completion for the same producer overwrites the earlier one. Folding never
    /// changes `triggered`.
    pub fn fold(&mut self, completion: ProducerCompletion, now: DateTime<Utc>) -> FoldOutcome {
        if completion.completed_at < self.first_seen_at {
            self.first_seen_at = completion.completed_at;
        }

        let outcome = match self.completions.get(&completion.producer_name) {
            Some(existing) if *existing == completion => return FoldOutcome::Unchanged,
            Some(_) => FoldOutcome::Updated,
            None => FoldOutcome::Inserted,
        };

        self.completions
            .insert(completion.producer_name.clone(), completion);
        self.updated_at = now;

        outcome
    }

    /// Returns `true` when every critical producer reported success or partial.
    pub fn critical_satisfied(&self) -> bool {
        self.critical_set.iter().all(|producer| {
            self.completions
                .get(producer)
                .is_some_and(|completion| completion.status.satisfies_critical())
        })
    }

    /// Expected producers that have not reported yet.
    pub fn missing_expected(&self) -> Vec<String> {
        self.expected_set
            .iter()
            .filter(|producer| !self.completions.contains_key(*producer))
            .cloned()
            .collect()
    }

    /// Critical producers that have not reported success or partial.
    pub fn missing_critical(&self) -> Vec<String> {
        self.critical_set
            .iter()
            .filter(|producer| {
                !self
                    .completions
                    .get(*producer)
                    .is_some_and(|completion| completion.status.satisfies_critical())
            })
            .cloned()
            .collect()
    }

    pub fn all_expected_present(&self) -> bool {
        self.expected_set
            .iter()
            .all(|producer| self.completions.contains_key(producer))
    }

    /// Evaluates the gate condition of an untriggered batch.
    pub fn gate_met(&self) -> bool {
        !self.triggered
            && self.critical_satisfied()
            && (self.all_expected_present() || self.degraded_authorized)
    }

    /// Flips the batch to triggered and builds the downstream message.
    pub fn mark_triggered(
        &mut self,
        correlation_id: String,
        forced: bool,
        now: DateTime<Utc>,
    ) -> TriggerMessage {
        let missing_producers = self.missing_expected();

        self.triggered = true;
        self.degraded = !missing_producers.is_empty();
        self.triggered_at = Some(now);
        self.trigger_correlation_id = Some(correlation_id.clone());
        self.updated_at = now;

        TriggerMessage {
            stage_completed: self.batch_key.stage.clone(),
            logical_date: self.batch_key.logical_date,
            correlation_id,
            degraded: self.degraded,
            forced,
            completed_producers: self.completions.keys().cloned().collect(),
            missing_producers,
            triggered_at: now,
        }
    }
}
