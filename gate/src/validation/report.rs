use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::chain::resolver::{ChainStatus, ChainValidation};
use crate::expectation::ProcessingMode;
use crate::validation::table::{TableValidation, ValidationStatus};

/// An issue or warning raised during validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    /// Stage the finding belongs to. `None` for chains, which may be shared between stages.
    pub stage: Option<String>,
    /// Table, chain or source the finding is about.
    pub subject: String,
    pub message: String,
}

/// Validation of one stage on one date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseValidationResult {
    pub stage: String,
    pub mode: ProcessingMode,
    pub tables: BTreeMap<String, TableValidation>,
    /// Statuses of the chains the stage depends on.
    pub chains: BTreeMap<String, ValidationStatus>,
    pub status: ValidationStatus,
    pub total_records: u64,
    /// Fraction of the stage that is done, in `[0, 1]`.
    pub score: f64,
}

/// Validation of every requested stage on one date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateReport {
    pub date: NaiveDate,
    /// Whether the bootstrap progress weights were used.
    pub bootstrap_weights: bool,
    pub phases: Vec<PhaseValidationResult>,
    pub chains: BTreeMap<String, ChainValidation>,
    pub progress_percent: f64,
    pub issues: Vec<Finding>,
    pub warnings: Vec<Finding>,
}

impl DateReport {
    /// Whether any stage or chain could not be determined.
    pub fn has_errors(&self) -> bool {
        self.phases
            .iter()
            .any(|phase| phase.status == ValidationStatus::Error)
            || self
                .chains
                .values()
                .any(|chain| matches!(chain.status, ChainStatus::Timeout | ChainStatus::Error))
    }

    /// Whether every stage is complete or equivalent.
    pub fn is_complete(&self) -> bool {
        self.phases
            .iter()
            .all(|phase| phase.status.is_complete_equivalent())
    }
}

/// Overall outcome of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// Every evaluated stage is complete or equivalent.
    Complete,
    /// Some data is partial or missing.
    Incomplete,
    /// A query failed or timed out, so completeness is unknown.
    Error,
}

impl ValidationOutcome {
    /// Process exit code of the outcome.
    pub fn exit_code(&self) -> u8 {
        match self {
            ValidationOutcome::Complete => 0,
            ValidationOutcome::Incomplete => 1,
            ValidationOutcome::Error => 2,
        }
    }
}

/// Result of a validation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub generated_at: DateTime<Utc>,
    pub dates: Vec<DateReport>,
    pub outcome: ValidationOutcome,
}

impl ValidationReport {
    pub fn new(generated_at: DateTime<Utc>, dates: Vec<DateReport>) -> Self {
        let outcome = if dates.iter().any(DateReport::has_errors) {
            ValidationOutcome::Error
        } else if dates.iter().all(DateReport::is_complete) {
            ValidationOutcome::Complete
        } else {
            ValidationOutcome::Incomplete
        };

        Self {
            generated_at,
            dates,
            outcome,
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.outcome.exit_code()
    }
}
