//! Aggregation of table and chain statuses into stage verdicts and progress.

use std::collections::BTreeMap;

use gate_config::shared::ValidationConfig;

use crate::validation::table::ValidationStatus;

/// One table or chain contributing to a stage's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constituent {
    pub status: ValidationStatus,
    pub record_count: u64,
}

impl Constituent {
    pub fn new(status: ValidationStatus, record_count: u64) -> Self {
        Self {
            status,
            record_count,
        }
    }
}

/// Which progress weight table applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightSet {
    Regular,
    Bootstrap,
}

/// Stage score as used by progress computation.
#[derive(Debug, Clone, PartialEq)]
pub struct StageScore {
    pub stage: String,
    /// Fraction of the stage that is done, in `[0, 1]`.
    pub score: f64,
}

/// Combines statuses into stage verdicts and cross-stage progress.
#[derive(Debug, Clone)]
pub struct PhaseStatusAggregator {
    partial_credit: f64,
    regular_weights: BTreeMap<String, f64>,
    bootstrap_weights: BTreeMap<String, f64>,
}

impl PhaseStatusAggregator {
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            partial_credit: config.thresholds.partial_credit,
            regular_weights: config.progress.regular.clone(),
            bootstrap_weights: config.progress.bootstrap.clone(),
        }
    }

    /// Derives a stage status from its constituents.
    ///
    /// Rules, first match wins:
    /// - no constituents: `not_applicable`
    /// - any `error`: `error`
    /// - all `bootstrap_skip`: `bootstrap_skip`
    /// - all `not_applicable`: `not_applicable`
    /// - all complete, `bootstrap_skip` or `not_applicable`: `complete`
    /// - all `missing`: `missing`
    /// - any rows: `partial`
    /// - otherwise `missing`
    pub fn aggregate(constituents: &[Constituent]) -> ValidationStatus {
        if constituents.is_empty() {
            return ValidationStatus::NotApplicable;
        }

        let all = |status: ValidationStatus| constituents.iter().all(|c| c.status == status);

        if constituents
            .iter()
            .any(|c| c.status == ValidationStatus::Error)
        {
            ValidationStatus::Error
        } else if all(ValidationStatus::BootstrapSkip) {
            ValidationStatus::BootstrapSkip
        } else if all(ValidationStatus::NotApplicable) {
            ValidationStatus::NotApplicable
        } else if constituents
            .iter()
            .all(|c| c.status.is_complete_equivalent())
        {
            ValidationStatus::Complete
        } else if all(ValidationStatus::Missing) {
            ValidationStatus::Missing
        } else if constituents.iter().any(|c| c.record_count > 0) {
            ValidationStatus::Partial
        } else {
            ValidationStatus::Missing
        }
    }

    /// Fraction of a stage that is done.
    ///
    /// Complete-equivalent constituents count fully and partial ones count `partial_credit`.
    /// A stage without constituents is done.
    pub fn stage_score(&self, constituents: &[Constituent]) -> f64 {
        if constituents.is_empty() {
            return 1.0;
        }

        let credit: f64 = constituents
            .iter()
            .map(|c| match c.status {
                status if status.is_complete_equivalent() => 1.0,
                ValidationStatus::Partial => self.partial_credit,
                _ => 0.0,
            })
            .sum();

        credit / constituents.len() as f64
    }

    /// Weighted completion percentage over the evaluated stages.
    ///
    /// Stages without a weight in the selected table are excluded and the remaining weights are
    /// renormalized. When no evaluated stage has a weight, the plain mean is used.
    pub fn progress(&self, scores: &[StageScore], weight_set: WeightSet) -> f64 {
        if scores.is_empty() {
            return 0.0;
        }

        let weights = match weight_set {
            WeightSet::Regular => &self.regular_weights,
            WeightSet::Bootstrap => &self.bootstrap_weights,
        };

        let weighted: Vec<(f64, f64)> = scores
            .iter()
            .filter_map(|score| {
                weights
                    .get(&score.stage)
                    .map(|weight| (*weight, score.score))
            })
            .collect();
        let total_weight: f64 = weighted.iter().map(|(weight, _)| weight).sum();

        let fraction = if total_weight > 0.0 {
            weighted
                .iter()
                .map(|(weight, score)| weight / total_weight * score)
                .sum()
        } else {
            scores.iter().map(|score| score.score).sum::<f64>() / scores.len() as f64
        };

        (fraction * 100.0).clamp(0.0, 100.0)
    }
}
