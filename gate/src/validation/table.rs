use std::collections::BTreeMap;
use std::fmt;

use gate_config::shared::QualityTier;
use serde::Serialize;

use crate::chain::resolver::ChainStatus;

/// Status of a table, a chain, or a whole stage, as reported by validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Complete,
    Partial,
    Missing,
    /// Expected to be empty during the bootstrap window.
    BootstrapSkip,
    /// Not expected in this processing mode.
    NotApplicable,
    /// Could not be determined because a query failed or timed out.
    Error,
}

impl ValidationStatus {
    /// Whether the status counts as complete for scoring and exit codes.
    pub fn is_complete_equivalent(&self) -> bool {
        matches!(
            self,
            ValidationStatus::Complete
                | ValidationStatus::BootstrapSkip
                | ValidationStatus::NotApplicable
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Complete => "complete",
            ValidationStatus::Partial => "partial",
            ValidationStatus::Missing => "missing",
            ValidationStatus::BootstrapSkip => "bootstrap_skip",
            ValidationStatus::NotApplicable => "not_applicable",
            ValidationStatus::Error => "error",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ChainStatus> for ValidationStatus {
    fn from(status: ChainStatus) -> Self {
        match status {
            ChainStatus::Complete => ValidationStatus::Complete,
            ChainStatus::Partial => ValidationStatus::Partial,
            ChainStatus::Missing => ValidationStatus::Missing,
            ChainStatus::Timeout | ChainStatus::Error => ValidationStatus::Error,
        }
    }
}

/// Rows of a table per quality tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QualityDistribution {
    pub gold: u64,
    pub silver: u64,
    pub bronze: u64,
    /// Rows whose quality value is null or not a known tier.
    pub unknown: u64,
}

impl QualityDistribution {
    /// Builds a distribution from row counts grouped by quality column value.
    ///
    /// Values are matched case-insensitively against tier names.
    pub fn from_value_counts(value_counts: &BTreeMap<Option<String>, u64>) -> Self {
        let mut distribution = Self::default();

        for (value, count) in value_counts {
            let tier = value
                .as_deref()
                .and_then(|value| match value.trim().to_ascii_lowercase().as_str() {
                    "gold" => Some(QualityTier::Gold),
                    "silver" => Some(QualityTier::Silver),
                    "bronze" => Some(QualityTier::Bronze),
                    _ => None,
                });

            match tier {
                Some(QualityTier::Gold) => distribution.gold += count,
                Some(QualityTier::Silver) => distribution.silver += count,
                Some(QualityTier::Bronze) => distribution.bronze += count,
                None => distribution.unknown += count,
            }
        }

        distribution
    }

    pub fn total(&self) -> u64 {
        self.gold + self.silver + self.bronze + self.unknown
    }
}

/// Validation of one producer's output table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableValidation {
    /// Canonical name of the producer writing the table.
    pub name: String,
    pub table: String,
    /// `None` when the table was not queried or the query failed.
    pub record_count: Option<u64>,
    pub expected_count: Option<u64>,
    pub status: ValidationStatus,
    pub quality: Option<QualityDistribution>,
    pub error: Option<String>,
}

/// Derives the status of a counted table.
///
/// Without an expected count any row makes the table complete. With one, the table is complete
/// once it holds `completeness_ratio` of the expected rows.
pub fn table_status(
    record_count: u64,
    expected_count: Option<u64>,
    completeness_ratio: f64,
) -> ValidationStatus {
    if record_count == 0 {
        return ValidationStatus::Missing;
    }

    match expected_count {
        Some(expected) if (record_count as f64) < (expected as f64) * completeness_ratio => {
            ValidationStatus::Partial
        }
        _ => ValidationStatus::Complete,
    }
}
