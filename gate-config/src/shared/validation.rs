use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Configuration of on-demand stage validation.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ValidationConfig {
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub progress: ProgressWeightsConfig,
    /// Maximum number of dates validated concurrently within one request.
    ///
    /// Default: 4
    #[serde(default = "default_max_concurrent_dates")]
    pub max_concurrent_dates: usize,
    /// Date column used by tables that do not declare their own.
    ///
    /// Default: `logical_date`
    #[serde(default = "default_date_column")]
    pub default_date_column: String,
}

impl ValidationConfig {
    /// Default number of dates validated concurrently.
    pub const DEFAULT_MAX_CONCURRENT_DATES: usize = 4;

    /// Default date column.
    pub const DEFAULT_DATE_COLUMN: &'static str = "logical_date";

    /// Validates thresholds, weights and limits.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.thresholds.validate()?;
        self.progress.validate()?;

        if self.max_concurrent_dates == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "validation.max_concurrent_dates".to_string(),
                constraint: "must be greater than zero".to_string(),
            });
        }

        if self.default_date_column.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "validation.default_date_column".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdsConfig::default(),
            progress: ProgressWeightsConfig::default(),
            max_concurrent_dates: Self::DEFAULT_MAX_CONCURRENT_DATES,
            default_date_column: default_date_column(),
        }
    }
}

fn default_max_concurrent_dates() -> usize {
    ValidationConfig::DEFAULT_MAX_CONCURRENT_DATES
}

fn default_date_column() -> String {
    ValidationConfig::DEFAULT_DATE_COLUMN.to_string()
}

/// Named tunables used when grading table and stage results.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ThresholdsConfig {
    /// Share of the expected rows a table must hold to be complete.
    ///
    /// Default: 0.95
    #[serde(default = "default_record_completeness_ratio")]
    pub record_completeness_ratio: f64,
    /// Credit a partial table contributes to its stage's progress score.
    ///
    /// Default: 0.5
    #[serde(default = "default_partial_credit")]
    pub partial_credit: f64,
}

impl ThresholdsConfig {
    /// Default completeness ratio: 95%.
    pub const DEFAULT_RECORD_COMPLETENESS_RATIO: f64 = 0.95;

    /// Default partial credit: half.
    pub const DEFAULT_PARTIAL_CREDIT: f64 = 0.5;

    fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("record_completeness_ratio", self.record_completeness_ratio),
            ("partial_credit", self.partial_credit),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ValidationError::InvalidFieldValue {
                    field: format!("validation.thresholds.{field}"),
                    constraint: "must be within [0, 1]".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            record_completeness_ratio: Self::DEFAULT_RECORD_COMPLETENESS_RATIO,
            partial_credit: Self::DEFAULT_PARTIAL_CREDIT,
        }
    }
}

fn default_record_completeness_ratio() -> f64 {
    ThresholdsConfig::DEFAULT_RECORD_COMPLETENESS_RATIO
}

fn default_partial_credit() -> f64 {
    ThresholdsConfig::DEFAULT_PARTIAL_CREDIT
}

/// Stage weights for the overall progress score, one table per mode family.
///
/// Weights need not sum to one; they are renormalized over the stages evaluated in a run.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ProgressWeightsConfig {
    /// Weights used for historical and same-day runs.
    #[serde(default)]
    pub regular: BTreeMap<String, f64>,
    /// Weights used when the run falls in a bootstrap window.
    #[serde(default)]
    pub bootstrap: BTreeMap<String, f64>,
}

impl ProgressWeightsConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        for (table, weights) in [("regular", &self.regular), ("bootstrap", &self.bootstrap)] {
            for (stage, weight) in weights {
                if !weight.is_finite() || *weight < 0.0 {
                    return Err(ValidationError::InvalidFieldValue {
                        field: format!("validation.progress.{table}.{stage}"),
                        constraint: "must be a non-negative number".to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}
