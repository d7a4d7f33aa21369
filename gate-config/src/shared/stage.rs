use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::shared::{TableReference, ValidationError};

/// A pipeline stage and the producers that report completion for it.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StageConfig {
    /// Stage name as carried by completion events and trigger messages.
    pub name: String,
    /// Whether the stage needs prior days of data and therefore produces nothing during the
    /// bootstrap window of a season.
    #[serde(default)]
    pub requires_history: bool,
    /// Canonical producer list, in reporting order.
    pub producers: Vec<ProducerConfig>,
    /// Chains whose availability is reported when the stage is validated.
    #[serde(default)]
    pub chains: Vec<String>,
    /// Additional producer aliases, from a normalized alias to a canonical producer name.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl StageConfig {
    /// Validates the stage in isolation.
    ///
    /// Chain references are checked by [`crate::shared::CoordinatorConfig::validate`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "stages[].name".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.producers.is_empty() {
            return Err(ValidationError::EmptyStage(self.name.clone()));
        }

        let mut seen = HashSet::new();
        for producer in &self.producers {
            producer.validate(&self.name)?;

            if !seen.insert(producer.name.trim()) {
                return Err(ValidationError::DuplicateProducer {
                    stage: self.name.clone(),
                    producer: producer.name.clone(),
                });
            }
        }

        Ok(())
    }
}

/// A producer reporting completion for a stage.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProducerConfig {
    /// Producer name. Normalized before use.
    pub name: String,
    /// Whether the stage may not be triggered, even degraded, without this producer.
    ///
    /// Default: true
    #[serde(default = "default_true")]
    pub critical: bool,
    /// Whether the producer can legitimately run before the end of the logical day.
    ///
    /// Default: true
    #[serde(default = "default_true")]
    pub same_day: bool,
    /// Output table counted when the stage is validated.
    #[serde(default)]
    pub table: Option<TableReference>,
    /// Date column of the output table. Falls back to the validation default.
    #[serde(default)]
    pub date_column: Option<String>,
    /// Expected number of rows per logical date, if known.
    #[serde(default)]
    pub expected_records: Option<u64>,
    /// Column holding a gold/silver/bronze quality tier per row.
    #[serde(default)]
    pub quality_column: Option<String>,
}

impl ProducerConfig {
    fn validate(&self, stage: &str) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("stages.{stage}.producers[].name"),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.expected_records == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("stages.{stage}.producers.{}.expected_records", self.name),
                constraint: "must be greater than zero when set".to_string(),
            });
        }

        if self.quality_column.is_some() && self.table.is_none() {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("stages.{stage}.producers.{}.quality_column", self.name),
                constraint: "requires `table` to be set".to_string(),
            });
        }

        Ok(())
    }
}

const fn default_true() -> bool {
    true
}
