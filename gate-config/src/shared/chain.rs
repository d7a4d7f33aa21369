use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::shared::{TableReference, ValidationError};

/// How much a missing chain matters for downstream quality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainSeverity {
    Critical,
    Warning,
    Info,
}

/// Quality tier of a data source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Gold,
    Silver,
    Bronze,
}

/// An ordered list of candidate sources for one logical data need.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChainConfig {
    pub name: String,
    pub severity: ChainSeverity,
    /// Score reported alongside the missing message when no source has data.
    #[serde(default)]
    pub quality_impact_score: f64,
    #[serde(default)]
    pub missing_message: Option<String>,
    /// Whether virtual sources of this chain accept a `partial` dependency chain.
    #[serde(default)]
    pub virtual_accepts_partial: bool,
    /// Sources in priority order.
    pub sources: Vec<SourceConfig>,
}

/// One candidate source in a chain.
///
/// A source is either backed by a table or virtual. Virtual sources have no rows of their own
/// and are available when the chain they depend on resolved to usable data.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default)]
    pub table: Option<TableReference>,
    /// Date column of `table` and `availability_table`. Falls back to the validation default.
    #[serde(default)]
    pub date_column: Option<String>,
    /// Table holding raw, unprocessed rows for the source, reported next to the processed count.
    #[serde(default)]
    pub availability_table: Option<TableReference>,
    #[serde(default)]
    pub primary: bool,
    pub quality_tier: QualityTier,
    #[serde(default)]
    pub quality_score: f64,
    /// Minimum row count for the source to be put in use.
    ///
    /// Default: 1
    #[serde(default = "default_min_records")]
    pub min_records: u64,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
    /// Chain a virtual source derives its data from.
    #[serde(default)]
    pub depends_on: Option<String>,
}

impl SourceConfig {
    /// Default minimum row count.
    pub const DEFAULT_MIN_RECORDS: u64 = 1;
}

fn default_min_records() -> u64 {
    SourceConfig::DEFAULT_MIN_RECORDS
}

impl ChainConfig {
    /// Validates the shape of a single chain.
    ///
    /// References between chains, and their ordering, are validated when the chain catalog is
    /// built.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "chains[].name".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.sources.is_empty() {
            return Err(ValidationError::EmptyChain(self.name.clone()));
        }

        if !(0.0..=1.0).contains(&self.quality_impact_score) {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("chains.{}.quality_impact_score", self.name),
                constraint: "must be within [0, 1]".to_string(),
            });
        }

        let mut seen = HashSet::new();
        let mut primaries = 0;
        for source in &self.sources {
            if !seen.insert(source.name.as_str()) {
                return Err(ValidationError::DuplicateSource {
                    chain: self.name.clone(),
                    source_name: source.name.clone(),
                });
            }

            if source.primary {
                primaries += 1;
            }

            self.validate_backing(source)?;

            if !(0.0..=1.0).contains(&source.quality_score) {
                return Err(ValidationError::InvalidFieldValue {
                    field: format!("chains.{}.sources.{}.quality_score", self.name, source.name),
                    constraint: "must be within [0, 1]".to_string(),
                });
            }
        }

        if primaries > 1 {
            return Err(ValidationError::MultiplePrimarySources(self.name.clone()));
        }

        Ok(())
    }

    fn validate_backing(&self, source: &SourceConfig) -> Result<(), ValidationError> {
        let invalid = |reason| ValidationError::InvalidSourceBacking {
            chain: self.name.clone(),
            source_name: source.name.clone(),
            reason,
        };

        match (source.is_virtual, &source.table) {
            (true, Some(_)) => Err(invalid("is virtual and must not declare a table")),
            (true, None) if source.availability_table.is_some() => {
                Err(invalid("is virtual and must not declare an availability table"))
            }
            (false, None) => Err(invalid("must declare a table or be virtual")),
            (false, Some(_)) if source.depends_on.is_some() => {
                Err(invalid("is not virtual and must not declare a dependency"))
            }
            _ => Ok(()),
        }
    }
}
