use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Identifies one completion-tracking instance: a stage on a logical date.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchKey {
    pub stage: String,
    pub logical_date: NaiveDate,
}

impl BatchKey {
    pub fn new(stage: impl Into<String>, logical_date: NaiveDate) -> Self {
        Self {
            stage: stage.into(),
            logical_date,
        }
    }

    /// Returns the persisted form of the key, `{stage}_{logical_date}`.
    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.stage, self.logical_date.format("%Y-%m-%d"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_joins_stage_and_date() {
        let key = BatchKey::new("analytics", NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
        assert_eq!(key.storage_key(), "analytics_2025-01-15");
    }
}
