use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::BatchKey;

/// Message published downstream when a stage's gate opens.
///
/// Published at most once per batch by the gate. Consumers must still deduplicate on
/// `(stage_completed, logical_date)` because the bus delivers at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerMessage {
    pub stage_completed: String,
    pub logical_date: NaiveDate,
    pub correlation_id: String,
    /// Whether an expected producer was absent when the trigger was decided.
    pub degraded: bool,
    /// Whether the trigger was forced by the deadline monitor.
    pub forced: bool,
    pub completed_producers: Vec<String>,
    pub missing_producers: Vec<String>,
    pub triggered_at: DateTime<Utc>,
}

impl TriggerMessage {
    pub fn batch_key(&self) -> BatchKey {
        BatchKey::new(self.stage_completed.clone(), self.logical_date)
    }
}
