use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, GateResult};
use crate::types::BatchKey;

/// Outcome reported by a producer for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerStatus {
    Success,
    Partial,
    Failed,
    Skipped,
}

impl ProducerStatus {
    /// Returns `true` when the status satisfies a critical producer expectation.
    pub fn satisfies_critical(&self) -> bool {
        matches!(self, ProducerStatus::Success | ProducerStatus::Partial)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProducerStatus::Success => "success",
            ProducerStatus::Partial => "partial",
            ProducerStatus::Failed => "failed",
            ProducerStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ProducerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A producer's completion as folded into a batch's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerCompletion {
    /// Canonical producer name.
    pub producer_name: String,
    pub status: ProducerStatus,
    pub record_count: u64,
    pub completed_at: DateTime<Utc>,
    pub correlation_id: String,
}

/// Completion event as delivered by the message bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompletionEvent {
    pub stage: String,
    pub logical_date: NaiveDate,
    pub producer_name: String,
    pub status: ProducerStatus,
    pub record_count: u64,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
}

impl CompletionEvent {
    pub fn batch_key(&self) -> BatchKey {
        BatchKey::new(self.stage.clone(), self.logical_date)
    }

    /// Builds the completion to fold, with `producer_name` already canonical.
    pub fn to_completion(&self, producer_name: String) -> ProducerCompletion {
        ProducerCompletion {
            producer_name,
            status: self.status,
            record_count: self.record_count,
            completed_at: self.timestamp,
            correlation_id: self.correlation_id.clone(),
        }
    }
}

/// Parses and validates a JSON completion event.
///
/// Any missing field, unknown status, invalid date or blank identifier is rejected with
/// [`ErrorKind::MalformedEvent`], which is never retried.
pub fn parse_completion_event(payload: &[u8]) -> GateResult<CompletionEvent> {
    let event: CompletionEvent = match serde_json::from_slice(payload) {
        Ok(event) => event,
        Err(err) => {
            bail!(
                ErrorKind::MalformedEvent,
                "Completion event could not be parsed",
                err.to_string(),
                source: err
            );
        }
    };

    for (field, value) in [
        ("stage", &event.stage),
        ("producer_name", &event.producer_name),
        ("correlation_id", &event.correlation_id),
    ] {
        if value.trim().is_empty() {
            bail!(
                ErrorKind::MalformedEvent,
                "Completion event has a blank field",
                format!("field `{field}` must not be blank")
            );
        }
    }

    Ok(event)
}
