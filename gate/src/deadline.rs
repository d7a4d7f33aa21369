//! Deadline monitoring of open batches.

use chrono::{DateTime, Duration, Utc};
use gate_config::shared::DeadlineConfig;
use metrics::gauge;
use tracing::{debug, info, warn};

use crate::error::GateResult;
use crate::metrics::{GATE_BATCHES_AWAITING_CRITICAL, GATE_OPEN_BATCHES};
use crate::state::completion::CompletionState;
use crate::store::base::CompletionStore;
use crate::types::BatchKey;

/// Decision to trigger a batch in degraded mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcedDecision {
    pub batch_key: BatchKey,
    /// Time elapsed since the batch's first seen completion.
    pub open_for: Duration,
    /// Expected producers that have not reported.
    pub missing_producers: Vec<String>,
}

/// Verdict of the deadline monitor on one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadlineVerdict {
    /// The batch is triggered or still within its deadline.
    Waiting,
    /// The deadline passed and every critical producer is satisfied.
    Force(ForcedDecision),
    /// The deadline passed but critical producers are missing. Nothing is forced.
    AwaitingCritical { missing_critical: Vec<String> },
}

/// Evaluates a batch against its deadline.
pub fn evaluate(state: &CompletionState, now: DateTime<Utc>, timeout: Duration) -> DeadlineVerdict {
    if state.triggered {
        return DeadlineVerdict::Waiting;
    }

    let open_for = now - state.first_seen_at;
    if open_for <= timeout {
        return DeadlineVerdict::Waiting;
    }

    let missing_critical = state.missing_critical();
    if !missing_critical.is_empty() {
        return DeadlineVerdict::AwaitingCritical { missing_critical };
    }

    DeadlineVerdict::Force(ForcedDecision {
        batch_key: state.batch_key.clone(),
        open_for,
        missing_producers: state.missing_expected(),
    })
}

/// Periodic sweep over open batches.
///
/// The monitor only decides. Forced decisions are applied by the completion tracker so that
/// they go through the same conditional write as every completion.
#[derive(Debug, Clone)]
pub struct DeadlineMonitor<S> {
    store: S,
    timeout: Duration,
}

impl<S> DeadlineMonitor<S>
where
    S: CompletionStore,
{
    pub fn new(store: S, config: &DeadlineConfig) -> Self {
        let timeout_secs = i64::try_from(config.timeout_secs).unwrap_or(i64::MAX);

        Self {
            store,
            timeout: Duration::try_seconds(timeout_secs).unwrap_or(Duration::MAX),
        }
    }

    /// Returns the forced decisions due at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> GateResult<Vec<ForcedDecision>> {
        let open_states = self.store.list_open_states().await?;

        let mut decisions = Vec::new();
        let mut awaiting_critical = 0usize;

        for stored in &open_states {
            match evaluate(&stored.state, now, self.timeout) {
                DeadlineVerdict::Waiting => {}
                DeadlineVerdict::Force(decision) => {
                    info!(
                        batch_key = %decision.batch_key,
                        open_for_secs = decision.open_for.num_seconds(),
                        missing = ?decision.missing_producers,
                        "batch deadline passed, forcing degraded trigger"
                    );
                    decisions.push(decision);
                }
                DeadlineVerdict::AwaitingCritical { missing_critical } => {
                    awaiting_critical += 1;
                    warn!(
                        batch_key = %stored.state.batch_key,
                        missing_critical = ?missing_critical,
                        "batch deadline passed but critical producers are missing"
                    );
                }
            }
        }

        gauge!(GATE_OPEN_BATCHES).set(open_states.len() as f64);
        gauge!(GATE_BATCHES_AWAITING_CRITICAL).set(awaiting_critical as f64);

        debug!(
            open = open_states.len(),
            forced = decisions.len(),
            awaiting_critical,
            "deadline sweep evaluated"
        );

        Ok(decisions)
    }
}
