//! Race-free, idempotent completion tracking with exactly-once trigger decisions.
//!
//! Every completion goes through a read-fold-commit cycle against the [`CompletionStore`]. The
//! commit is conditional on the version that was read, so concurrent writers of the same batch
//! serialize through version races instead of locks. The write that flips `triggered` is the
//! only one that carries a trigger message, and it lands in the outbox atomically with the flip.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gate_config::shared::TrackerConfig;
use metrics::counter;
use rand::Rng;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bail;
use crate::clock::Clock;
use crate::deadline::ForcedDecision;
use crate::dispatch::base::Dispatcher;
use crate::error::{ErrorKind, GateResult};
use crate::expectation::ExpectationResolver;
#[cfg(feature = "failpoints")]
use crate::failpoints::{
    RECORD_COMPLETION__BEFORE_COMMIT, RECORD_COMPLETION__BEFORE_DISPATCH, gate_fail_point,
};
use crate::metrics::{
    DEGRADED_LABEL, FORCED_LABEL, GATE_COMMIT_ATTEMPTS_EXHAUSTED_TOTAL,
    GATE_COMMIT_CONFLICTS_TOTAL, GATE_COMPLETIONS_RECORDED_TOTAL, GATE_DISPATCH_FAILURES_TOTAL,
    GATE_TRIGGERS_DISPATCHED_TOTAL, OUTCOME_LABEL, STAGE_LABEL,
};
use crate::policy::build_error_handling_policy;
use crate::state::completion::{CompletionState, FoldOutcome};
use crate::store::base::{CommitResult, CompletionStore, WritePrecondition};
use crate::types::{BatchKey, CompletionEvent, ProducerCompletion, TriggerMessage};

/// Result of recording a completion or applying a forced decision.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    /// State of the batch after this call.
    pub state: CompletionState,
    /// Effect of the fold, `None` for forced decisions.
    pub fold: Option<FoldOutcome>,
    /// Whether this call decided the trigger and published it.
    pub dispatched: bool,
    /// Whether this call republished a trigger decided earlier.
    pub republished: bool,
}

/// A change applied to a batch inside the commit loop.
enum Change<'a> {
    Fold(&'a ProducerCompletion),
    Force,
}

/// Owns the completion state of every batch and decides when a stage triggers.
#[derive(Debug)]
pub struct CompletionTracker<S, D> {
    store: S,
    dispatcher: D,
    resolver: Arc<ExpectationResolver>,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
}

impl<S, D> CompletionTracker<S, D>
where
    S: CompletionStore + Sync,
    D: Dispatcher + Sync,
{
    pub fn new(
        store: S,
        dispatcher: D,
        resolver: Arc<ExpectationResolver>,
        clock: Arc<dyn Clock>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            resolver,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<ExpectationResolver> {
        &self.resolver
    }

    /// Records a completion event as received from the message bus.
    pub async fn record_event(&self, event: &CompletionEvent) -> GateResult<RecordOutcome> {
        let batch_key = event.batch_key();
        let completion = event.to_completion(event.producer_name.clone());

        self.record_completion(&batch_key, completion).await
    }

    /// Folds a producer completion into its batch and triggers the stage when the gate opens.
    ///
    /// The producer name is normalized and mapped through the stage's aliases before folding.
    /// Replaying a completion is a no-op. Once a batch has triggered, completions are still
    /// folded but never trigger it again.
    pub async fn record_completion(
        &self,
        batch_key: &BatchKey,
        mut completion: ProducerCompletion,
    ) -> GateResult<RecordOutcome> {
        let stage = self.resolver.catalog().require_stage(&batch_key.stage)?;
        completion.producer_name = stage.canonical_producer(&completion.producer_name);

        match self
            .commit_loop(batch_key, Change::Fold(&completion))
            .await?
        {
            Some(outcome) => Ok(outcome),
            None => bail!(
                ErrorKind::InvalidState,
                "Completion produced no state",
                format!("batch {batch_key} has no state after folding a completion")
            ),
        }
    }

    /// Applies a degraded trigger decision from the deadline monitor.
    ///
    /// The decision only relaxes the expected-set requirement. It has no effect when the batch
    /// is gone, already triggered, or when a critical producer is not satisfied. Returns `None`
    /// when the batch has no state.
    pub async fn apply_forced_decision(
        &self,
        decision: &ForcedDecision,
    ) -> GateResult<Option<RecordOutcome>> {
        self.commit_loop(&decision.batch_key, Change::Force).await
    }

    /// Republishes trigger messages whose publication failed or was abandoned.
    ///
    /// Returns the number of messages published.
    pub async fn flush_stale_triggers(&self) -> GateResult<usize> {
        let stale_before = self.stale_before(self.clock.now());
        let batch_keys = self.store.list_claimable_triggers(stale_before).await?;

        let mut published = 0;
        for batch_key in batch_keys {
            if self.republish(&batch_key).await? {
                published += 1;
            }
        }

        Ok(published)
    }

    /// Runs the bounded read-modify-commit cycle for one change.
    ///
    /// Version races and retryable store failures share the `max_commit_attempts` budget. When
    /// it runs out, the last store failure is returned, or a conflict error if the last attempt
    /// lost a race.
    async fn commit_loop(
        &self,
        batch_key: &BatchKey,
        change: Change<'_>,
    ) -> GateResult<Option<RecordOutcome>> {
        let max_backoff = Duration::from_millis(self.config.max_backoff_ms);
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);
        let mut last_error = None;

        for attempt in 1..=self.config.max_commit_attempts {
            let now = self.clock.now();

            let loaded = match self.store.load_state(batch_key).await {
                Ok(loaded) => loaded,
                Err(err) if build_error_handling_policy(&err).is_retryable() => {
                    warn!(
                        batch_key = %batch_key,
                        attempt,
                        error = %err,
                        "completion state load failed, retrying"
                    );
                    last_error = Some(err);
                    self.back_off(attempt, &mut backoff, max_backoff).await;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let (mut state, precondition) = match loaded {
                Some(stored) => (
                    stored.state,
                    WritePrecondition::MatchesVersion(stored.version),
                ),
                None => match &change {
                    Change::Fold(completion) => (
                        self.initial_state(batch_key, completion, now)?,
                        WritePrecondition::DoesNotExist,
                    ),
                    Change::Force => {
                        debug!(batch_key = %batch_key, "forced decision for a batch without state");
                        return Ok(None);
                    }
                },
            };

            let already_triggered = state.triggered;
            let mut fold = None;
            let mut write_needed = precondition == WritePrecondition::DoesNotExist;
            let correlation_id;
            let forced;

            match &change {
                Change::Fold(completion) => {
                    let outcome = state.fold((*completion).clone(), now);
                    fold = Some(outcome);
                    write_needed |= outcome != FoldOutcome::Unchanged;
                    correlation_id = completion.correlation_id.clone();
                    forced = false;
                }
                Change::Force => {
                    if already_triggered || !state.critical_satisfied() {
                        debug!(
                            batch_key = %batch_key,
                            triggered = already_triggered,
                            "forced decision not applicable"
                        );
                        return Ok(Some(RecordOutcome {
                            state,
                            fold: None,
                            dispatched: false,
                            republished: false,
                        }));
                    }

                    write_needed |= !state.degraded_authorized;
                    state.degraded_authorized = true;
                    state.updated_at = now;
                    correlation_id = Uuid::new_v4().to_string();
                    forced = true;
                }
            }

            let trigger = if !already_triggered && state.gate_met() {
                write_needed = true;
                Some(state.mark_triggered(correlation_id, forced, now))
            } else {
                None
            };

            if !write_needed {
                debug!(batch_key = %batch_key, "completion already folded, nothing to write");
                self.record_fold_metric(batch_key, fold);

                let republished = already_triggered && self.republish(batch_key).await?;
                return Ok(Some(RecordOutcome {
                    state,
                    fold,
                    dispatched: false,
                    republished,
                }));
            }

            #[cfg(feature = "failpoints")]
            gate_fail_point(RECORD_COMPLETION__BEFORE_COMMIT)?;

            match self
                .store
                .commit_state(&state, precondition, trigger.as_ref())
                .await
            {
                Ok(CommitResult::Committed { version }) => {
                    debug!(
                        batch_key = %batch_key,
                        version,
                        attempt,
                        fold = ?fold,
                        "completion state committed"
                    );
                    self.record_fold_metric(batch_key, fold);

                    if let Some(message) = trigger {
                        self.publish(&message).await?;

                        return Ok(Some(RecordOutcome {
                            state,
                            fold,
                            dispatched: true,
                            republished: false,
                        }));
                    }

                    let republished = already_triggered && self.republish(batch_key).await?;
                    return Ok(Some(RecordOutcome {
                        state,
                        fold,
                        dispatched: false,
                        republished,
                    }));
                }
                Ok(CommitResult::Conflict { current_version }) => {
                    counter!(
                        GATE_COMMIT_CONFLICTS_TOTAL,
                        STAGE_LABEL => batch_key.stage.clone()
                    )
                    .increment(1);

                    warn!(
                        batch_key = %batch_key,
                        attempt,
                        ?precondition,
                        ?current_version,
                        "completion state commit lost a version race, retrying"
                    );

                    last_error = None;
                    self.back_off(attempt, &mut backoff, max_backoff).await;
                }
                // A failed write may still have been applied. The next attempt reads it back and
                // sees the completion as already folded.
                Err(err) if build_error_handling_policy(&err).is_retryable() => {
                    warn!(
                        batch_key = %batch_key,
                        attempt,
                        error = %err,
                        "completion state commit failed, retrying"
                    );

                    last_error = Some(err);
                    self.back_off(attempt, &mut backoff, max_backoff).await;
                }
                Err(err) => return Err(err),
            }
        }

        counter!(
            GATE_COMMIT_ATTEMPTS_EXHAUSTED_TOTAL,
            STAGE_LABEL => batch_key.stage.clone()
        )
        .increment(1);

        error!(
            batch_key = %batch_key,
            attempts = self.config.max_commit_attempts,
            "completion state commit attempts exhausted"
        );

        if let Some(err) = last_error {
            return Err(err);
        }

        bail!(
            ErrorKind::ConcurrencyConflict,
            "Completion state commit attempts exhausted",
            format!(
                "batch {batch_key} could not be committed in {} attempts",
                self.config.max_commit_attempts
            )
        );
    }

    /// Sleeps before the next commit attempt, unless `attempt` was the last one.
    async fn back_off(&self, attempt: u32, backoff: &mut Duration, max_backoff: Duration) {
        if attempt < self.config.max_commit_attempts {
            tokio::time::sleep(jittered(*backoff)).await;
            *backoff = (*backoff * 2).min(max_backoff);
        }
    }

    fn initial_state(
        &self,
        batch_key: &BatchKey,
        completion: &ProducerCompletion,
        now: DateTime<Utc>,
    ) -> GateResult<CompletionState> {
        let today = self.resolver.calendar().today(now);
        let expectation = self
            .resolver
            .resolve(&batch_key.stage, batch_key.logical_date, today)?;

        info!(
            batch_key = %batch_key,
            mode = %expectation.mode,
            expected = expectation.expected.len(),
            critical = expectation.critical.len(),
            "tracking new batch"
        );

        Ok(CompletionState::new(
            batch_key.clone(),
            expectation,
            completion.completed_at,
            now,
        ))
    }

    /// Publishes a trigger already claimed by the committing write.
    async fn publish(&self, message: &TriggerMessage) -> GateResult<()> {
        let batch_key = message.batch_key();

        info!(
            batch_key = %batch_key,
            correlation_id = %message.correlation_id,
            degraded = message.degraded,
            forced = message.forced,
            missing = ?message.missing_producers,
            "stage gate opened, publishing trigger"
        );

        #[cfg(feature = "failpoints")]
        gate_fail_point(RECORD_COMPLETION__BEFORE_DISPATCH)?;

        if let Err(err) = self.dispatcher.dispatch(message).await {
            counter!(
                GATE_DISPATCH_FAILURES_TOTAL,
                STAGE_LABEL => batch_key.stage.clone()
            )
            .increment(1);

            error!(batch_key = %batch_key, error = %err, "trigger publication failed");

            if let Err(release_err) = self.store.release_trigger(&batch_key).await {
                warn!(
                    batch_key = %batch_key,
                    error = %release_err,
                    "failed to release trigger claim, it will be reclaimed after the claim timeout"
                );
            }

            return Err(err);
        }

        counter!(
            GATE_TRIGGERS_DISPATCHED_TOTAL,
            STAGE_LABEL => batch_key.stage.clone(),
            DEGRADED_LABEL => message.degraded.to_string(),
            FORCED_LABEL => message.forced.to_string()
        )
        .increment(1);

        if !self
            .store
            .mark_trigger_published(&batch_key, self.clock.now())
            .await?
        {
            warn!(batch_key = %batch_key, "trigger published but its claim was taken over");
        }

        Ok(())
    }

    /// Claims and publishes the outbox message of a triggered batch, if it is claimable.
    async fn republish(&self, batch_key: &BatchKey) -> GateResult<bool> {
        let now = self.clock.now();
        let Some(claimed) = self
            .store
            .claim_trigger(batch_key, self.stale_before(now), now)
            .await?
        else {
            return Ok(false);
        };

        info!(
            batch_key = %batch_key,
            attempts = claimed.attempts,
            "republishing trigger"
        );

        self.publish(&claimed.message).await?;

        Ok(true)
    }

    fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let claim_timeout = i64::try_from(self.config.trigger_claim_timeout_ms).unwrap_or(i64::MAX);

        chrono::Duration::try_milliseconds(claim_timeout)
            .and_then(|timeout| now.checked_sub_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn record_fold_metric(&self, batch_key: &BatchKey, fold: Option<FoldOutcome>) {
        let Some(fold) = fold else {
            return;
        };

        let outcome = match fold {
            FoldOutcome::Inserted => "inserted",
            FoldOutcome::Updated => "updated",
            FoldOutcome::Unchanged => "unchanged",
        };

        counter!(
            GATE_COMPLETIONS_RECORDED_TOTAL,
            STAGE_LABEL => batch_key.stage.clone(),
            OUTCOME_LABEL => outcome
        )
        .increment(1);
    }
}

/// Picks a random backoff between half and all of `base`.
fn jittered(base: Duration) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    if base_ms == 0 {
        return base;
    }

    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(base_ms / 2..=base_ms))
}
