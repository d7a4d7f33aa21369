use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::GateResult;
use crate::state::completion::CompletionState;
use crate::types::{BatchKey, TriggerMessage};

/// A completion state together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedState {
    pub state: CompletionState,
    pub version: u64,
}

/// Condition a completion state write must satisfy to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePrecondition {
    /// The batch has no stored state yet.
    DoesNotExist,
    /// The stored state is at exactly this version.
    MatchesVersion(u64),
}

/// Result of a conditional completion state write.
///
/// A failed precondition is a normal outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResult {
    /// The state was written and now has this version.
    Committed { version: u64 },
    /// The precondition failed. Carries the version currently stored, if any.
    Conflict { current_version: Option<u64> },
}

/// Publication status of an outbox message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    InFlight,
    Published,
}

/// A trigger message claimed from the outbox for publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedTrigger {
    pub message: TriggerMessage,
    /// Number of times the message has been claimed, this claim included.
    pub attempts: u32,
}

/// Transactional store of completion states and their trigger outbox.
///
/// Implementations must apply a state write and its outbox insert atomically: either both are
/// visible or neither is. The outbox holds at most one message per batch.
pub trait CompletionStore {
    /// Loads the stored state of a batch.
    fn load_state(
        &self,
        batch_key: &BatchKey,
    ) -> impl Future<Output = GateResult<Option<VersionedState>>> + Send;

    /// Writes `state` if `precondition` holds.
    ///
    /// When `trigger` is set, the message is added to the outbox in the same write, already
    /// claimed by the caller at `state.updated_at`.
    fn commit_state(
        &self,
        state: &CompletionState,
        precondition: WritePrecondition,
        trigger: Option<&TriggerMessage>,
    ) -> impl Future<Output = GateResult<CommitResult>> + Send;

    /// Claims the outbox message of a batch for publication.
    ///
    /// Succeeds when the message is pending or its claim is older than `stale_before`.
    fn claim_trigger(
        &self,
        batch_key: &BatchKey,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = GateResult<Option<ClaimedTrigger>>> + Send;

    /// Marks a claimed outbox message as published. Returns `false` if it was not claimed.
    fn mark_trigger_published(
        &self,
        batch_key: &BatchKey,
        published_at: DateTime<Utc>,
    ) -> impl Future<Output = GateResult<bool>> + Send;

    /// Returns a claimed outbox message to pending. Returns `false` if it was not claimed.
    fn release_trigger(&self, batch_key: &BatchKey)
    -> impl Future<Output = GateResult<bool>> + Send;

    /// Lists the states of every batch that has not triggered, oldest `first_seen_at` first.
    fn list_open_states(&self) -> impl Future<Output = GateResult<Vec<VersionedState>>> + Send;

    /// Lists batches whose outbox message could be claimed right now.
    fn list_claimable_triggers(
        &self,
        stale_before: DateTime<Utc>,
    ) -> impl Future<Output = GateResult<Vec<BatchKey>>> + Send;
}
