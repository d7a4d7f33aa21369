use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::GateResult;
use crate::state::completion::CompletionState;
use crate::store::base::{
    ClaimedTrigger, CommitResult, CompletionStore, OutboxStatus, VersionedState,
    WritePrecondition,
};
use crate::types::{BatchKey, TriggerMessage};

#[derive(Debug, Clone)]
struct OutboxEntry {
    message: TriggerMessage,
    status: OutboxStatus,
    attempts: u32,
    claimed_at: Option<DateTime<Utc>>,
    published_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    fn is_claimable(&self, stale_before: DateTime<Utc>) -> bool {
        match self.status {
            OutboxStatus::Pending => true,
            OutboxStatus::InFlight => self
                .claimed_at
                .is_none_or(|claimed_at| claimed_at < stale_before),
            OutboxStatus::Published => false,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    states: BTreeMap<BatchKey, VersionedState>,
    outbox: BTreeMap<BatchKey, OutboxEntry>,
}

/// In-memory completion store.
///
/// Every operation runs under a single lock, which makes each conditional write atomic together
/// with its outbox insert. State is lost when the process exits.
#[derive(Debug, Clone)]
pub struct MemoryCompletionStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCompletionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Returns the outbox status of a batch, if it has an outbox message.
    pub async fn outbox_status(&self, batch_key: &BatchKey) -> Option<OutboxStatus> {
        let inner = self.inner.lock().await;
        inner.outbox.get(batch_key).map(|entry| entry.status)
    }

    /// Returns the outbox message of a batch, if any.
    pub async fn outbox_message(&self, batch_key: &BatchKey) -> Option<TriggerMessage> {
        let inner = self.inner.lock().await;
        inner.outbox.get(batch_key).map(|entry| entry.message.clone())
    }

    /// Returns the time the outbox message of a batch was published, if it was.
    pub async fn published_at(&self, batch_key: &BatchKey) -> Option<DateTime<Utc>> {
        let inner = self.inner.lock().await;
        inner.outbox.get(batch_key).and_then(|entry| entry.published_at)
    }
}

impl Default for MemoryCompletionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionStore for MemoryCompletionStore {
    async fn load_state(&self, batch_key: &BatchKey) -> GateResult<Option<VersionedState>> {
        let inner = self.inner.lock().await;
        Ok(inner.states.get(batch_key).cloned())
    }

    async fn commit_state(
        &self,
        state: &CompletionState,
        precondition: WritePrecondition,
        trigger: Option<&TriggerMessage>,
    ) -> GateResult<CommitResult> {
        let mut inner = self.inner.lock().await;

        let current_version = inner
            .states
            .get(&state.batch_key)
            .map(|stored| stored.version);

        let version = match (precondition, current_version) {
            (WritePrecondition::DoesNotExist, None) => 1,
            (WritePrecondition::MatchesVersion(expected), Some(current)) if expected == current => {
                current + 1
            }
            _ => return Ok(CommitResult::Conflict { current_version }),
        };

        let mut stored = state.clone();
        if let Some(previous) = inner.states.get(&state.batch_key) {
            stored.triggered |= previous.state.triggered;
        }

        inner.states.insert(
            state.batch_key.clone(),
            VersionedState {
                state: stored,
                version,
            },
        );

        if let Some(message) = trigger {
            inner.outbox.insert(
                state.batch_key.clone(),
                OutboxEntry {
                    message: message.clone(),
                    status: OutboxStatus::InFlight,
                    attempts: 1,
                    claimed_at: Some(state.updated_at),
                    published_at: None,
                },
            );
        }

        Ok(CommitResult::Committed { version })
    }

    async fn claim_trigger(
        &self,
        batch_key: &BatchKey,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> GateResult<Option<ClaimedTrigger>> {
        let mut inner = self.inner.lock().await;

        let Some(entry) = inner.outbox.get_mut(batch_key) else {
            return Ok(None);
        };

        if !entry.is_claimable(stale_before) {
            return Ok(None);
        }

        entry.status = OutboxStatus::InFlight;
        entry.claimed_at = Some(now);
        entry.attempts += 1;

        Ok(Some(ClaimedTrigger {
            message: entry.message.clone(),
            attempts: entry.attempts,
        }))
    }

    async fn mark_trigger_published(
        &self,
        batch_key: &BatchKey,
        published_at: DateTime<Utc>,
    ) -> GateResult<bool> {
        let mut inner = self.inner.lock().await;

        match inner.outbox.get_mut(batch_key) {
            Some(entry) if entry.status == OutboxStatus::InFlight => {
                entry.status = OutboxStatus::Published;
                entry.published_at = Some(published_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_trigger(&self, batch_key: &BatchKey) -> GateResult<bool> {
        let mut inner = self.inner.lock().await;

        match inner.outbox.get_mut(batch_key) {
            Some(entry) if entry.status == OutboxStatus::InFlight => {
                entry.status = OutboxStatus::Pending;
                entry.claimed_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_open_states(&self) -> GateResult<Vec<VersionedState>> {
        let inner = self.inner.lock().await;

        let mut open: Vec<VersionedState> = inner
            .states
            .values()
            .filter(|stored| !stored.state.triggered)
            .cloned()
            .collect();
        open.sort_by_key(|stored| stored.state.first_seen_at);

        Ok(open)
    }

    async fn list_claimable_triggers(&self, stale_before: DateTime<Utc>) -> GateResult<Vec<BatchKey>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .outbox
            .iter()
            .filter(|(_, entry)| entry.is_claimable(stale_before))
            .map(|(key, _)| key.clone())
            .collect())
    }
}
