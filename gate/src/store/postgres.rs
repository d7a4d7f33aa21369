use chrono::{DateTime, Utc};
use gate_postgres::completion::{
    self, CompletionStateRow, CompletionStateWrite, ConditionalWrite, TriggerOutboxRow,
};
use sqlx::PgPool;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, GateResult};
use crate::state::completion::CompletionState;
use crate::store::base::{
    ClaimedTrigger, CommitResult, CompletionStore, VersionedState, WritePrecondition,
};
use crate::types::{BatchKey, TriggerMessage};

/// Completion store backed by the `gate` schema.
///
/// The state is stored as a JSON document next to the columns used for lookups, and every
/// conditional write runs in its own transaction together with the outbox insert.
#[derive(Debug, Clone)]
pub struct PostgresCompletionStore {
    pool: PgPool,
}

impl PostgresCompletionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn version_to_i64(version: u64) -> GateResult<i64> {
    match i64::try_from(version) {
        Ok(version) => Ok(version),
        Err(_) => bail!(
            ErrorKind::InvalidState,
            "Completion state version out of range",
            format!("version {version} does not fit the stored column")
        ),
    }
}

fn version_from_i64(version: i64) -> GateResult<u64> {
    match u64::try_from(version) {
        Ok(version) => Ok(version),
        Err(_) => bail!(
            ErrorKind::InvalidState,
            "Stored completion state has a negative version",
            format!("version {version} is negative")
        ),
    }
}

fn row_to_versioned_state(row: CompletionStateRow) -> GateResult<VersionedState> {
    let mut state: CompletionState = serde_json::from_value(row.state)?;
    // The column is authoritative: it can only move from false to true.
    state.triggered |= row.triggered;

    Ok(VersionedState {
        state,
        version: version_from_i64(row.version)?,
    })
}

fn row_to_claimed_trigger(row: TriggerOutboxRow) -> GateResult<ClaimedTrigger> {
    let message: TriggerMessage = serde_json::from_value(row.message)?;

    Ok(ClaimedTrigger {
        message,
        attempts: u32::try_from(row.attempts).unwrap_or(0),
    })
}

impl CompletionStore for PostgresCompletionStore {
    async fn load_state(&self, batch_key: &BatchKey) -> GateResult<Option<VersionedState>> {
        let row = completion::load_completion_state(&self.pool, &batch_key.storage_key()).await?;

        row.map(row_to_versioned_state).transpose()
    }

    async fn commit_state(
        &self,
        state: &CompletionState,
        precondition: WritePrecondition,
        trigger: Option<&TriggerMessage>,
    ) -> GateResult<CommitResult> {
        let storage_key = state.batch_key.storage_key();
        let document = serde_json::to_value(state)?;
        let trigger = trigger.map(serde_json::to_value).transpose()?;

        let write = CompletionStateWrite {
            batch_key: &storage_key,
            stage: &state.batch_key.stage,
            logical_date: state.batch_key.logical_date,
            triggered: state.triggered,
            state: &document,
            first_seen_at: state.first_seen_at,
            created_at: state.created_at,
            updated_at: state.updated_at,
        };

        let result = match precondition {
            WritePrecondition::DoesNotExist => {
                completion::insert_completion_state(&self.pool, &write, trigger.as_ref()).await?
            }
            WritePrecondition::MatchesVersion(expected) => {
                completion::update_completion_state(
                    &self.pool,
                    &write,
                    version_to_i64(expected)?,
                    trigger.as_ref(),
                )
                .await?
            }
        };

        match result {
            ConditionalWrite::Written { version } => Ok(CommitResult::Committed {
                version: version_from_i64(version)?,
            }),
            ConditionalWrite::Rejected { current_version } => {
                debug!(
                    batch_key = %state.batch_key,
                    ?precondition,
                    ?current_version,
                    "completion state precondition rejected"
                );

                Ok(CommitResult::Conflict {
                    current_version: current_version.map(version_from_i64).transpose()?,
                })
            }
        }
    }

    async fn claim_trigger(
        &self,
        batch_key: &BatchKey,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> GateResult<Option<ClaimedTrigger>> {
        let row =
            completion::claim_trigger(&self.pool, &batch_key.storage_key(), stale_before, now)
                .await?;

        row.map(row_to_claimed_trigger).transpose()
    }

    async fn mark_trigger_published(
        &self,
        batch_key: &BatchKey,
        published_at: DateTime<Utc>,
    ) -> GateResult<bool> {
        Ok(
            completion::mark_trigger_published(&self.pool, &batch_key.storage_key(), published_at)
                .await?,
        )
    }

    async fn release_trigger(&self, batch_key: &BatchKey) -> GateResult<bool> {
        Ok(completion::release_trigger(&self.pool, &batch_key.storage_key()).await?)
    }

    async fn list_open_states(&self) -> GateResult<Vec<VersionedState>> {
        completion::list_open_completion_states(&self.pool)
            .await?
            .into_iter()
            .map(row_to_versioned_state)
            .collect()
    }

    async fn list_claimable_triggers(&self, stale_before: DateTime<Utc>) -> GateResult<Vec<BatchKey>> {
        let keys = completion::list_claimable_trigger_keys(&self.pool, stale_before).await?;

        Ok(keys
            .into_iter()
            .map(|(stage, logical_date)| BatchKey::new(stage, logical_date))
            .collect())
    }
}
