use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction, Type, prelude::FromRow};

/// Publication status of a trigger outbox row.
#[derive(Debug, Clone, Copy, Type, PartialEq, Eq)]
#[sqlx(type_name = "gate.trigger_status", rename_all = "snake_case")]
pub enum TriggerStatus {
    /// Written but not currently being published.
    Pending,
    /// Claimed by a publisher.
    InFlight,
    /// Delivered downstream.
    Published,
}

/// A row from the `gate.completion_state` table.
#[derive(Debug, Clone, FromRow)]
pub struct CompletionStateRow {
    pub batch_key: String,
    pub stage: String,
    pub logical_date: NaiveDate,
    pub version: i64,
    pub triggered: bool,
    pub state: serde_json::Value,
    pub first_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row from the `gate.trigger_outbox` table.
#[derive(Debug, Clone, FromRow)]
pub struct TriggerOutboxRow {
    pub batch_key: String,
    pub message: serde_json::Value,
    pub status: TriggerStatus,
    pub attempts: i32,
    pub claimed_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Values written by a completion state commit.
#[derive(Debug)]
pub struct CompletionStateWrite<'a> {
    pub batch_key: &'a str,
    pub stage: &'a str,
    pub logical_date: NaiveDate,
    pub triggered: bool,
    pub state: &'a serde_json::Value,
    pub first_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a conditional completion state write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalWrite {
    /// The row was written and now has this version.
    Written { version: i64 },
    /// The precondition did not hold. Carries the version currently stored, if any.
    Rejected { current_version: Option<i64> },
}

/// Loads the completion state of a batch.
pub async fn load_completion_state(
    pool: &PgPool,
    batch_key: &str,
) -> sqlx::Result<Option<CompletionStateRow>> {
    sqlx::query_as::<_, CompletionStateRow>(
        r#"
        select batch_key, stage, logical_date, version, triggered, state,
               first_seen_at, created_at, updated_at
        from gate.completion_state
        where batch_key = $1
        "#,
    )
    .bind(batch_key)
    .fetch_optional(pool)
    .await
}

/// Lists every batch that has not been triggered yet, oldest first.
pub async fn list_open_completion_states(pool: &PgPool) -> sqlx::Result<Vec<CompletionStateRow>> {
    sqlx::query_as::<_, CompletionStateRow>(
        r#"
        select batch_key, stage, logical_date, version, triggered, state,
               first_seen_at, created_at, updated_at
        from gate.completion_state
        where not triggered
        order by first_seen_at
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Inserts the first completion state of a batch.
///
/// When `trigger` is set, the trigger message is written to the outbox in the same transaction,
/// already claimed at `write.updated_at` by the caller. Nothing is written if the batch exists.
pub async fn insert_completion_state(
    pool: &PgPool,
    write: &CompletionStateWrite<'_>,
    trigger: Option<&serde_json::Value>,
) -> sqlx::Result<ConditionalWrite> {
    let mut tx = pool.begin().await?;

    let version: Option<i64> = sqlx::query_scalar(
        r#"
        insert into gate.completion_state
            (batch_key, stage, logical_date, version, triggered, state,
             first_seen_at, created_at, updated_at)
        values ($1, $2, $3, 1, $4, $5, $6, $7, $8)
        on conflict (batch_key) do nothing
        returning version
        "#,
    )
    .bind(write.batch_key)
    .bind(write.stage)
    .bind(write.logical_date)
    .bind(write.triggered)
    .bind(write.state)
    .bind(write.first_seen_at)
    .bind(write.created_at)
    .bind(write.updated_at)
    .fetch_optional(&mut *tx)
    .await?;

    finish_conditional_write(tx, write, version, trigger).await
}

/// Updates the completion state of a batch if its stored version is `expected_version`.
///
/// The version is incremented on success. When `trigger` is set, the trigger message is written
/// to the outbox in the same transaction, already claimed at `write.updated_at` by the caller.
pub async fn update_completion_state(
    pool: &PgPool,
    write: &CompletionStateWrite<'_>,
    expected_version: i64,
    trigger: Option<&serde_json::Value>,
) -> sqlx::Result<ConditionalWrite> {
    let mut tx = pool.begin().await?;

    let version: Option<i64> = sqlx::query_scalar(
        r#"
        update gate.completion_state
        set version = version + 1,
            triggered = triggered or $3,
            state = $4,
            first_seen_at = $5,
            updated_at = $6
        where batch_key = $1 and version = $2
        returning version
        "#,
    )
    .bind(write.batch_key)
    .bind(expected_version)
    .bind(write.triggered)
    .bind(write.state)
    .bind(write.first_seen_at)
    .bind(write.updated_at)
    .fetch_optional(&mut *tx)
    .await?;

    finish_conditional_write(tx, write, version, trigger).await
}

async fn finish_conditional_write(
    mut tx: Transaction<'_, Postgres>,
    write: &CompletionStateWrite<'_>,
    version: Option<i64>,
    trigger: Option<&serde_json::Value>,
) -> sqlx::Result<ConditionalWrite> {
    let Some(version) = version else {
        let current_version: Option<i64> =
            sqlx::query_scalar("select version from gate.completion_state where batch_key = $1")
                .bind(write.batch_key)
                .fetch_optional(&mut *tx)
                .await?;

        tx.rollback().await?;

        return Ok(ConditionalWrite::Rejected { current_version });
    };

    if let Some(message) = trigger {
        sqlx::query(
            r#"
            insert into gate.trigger_outbox (batch_key, message, status, attempts, claimed_at)
            values ($1, $2, 'in_flight', 1, $3)
            "#,
        )
        .bind(write.batch_key)
        .bind(message)
        .bind(write.updated_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(ConditionalWrite::Written { version })
}

/// Claims the outbox row of a batch for publication.
///
/// Succeeds when the row is pending, or in flight with a claim older than `stale_before`.
/// Returns `None` when the row does not exist, is already published, or is claimed by someone
/// else.
pub async fn claim_trigger(
    pool: &PgPool,
    batch_key: &str,
    stale_before: DateTime<Utc>,
    now: DateTime<Utc>,
) -> sqlx::Result<Option<TriggerOutboxRow>> {
    sqlx::query_as::<_, TriggerOutboxRow>(
        r#"
        update gate.trigger_outbox
        set status = 'in_flight', claimed_at = $3, attempts = attempts + 1
        where batch_key = $1
          and (status = 'pending' or (status = 'in_flight' and claimed_at < $2))
        returning batch_key, message, status, attempts, claimed_at, published_at
        "#,
    )
    .bind(batch_key)
    .bind(stale_before)
    .bind(now)
    .fetch_optional(pool)
    .await
}

/// Lists the `(stage, logical_date)` of outbox rows that could be claimed right now.
pub async fn list_claimable_trigger_keys(
    pool: &PgPool,
    stale_before: DateTime<Utc>,
) -> sqlx::Result<Vec<(String, NaiveDate)>> {
    sqlx::query_as(
        r#"
        select s.stage, s.logical_date
        from gate.trigger_outbox o
        join gate.completion_state s on s.batch_key = o.batch_key
        where o.status = 'pending' or (o.status = 'in_flight' and o.claimed_at < $1)
        order by o.created_at
        "#,
    )
    .bind(stale_before)
    .fetch_all(pool)
    .await
}

/// Marks a claimed outbox row as published.
pub async fn mark_trigger_published(
    pool: &PgPool,
    batch_key: &str,
    published_at: DateTime<Utc>,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r#"
        update gate.trigger_outbox
        set status = 'published', published_at = $2
        where batch_key = $1 and status = 'in_flight'
        "#,
    )
    .bind(batch_key)
    .bind(published_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Returns a claimed outbox row to `pending` after a failed publication.
pub async fn release_trigger(pool: &PgPool, batch_key: &str) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r#"
        update gate.trigger_outbox
        set status = 'pending', claimed_at = null
        where batch_key = $1 and status = 'in_flight'
        "#,
    )
    .bind(batch_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
