use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Duration, Utc};
use gate::clock::ManualClock;
use gate::dispatch::memory::MemoryDispatcher;
use gate::error::{ErrorKind, GateError, GateResult};
use gate::state::completion::{CompletionState, FoldOutcome};
use gate::store::base::{
    ClaimedTrigger, CommitResult, CompletionStore, OutboxStatus, VersionedState,
    WritePrecondition,
};
use gate::store::memory::MemoryCompletionStore;
use gate::test_utils::fixtures::{at, date, event, resolver, tracker_config};
use gate::tracker::CompletionTracker;
use gate::types::{BatchKey, CompletionEvent, ProducerStatus, TriggerMessage};
use gate_telemetry::tracing::init_test_tracing;

const HISTORICAL_DATE: &str = "2025-01-10";

/// Memory store whose next scripted loads and commits fail with a transient error.
#[derive(Debug, Clone, Default)]
struct FlakyStore {
    inner: MemoryCompletionStore,
    load_failures: Arc<AtomicUsize>,
    commit_failures: Arc<AtomicUsize>,
    /// Applies a failing commit before reporting the failure, like a lost acknowledgement.
    apply_failed_commits: bool,
}

impl FlakyStore {
    fn fail_loads(&self, count: usize) {
        self.load_failures.store(count, Ordering::SeqCst);
    }

    fn fail_commits(&self, count: usize) {
        self.commit_failures.store(count, Ordering::SeqCst);
    }
}

fn take_failure(failures: &AtomicUsize) -> bool {
    failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

fn connection_dropped() -> GateError {
    GateError::from((ErrorKind::StoreConnectionFailed, "Store connection dropped"))
}

impl CompletionStore for FlakyStore {
    async fn load_state(&self, batch_key: &BatchKey) -> GateResult<Option<VersionedState>> {
        if take_failure(&self.load_failures) {
            return Err(connection_dropped());
        }

        self.inner.load_state(batch_key).await
    }

    async fn commit_state(
        &self,
        state: &CompletionState,
        precondition: WritePrecondition,
        trigger: Option<&TriggerMessage>,
    ) -> GateResult<CommitResult> {
        if take_failure(&self.commit_failures) {
            if self.apply_failed_commits {
                self.inner.commit_state(state, precondition, trigger).await?;
            }
            return Err(connection_dropped());
        }

        self.inner.commit_state(state, precondition, trigger).await
    }

    async fn claim_trigger(
        &self,
        batch_key: &BatchKey,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> GateResult<Option<ClaimedTrigger>> {
        self.inner.claim_trigger(batch_key, stale_before, now).await
    }

    async fn mark_trigger_published(
        &self,
        batch_key: &BatchKey,
        published_at: DateTime<Utc>,
    ) -> GateResult<bool> {
        self.inner
            .mark_trigger_published(batch_key, published_at)
            .await
    }

    async fn release_trigger(&self, batch_key: &BatchKey) -> GateResult<bool> {
        self.inner.release_trigger(batch_key).await
    }

    async fn list_open_states(&self) -> GateResult<Vec<VersionedState>> {
        self.inner.list_open_states().await
    }

    async fn list_claimable_triggers(
        &self,
        stale_before: DateTime<Utc>,
    ) -> GateResult<Vec<BatchKey>> {
        self.inner.list_claimable_triggers(stale_before).await
    }
}

fn flaky_tracker(
    clock: &ManualClock,
    store: FlakyStore,
    dispatcher: MemoryDispatcher,
) -> CompletionTracker<FlakyStore, MemoryDispatcher> {
    CompletionTracker::new(
        store,
        dispatcher,
        resolver(),
        Arc::new(clock.clone()),
        tracker_config(),
    )
}

fn raw_events() -> Vec<CompletionEvent> {
    [
        "ScheduleProcessor",
        "BoxScoresProcessor",
        "InjuryReportProcessor",
        "OddsProcessor",
    ]
    .into_iter()
    .map(|producer| {
        event(
            "raw",
            HISTORICAL_DATE,
            producer,
            ProducerStatus::Success,
            at("2025-01-16T02:00:00Z"),
        )
    })
    .collect()
}

#[tokio::test]
async fn transient_load_failure_is_retried_locally() {
    init_test_tracing();
    let clock = ManualClock::new(at("2025-01-16T03:00:00Z"));
    let store = FlakyStore::default();
    let tracker = flaky_tracker(&clock, store.clone(), MemoryDispatcher::new());

    store.fail_loads(1);
    let outcome = tracker.record_event(&raw_events()[0]).await.unwrap();

    assert_eq!(outcome.fold, Some(FoldOutcome::Inserted));
    let batch_key = BatchKey::new("raw", date(HISTORICAL_DATE));
    let stored = store.inner.load_state(&batch_key).await.unwrap().unwrap();
    assert_eq!(stored.version, 1);
}

#[tokio::test]
async fn transient_commit_failure_is_retried_locally() {
    init_test_tracing();
    let clock = ManualClock::new(at("2025-01-16T03:00:00Z"));
    let store = FlakyStore::default();
    let dispatcher = MemoryDispatcher::new();
    let tracker = flaky_tracker(&clock, store.clone(), dispatcher.clone());

    let events = raw_events();
    for (index, completion) in events.iter().enumerate() {
        store.fail_commits(1);
        let outcome = tracker.record_event(completion).await.unwrap();
        assert_eq!(outcome.dispatched, index == events.len() - 1);
    }

    assert_eq!(dispatcher.messages().await.len(), 1);
}

#[tokio::test]
async fn persistent_store_failure_surfaces_once_attempts_run_out() {
    init_test_tracing();
    let clock = ManualClock::new(at("2025-01-16T03:00:00Z"));
    let store = FlakyStore::default();
    let tracker = flaky_tracker(&clock, store.clone(), MemoryDispatcher::new());

    let failures = 100;
    store.fail_loads(failures);
    let err = tracker.record_event(&raw_events()[0]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StoreConnectionFailed);
    let attempts = failures - store.load_failures.load(Ordering::SeqCst);
    assert_eq!(attempts, tracker_config().max_commit_attempts as usize);
}

#[tokio::test]
async fn applied_commit_reported_as_failed_triggers_once() {
    init_test_tracing();
    let clock = ManualClock::new(at("2025-01-16T03:00:00Z"));
    let store = FlakyStore {
        apply_failed_commits: true,
        ..FlakyStore::default()
    };
    let dispatcher = MemoryDispatcher::new();
    let tracker = flaky_tracker(&clock, store.clone(), dispatcher.clone());
    let batch_key = BatchKey::new("raw", date(HISTORICAL_DATE));

    let events = raw_events();
    let (last, first) = events.split_last().unwrap();
    for completion in first {
        tracker.record_event(completion).await.unwrap();
    }

    // The gate-opening write lands, but its acknowledgement is lost.
    store.fail_commits(1);
    let outcome = tracker.record_event(last).await.unwrap();

    assert_eq!(outcome.fold, Some(FoldOutcome::Unchanged));
    assert!(outcome.state.triggered);
    assert!(!outcome.dispatched);
    assert!(dispatcher.messages().await.is_empty());

    let message = store.inner.outbox_message(&batch_key).await.unwrap();
    assert_eq!(message.correlation_id, last.correlation_id);
    assert_eq!(
        store.inner.outbox_status(&batch_key).await,
        Some(OutboxStatus::InFlight)
    );
    assert_eq!(store.inner.published_at(&batch_key).await, None);

    // The claim of the lost write expires and the sweep publishes the same message.
    clock.advance(Duration::minutes(2));
    assert_eq!(tracker.flush_stale_triggers().await.unwrap(), 1);

    let messages = dispatcher.messages().await;
    assert_eq!(messages, vec![message]);
    assert_eq!(
        store.inner.published_at(&batch_key).await,
        Some(at("2025-01-16T03:02:00Z"))
    );
}
