use chrono::Duration;
use gate::clock::ManualClock;
use gate::dispatch::memory::MemoryDispatcher;
use gate::error::ErrorKind;
use gate::failpoints::{RECORD_COMPLETION__BEFORE_COMMIT, RECORD_COMPLETION__BEFORE_DISPATCH};
use gate::state::completion::FoldOutcome;
use gate::store::base::{CompletionStore, OutboxStatus};
use gate::store::memory::MemoryCompletionStore;
use gate::test_utils::failpoints::GateFailScenario;
use gate::test_utils::fixtures::{at, date, event, tracker};
use gate::types::{BatchKey, CompletionEvent, ProducerStatus};
use gate_telemetry::tracing::init_test_tracing;

const LOGICAL_DATE: &str = "2025-01-10";

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
            LOGICAL_DATE,
            producer,
            ProducerStatus::Success,
            at("2025-01-16T02:00:00Z"),
        )
    })
    .collect()
}

#[tokio::test]
async fn failure_before_commit_leaves_no_state() {
    init_test_tracing();
    let scenario = GateFailScenario::setup(&[(RECORD_COMPLETION__BEFORE_COMMIT, "return")]);

    let clock = ManualClock::new(at("2025-01-16T03:00:00Z"));
    let store = MemoryCompletionStore::new();
    let dispatcher = MemoryDispatcher::new();
    let tracker = tracker(&clock, store.clone(), dispatcher.clone());
    let batch_key = BatchKey::new("raw", date(LOGICAL_DATE));
    let events = raw_events();

    let err = tracker.record_event(&events[0]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WithNoRetry);
    assert!(store.load_state(&batch_key).await.unwrap().is_none());

    // Redelivery after the fault clears behaves like a first delivery.
    scenario.disable(RECORD_COMPLETION__BEFORE_COMMIT);
    for completion in &events {
        tracker.record_event(completion).await.unwrap();
    }

    let stored = store.load_state(&batch_key).await.unwrap().unwrap();
    assert!(stored.state.triggered);
    assert_eq!(dispatcher.messages().await.len(), 1);
}

#[tokio::test]
async fn crash_between_commit_and_publish_is_recovered_after_claim_timeout() {
    init_test_tracing();
    let scenario = GateFailScenario::setup(&[(RECORD_COMPLETION__BEFORE_DISPATCH, "return(retry)")]);

    let clock = ManualClock::new(at("2025-01-16T03:00:00Z"));
    let store = MemoryCompletionStore::new();
    let dispatcher = MemoryDispatcher::new();
    let tracker = tracker(&clock, store.clone(), dispatcher.clone());
    let batch_key = BatchKey::new("raw", date(LOGICAL_DATE));
    let events = raw_events();

    for completion in &events[..3] {
        tracker.record_event(completion).await.unwrap();
    }

    let err = tracker.record_event(&events[3]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WithRetry);

    // The decision is committed and its message stays claimed by the failed publisher.
    let stored = store.load_state(&batch_key).await.unwrap().unwrap();
    assert!(stored.state.triggered);
    assert_eq!(store.outbox_status(&batch_key).await, Some(OutboxStatus::InFlight));
    assert!(dispatcher.messages().await.is_empty());

    scenario.disable(RECORD_COMPLETION__BEFORE_DISPATCH);

    // A redelivery within the claim timeout does not publish twice.
    let outcome = tracker.record_event(&events[3]).await.unwrap();
    assert_eq!(outcome.fold, Some(FoldOutcome::Unchanged));
    assert!(!outcome.republished);
    assert_eq!(tracker.flush_stale_triggers().await.unwrap(), 0);
    assert!(dispatcher.messages().await.is_empty());

    clock.advance(Duration::minutes(2));
    assert_eq!(tracker.flush_stale_triggers().await.unwrap(), 1);

    let messages = dispatcher.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].correlation_id, events[3].correlation_id);
    assert_eq!(store.outbox_status(&batch_key).await, Some(OutboxStatus::Published));
}
