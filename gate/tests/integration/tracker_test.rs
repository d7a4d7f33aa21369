use chrono::Duration;
use gate::clock::ManualClock;
use gate::dispatch::memory::MemoryDispatcher;
use gate::error::ErrorKind;
use gate::expectation::ProcessingMode;
use gate::state::completion::FoldOutcome;
use gate::store::base::{CompletionStore, OutboxStatus};
use gate::store::memory::MemoryCompletionStore;
use gate::test_utils::fixtures::{at, date, event, tracker, tracker_config, tracker_with_config};
use gate::types::{BatchKey, ProducerStatus};
use gate_config::shared::TrackerConfig;
use gate_telemetry::tracing::init_test_tracing;

const HISTORICAL_DATE: &str = "2025-01-10";

fn clock() -> ManualClock {
    ManualClock::new(at("2025-01-16T03:00:00Z"))
}

fn raw_key(logical_date: &str) -> BatchKey {
    BatchKey::new("raw", date(logical_date))
}

#[tokio::test]
async fn duplicate_completion_is_a_no_op() {
    init_test_tracing();
    let clock = clock();
    let store = MemoryCompletionStore::new();
    let dispatcher = MemoryDispatcher::new();
    let tracker = tracker(&clock, store.clone(), dispatcher.clone());

    let schedule = event(
        "raw",
        HISTORICAL_DATE,
        "ScheduleProcessor",
        ProducerStatus::Success,
        at("2025-01-16T02:00:00Z"),
    );

    let first = tracker.record_event(&schedule).await.unwrap();
    assert_eq!(first.fold, Some(FoldOutcome::Inserted));

    clock.advance(Duration::minutes(5));
    let second = tracker.record_event(&schedule).await.unwrap();
    assert_eq!(second.fold, Some(FoldOutcome::Unchanged));
    assert!(!second.dispatched);

    let stored = store
        .load_state(&raw_key(HISTORICAL_DATE))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.state, first.state);
}

#[tokio::test]
async fn gate_opens_once_every_expected_producer_reported() {
    init_test_tracing();
    let clock = clock();
    let store = MemoryCompletionStore::new();
    let dispatcher = MemoryDispatcher::new();
    let tracker = tracker(&clock, store.clone(), dispatcher.clone());

    let producers = [
        "ScheduleProcessor",
        "BdlBoxScores",
        "InjuryReportProcessor",
        "OddsProcessor",
    ];

    let mut outcomes = Vec::new();
    for producer in producers {
        let completion = event(
            "raw",
            HISTORICAL_DATE,
            producer,
            ProducerStatus::Success,
            at("2025-01-16T02:00:00Z"),
        );
        outcomes.push(tracker.record_event(&completion).await.unwrap());
    }

    let dispatched: Vec<bool> = outcomes.iter().map(|o| o.dispatched).collect();
    assert_eq!(dispatched, vec![false, false, false, true]);

    let state = &outcomes[3].state;
    assert_eq!(state.mode, ProcessingMode::Historical);
    assert!(state.triggered);
    assert!(!state.degraded);

    let messages = dispatcher.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].stage_completed, "raw");
    assert!(!messages[0].degraded);
    assert!(!messages[0].forced);
    assert!(messages[0].missing_producers.is_empty());
    assert_eq!(
        messages[0].completed_producers,
        vec!["box_scores", "injury_report", "odds", "schedule"]
    );
    assert_eq!(
        store.outbox_status(&raw_key(HISTORICAL_DATE)).await,
        Some(OutboxStatus::Published)
    );
}

#[tokio::test]
async fn triggered_batch_never_triggers_again() {
    init_test_tracing();
    let clock = clock();
    let store = MemoryCompletionStore::new();
    let dispatcher = MemoryDispatcher::new();
    let tracker = tracker(&clock, store.clone(), dispatcher.clone());

    for producer in [
        "ScheduleProcessor",
        "BoxScoresProcessor",
        "InjuryReportProcessor",
        "OddsProcessor",
    ] {
        let completion = event(
            "raw",
            HISTORICAL_DATE,
            producer,
            ProducerStatus::Success,
            at("2025-01-16T02:00:00Z"),
        );
        tracker.record_event(&completion).await.unwrap();
    }

    // A late failure of a critical producer is folded but does not undo the trigger.
    let late_failure = event(
        "raw",
        HISTORICAL_DATE,
        "ScheduleProcessor",
        ProducerStatus::Failed,
        at("2025-01-16T04:00:00Z"),
    );
    let outcome = tracker.record_event(&late_failure).await.unwrap();

    assert_eq!(outcome.fold, Some(FoldOutcome::Updated));
    assert!(outcome.state.triggered);
    assert!(!outcome.dispatched);
    assert_eq!(dispatcher.messages().await.len(), 1);

    let stored = store
        .load_state(&raw_key(HISTORICAL_DATE))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.state.triggered);
    assert_eq!(
        stored.state.completions["schedule"].status,
        ProducerStatus::Failed
    );
}

#[tokio::test]
async fn failed_critical_producer_keeps_the_gate_closed() {
    init_test_tracing();
    let clock = clock();
    let dispatcher = MemoryDispatcher::new();
    let tracker = tracker(&clock, MemoryCompletionStore::new(), dispatcher.clone());

    for (producer, status) in [
        ("ScheduleProcessor", ProducerStatus::Failed),
        ("BoxScoresProcessor", ProducerStatus::Success),
        ("InjuryReportProcessor", ProducerStatus::Success),
        ("OddsProcessor", ProducerStatus::Partial),
    ] {
        let completion = event(
            "raw",
            HISTORICAL_DATE,
            producer,
            status,
            at("2025-01-16T02:00:00Z"),
        );
        let outcome = tracker.record_event(&completion).await.unwrap();
        assert!(!outcome.dispatched);
        assert!(!outcome.state.triggered);
    }

    assert!(dispatcher.messages().await.is_empty());
}

#[tokio::test]
async fn same_day_batch_waits_only_for_intraday_producers() {
    init_test_tracing();
    let clock = clock();
    let dispatcher = MemoryDispatcher::new();
    let tracker = tracker(&clock, MemoryCompletionStore::new(), dispatcher.clone());

    let mut last = None;
    for producer in ["ScheduleProcessor", "BoxScoresProcessor", "InjuryReportProcessor"] {
        let completion = event(
            "raw",
            "2025-01-16",
            producer,
            ProducerStatus::Success,
            at("2025-01-16T02:30:00Z"),
        );
        last = Some(tracker.record_event(&completion).await.unwrap());
    }

    let last = last.unwrap();
    assert_eq!(last.state.mode, ProcessingMode::SameDay);
    assert!(!last.state.expected_set.contains("odds"));
    assert!(!last.state.critical_set.contains("injury_report"));
    assert!(last.dispatched);
    assert_eq!(dispatcher.messages().await.len(), 1);
}

#[tokio::test]
async fn bootstrap_batch_expects_nothing_from_history_stages() {
    init_test_tracing();
    let clock = ManualClock::new(at("2024-10-26T03:00:00Z"));
    let tracker = tracker(&clock, MemoryCompletionStore::new(), MemoryDispatcher::new());

    let completion = event(
        "analytics",
        "2024-10-25",
        "PlayerGameSummaryProcessor",
        ProducerStatus::Success,
        at("2024-10-26T02:00:00Z"),
    );
    let outcome = tracker.record_event(&completion).await.unwrap();

    assert_eq!(outcome.state.mode, ProcessingMode::Bootstrap);
    assert!(outcome.state.expected_set.is_empty());
    assert!(outcome.state.critical_set.is_empty());
}

#[tokio::test]
async fn unknown_stage_is_rejected() {
    init_test_tracing();
    let clock = clock();
    let tracker = tracker(&clock, MemoryCompletionStore::new(), MemoryDispatcher::new());

    let completion = event(
        "reports",
        HISTORICAL_DATE,
        "ScheduleProcessor",
        ProducerStatus::Success,
        at("2025-01-16T02:00:00Z"),
    );
    let err = tracker.record_event(&completion).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnknownStage);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completions_trigger_exactly_once() {
    init_test_tracing();
    let clock = clock();
    let store = MemoryCompletionStore::new();
    let dispatcher = MemoryDispatcher::new();
    let config = TrackerConfig {
        max_commit_attempts: 64,
        ..tracker_config()
    };
    let tracker = tracker_with_config(&clock, store.clone(), dispatcher.clone(), config);

    let events: Vec<_> = [
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
    .collect();

    // Every event is delivered three times, all at once.
    let mut handles = Vec::new();
    for _ in 0..3 {
        for completion in &events {
            let tracker = tracker.clone();
            let completion = completion.clone();
            handles.push(tokio::spawn(async move {
                tracker.record_event(&completion).await
            }));
        }
    }

    let mut dispatched = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().dispatched {
            dispatched += 1;
        }
    }

    assert_eq!(dispatched, 1);
    assert_eq!(dispatcher.messages().await.len(), 1);

    let stored = store
        .load_state(&raw_key(HISTORICAL_DATE))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.state.triggered);
    assert_eq!(stored.state.completions.len(), 4);
}

#[tokio::test]
async fn failed_publication_is_republished_on_replay() {
    init_test_tracing();
    let clock = clock();
    let store = MemoryCompletionStore::new();
    let dispatcher = MemoryDispatcher::new();
    let tracker = tracker(&clock, store.clone(), dispatcher.clone());
    let batch_key = raw_key(HISTORICAL_DATE);

    let events: Vec<_> = [
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
    .collect();

    for completion in &events[..3] {
        tracker.record_event(completion).await.unwrap();
    }

    dispatcher.fail_next(1).await;
    let err = tracker.record_event(&events[3]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DispatchFailed);

    // The trigger decision is durable even though publication failed.
    let stored = store.load_state(&batch_key).await.unwrap().unwrap();
    assert!(stored.state.triggered);
    assert_eq!(store.outbox_status(&batch_key).await, Some(OutboxStatus::Pending));
    assert!(dispatcher.messages().await.is_empty());

    // The bus redelivers the event that failed.
    let outcome = tracker.record_event(&events[3]).await.unwrap();
    assert_eq!(outcome.fold, Some(FoldOutcome::Unchanged));
    assert!(!outcome.dispatched);
    assert!(outcome.republished);

    let messages = dispatcher.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].correlation_id, events[3].correlation_id);
    assert_eq!(store.outbox_status(&batch_key).await, Some(OutboxStatus::Published));
    assert_eq!(dispatcher.attempts().await, 2);

    // Nothing is left to flush.
    assert_eq!(tracker.flush_stale_triggers().await.unwrap(), 0);
}

#[tokio::test]
async fn stale_triggers_are_flushed() {
    init_test_tracing();
    let clock = clock();
    let store = MemoryCompletionStore::new();
    let dispatcher = MemoryDispatcher::new();
    let tracker = tracker(&clock, store.clone(), dispatcher.clone());
    let batch_key = raw_key(HISTORICAL_DATE);

    dispatcher.fail_next(1).await;
    for producer in [
        "ScheduleProcessor",
        "BoxScoresProcessor",
        "InjuryReportProcessor",
        "OddsProcessor",
    ] {
        let completion = event(
            "raw",
            HISTORICAL_DATE,
            producer,
            ProducerStatus::Success,
            at("2025-01-16T02:00:00Z"),
        );
        let _ = tracker.record_event(&completion).await;
    }

    assert_eq!(store.outbox_status(&batch_key).await, Some(OutboxStatus::Pending));

    assert_eq!(tracker.flush_stale_triggers().await.unwrap(), 1);
    assert_eq!(dispatcher.messages().await.len(), 1);
    assert_eq!(store.outbox_status(&batch_key).await, Some(OutboxStatus::Published));
    assert_eq!(tracker.flush_stale_triggers().await.unwrap(), 0);
}
