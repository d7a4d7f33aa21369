use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use gate::clock::{Clock, ManualClock};
use gate::concurrency::shutdown::create_shutdown_channel;
use gate::deadline::{DeadlineMonitor, DeadlineVerdict, evaluate};
use gate::dispatch::memory::MemoryDispatcher;
use gate::state::completion::FoldOutcome;
use gate::store::base::CompletionStore;
use gate::store::memory::MemoryCompletionStore;
use gate::test_utils::fixtures::{at, date, deadline_config, event, tracker};
use gate::types::{BatchKey, ProducerStatus};
use gate::workers::deadline::{DeadlineWorker, sweep};
use gate_telemetry::tracing::init_test_tracing;

const SAME_DAY: &str = "2025-01-16";

fn raw_key() -> BatchKey {
    BatchKey::new("raw", date(SAME_DAY))
}

#[tokio::test]
async fn deadline_forces_one_degraded_trigger() {
    init_test_tracing();
    let clock = ManualClock::new(at("2025-01-16T03:00:00Z"));
    let store = MemoryCompletionStore::new();
    let dispatcher = MemoryDispatcher::new();
    let tracker = tracker(&clock, store.clone(), dispatcher.clone());
    let monitor = DeadlineMonitor::new(store.clone(), &deadline_config());

    for producer in ["ScheduleProcessor", "BoxScoresProcessor"] {
        let completion = event(
            "raw",
            SAME_DAY,
            producer,
            ProducerStatus::Success,
            at("2025-01-16T02:00:00Z"),
        );
        tracker.record_event(&completion).await.unwrap();
    }

    let summary = sweep(&tracker, &monitor, &clock).await.unwrap();
    assert_eq!(summary.forced, 0);
    assert!(dispatcher.messages().await.is_empty());

    // Exactly at the deadline the batch still waits.
    clock.set(at("2025-01-16T06:00:00Z"));
    let summary = sweep(&tracker, &monitor, &clock).await.unwrap();
    assert_eq!(summary.forced, 0);

    clock.advance(Duration::seconds(1));
    let summary = sweep(&tracker, &monitor, &clock).await.unwrap();
    assert_eq!(summary.forced, 1);
    assert_eq!(summary.dispatched, 1);

    let messages = dispatcher.messages().await;
    assert_eq!(messages.len(), 1);
    assert!(messages[0].degraded);
    assert!(messages[0].forced);
    assert_eq!(messages[0].missing_producers, vec!["injury_report"]);

    let stored = store.load_state(&raw_key()).await.unwrap().unwrap();
    assert!(stored.state.triggered);
    assert!(stored.state.degraded);
    assert!(stored.state.degraded_authorized);

    // Later sweeps and the late producer do not trigger again.
    clock.advance(Duration::minutes(10));
    let summary = sweep(&tracker, &monitor, &clock).await.unwrap();
    assert_eq!(summary.forced, 0);

    let late = event(
        "raw",
        SAME_DAY,
        "InjuryReportProcessor",
        ProducerStatus::Success,
        at("2025-01-16T06:20:00Z"),
    );
    let outcome = tracker.record_event(&late).await.unwrap();
    assert_eq!(outcome.fold, Some(FoldOutcome::Inserted));
    assert!(!outcome.dispatched);
    assert_eq!(dispatcher.messages().await.len(), 1);
}

#[tokio::test]
async fn deadline_never_forces_without_critical_producers() {
    init_test_tracing();
    let clock = ManualClock::new(at("2025-01-16T03:00:00Z"));
    let store = MemoryCompletionStore::new();
    let dispatcher = MemoryDispatcher::new();
    let tracker = tracker(&clock, store.clone(), dispatcher.clone());
    let monitor = DeadlineMonitor::new(store.clone(), &deadline_config());

    for (producer, status) in [
        ("ScheduleProcessor", ProducerStatus::Success),
        ("BoxScoresProcessor", ProducerStatus::Failed),
        ("InjuryReportProcessor", ProducerStatus::Success),
    ] {
        let completion = event("raw", SAME_DAY, producer, status, at("2025-01-16T02:00:00Z"));
        tracker.record_event(&completion).await.unwrap();
    }

    clock.advance(Duration::hours(12));
    let summary = sweep(&tracker, &monitor, &clock).await.unwrap();
    assert_eq!(summary.forced, 0);
    assert!(dispatcher.messages().await.is_empty());

    let stored = store.load_state(&raw_key()).await.unwrap().unwrap();
    assert!(!stored.state.triggered);
    assert_eq!(
        evaluate(&stored.state, clock.now(), Duration::hours(4)),
        DeadlineVerdict::AwaitingCritical {
            missing_critical: vec!["box_scores".to_string()]
        }
    );
}

#[tokio::test(start_paused = true)]
async fn deadline_worker_sweeps_until_shutdown() {
    init_test_tracing();
    let clock = ManualClock::new(at("2025-01-16T03:00:00Z"));
    let store = MemoryCompletionStore::new();
    let dispatcher = MemoryDispatcher::new();
    let tracker = tracker(&clock, store.clone(), dispatcher.clone());

    for producer in ["ScheduleProcessor", "BoxScoresProcessor"] {
        let completion = event(
            "raw",
            SAME_DAY,
            producer,
            ProducerStatus::Partial,
            at("2025-01-16T02:00:00Z"),
        );
        tracker.record_event(&completion).await.unwrap();
    }

    clock.advance(Duration::hours(5));

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let handle = DeadlineWorker::new(
        tracker.clone(),
        Arc::new(clock.clone()),
        &deadline_config(),
        shutdown_rx,
    )
    .start();

    assert!(
        dispatcher
            .wait_for_messages(1, StdDuration::from_secs(120))
            .await
    );

    shutdown_tx.shutdown();
    handle.wait().await.unwrap();

    let messages = dispatcher.messages().await;
    assert_eq!(messages.len(), 1);
    assert!(messages[0].forced);
}

