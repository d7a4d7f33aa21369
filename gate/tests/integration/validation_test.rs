use gate::chain::resolver::{ChainStatus, SourceStatus};
use gate::clock::ManualClock;
use gate::counting::base::CountError;
use gate::counting::memory::MemoryCountingBackend;
use gate::error::ErrorKind;
use gate::expectation::ProcessingMode;
use gate::test_utils::fixtures::{at, date, table, validator};
use gate::validation::report::ValidationOutcome;
use gate::validation::table::ValidationStatus;
use gate::validation::validator::{DateSelection, ValidationRequest};
use gate_config::shared::QualityTier;
use gate_telemetry::tracing::init_test_tracing;

fn clock() -> ManualClock {
    ManualClock::new(at("2025-01-16T12:00:00Z"))
}

fn request(stages: &[&str], dates: DateSelection) -> ValidationRequest {
    ValidationRequest {
        stages: stages.iter().map(|stage| stage.to_string()).collect(),
        dates,
        mode_override: None,
    }
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

/// Scripts a date on which every table and the primary sources have data.
fn script_complete_date(counting: &MemoryCountingBackend, day: &str) {
    let day = date(day);
    counting.set_count(&table("raw.schedule"), day, 12);
    counting.set_count(&table("raw.box_scores"), day, 100);
    counting.set_count(&table("raw.odds"), day, 50);
    counting.set_value_counts(
        &table("analytics.player_game_summary"),
        day,
        [(Some("gold".to_string()), 80), (Some("Silver".to_string()), 20)],
    );
    counting.set_count(&table("raw.odds_api_props"), day, 300);
    counting.set_count(&table("staging.odds_api_props"), day, 300);
}

#[tokio::test]
async fn complete_date_passes() {
    init_test_tracing();
    let clock = clock();
    let counting = MemoryCountingBackend::new();
    script_complete_date(&counting, "2025-01-15");
    let validator = validator(&clock, counting);

    let report = validator
        .validate(&request(&[], DateSelection::Single(date("2025-01-15"))))
        .await
        .unwrap();

    assert_eq!(report.outcome, ValidationOutcome::Complete);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.dates.len(), 1);

    let day = &report.dates[0];
    assert!(!day.bootstrap_weights);
    assert_close(day.progress_percent, 100.0);
    assert!(day.issues.is_empty());
    assert!(day.warnings.is_empty());

    let stages: Vec<_> = day
        .phases
        .iter()
        .map(|phase| (phase.stage.as_str(), phase.mode, phase.status))
        .collect();
    assert_eq!(
        stages,
        vec![
            ("analytics", ProcessingMode::Historical, ValidationStatus::Complete),
            ("raw", ProcessingMode::Historical, ValidationStatus::Complete),
        ]
    );

    let analytics = &day.phases[0];
    let summary = &analytics.tables["player_game_summary"];
    assert_eq!(summary.record_count, Some(100));
    let quality = summary.quality.unwrap();
    assert_eq!((quality.gold, quality.silver, quality.bronze), (80, 20, 0));
    assert_eq!(analytics.chains["player_props"], ValidationStatus::Complete);

    // Producers without a table are not counted.
    assert!(!day.phases[1].tables.contains_key("injury_report"));

    let props = &day.chains["player_props"];
    assert_eq!(props.status, ChainStatus::Complete);
    assert!(props.primary_available);
    assert!(!props.fallback_used);
    assert_eq!(props.source_in_use.as_deref(), Some("odds_api"));
    assert_eq!(props.quality_tier, Some(QualityTier::Gold));

    // The virtual source is usable but a higher priority source is in use.
    assert_eq!(props.sources[2].status, SourceStatus::Available);

    // Dependencies of validated chains are resolved and reported.
    assert_eq!(day.chains["game_schedule"].status, ChainStatus::Complete);
}

#[tokio::test]
async fn fallback_and_partial_data_are_incomplete() {
    init_test_tracing();
    let clock = clock();
    let counting = MemoryCountingBackend::new();
    let day = date("2025-01-14");
    counting.set_count(&table("raw.schedule"), day, 12);
    counting.set_count(&table("raw.box_scores"), day, 50);
    counting.set_value_counts(
        &table("analytics.player_game_summary"),
        day,
        [(Some("bronze".to_string()), 40), (None, 10)],
    );
    counting.set_count(&table("staging.odds_api_props"), day, 25);
    counting.set_count(&table("raw.bettingpros_props"), day, 30);
    let validator = validator(&clock, counting);

    let report = validator
        .validate(&request(&[], DateSelection::Single(day)))
        .await
        .unwrap();

    assert_eq!(report.outcome, ValidationOutcome::Incomplete);
    assert_eq!(report.exit_code(), 1);

    let day = &report.dates[0];
    let raw = day.phases.iter().find(|phase| phase.stage == "raw").unwrap();
    assert_eq!(raw.status, ValidationStatus::Partial);
    assert_eq!(raw.tables["box_scores"].status, ValidationStatus::Partial);
    assert_eq!(raw.tables["odds"].status, ValidationStatus::Missing);
    assert_close(raw.score, 0.5);
    assert_eq!(raw.total_records, 62);

    let analytics = day
        .phases
        .iter()
        .find(|phase| phase.stage == "analytics")
        .unwrap();
    assert_eq!(analytics.status, ValidationStatus::Complete);
    let quality = analytics.tables["player_game_summary"].quality.unwrap();
    assert_eq!((quality.bronze, quality.unknown), (40, 10));

    // 0.4 * 0.5 + 0.6 * 1.0
    assert_close(day.progress_percent, 80.0);

    let props = &day.chains["player_props"];
    assert_eq!(props.status, ChainStatus::Complete);
    assert!(props.fallback_used);
    assert_eq!(props.source_in_use.as_deref(), Some("bettingpros"));
    assert_eq!(props.quality_tier, Some(QualityTier::Bronze));
    assert!(props.sources[0].raw_not_processed());

    let mut issue_subjects: Vec<_> = day.issues.iter().map(|f| f.subject.as_str()).collect();
    issue_subjects.sort_unstable();
    assert_eq!(issue_subjects, vec!["box_scores", "odds"]);
    assert!(day.issues.iter().all(|f| f.stage.as_deref() == Some("raw")));

    let mut warning_subjects: Vec<_> = day.warnings.iter().map(|f| f.subject.as_str()).collect();
    warning_subjects.sort_unstable();
    assert_eq!(
        warning_subjects,
        vec!["odds_api", "player_props", "player_props"]
    );
}

#[tokio::test]
async fn timed_out_chain_is_an_error_not_missing_data() {
    init_test_tracing();
    let clock = clock();
    let counting = MemoryCountingBackend::new();
    counting.fail_table(&table("raw.odds_api_props"), CountError::Timeout);
    counting.fail_table(
        &table("raw.bettingpros_props"),
        CountError::NotFound("raw.bettingpros_props".to_string()),
    );
    let validator = validator(&clock, counting);

    let report = validator
        .validate(&request(
            &["analytics"],
            DateSelection::Single(date("2025-01-13")),
        ))
        .await
        .unwrap();

    assert_eq!(report.outcome, ValidationOutcome::Error);
    assert_eq!(report.exit_code(), 2);

    let day = &report.dates[0];
    assert_eq!(day.phases.len(), 1);

    let props = &day.chains["player_props"];
    assert_eq!(props.status, ChainStatus::Timeout);
    assert_eq!(props.sources[0].status, SourceStatus::Timeout);
    assert_eq!(props.sources[1].status, SourceStatus::Error);
    assert_eq!(props.sources[2].status, SourceStatus::VirtualUnavailable);
    assert!(props.impact_message.is_none());

    let schedule = &day.chains["game_schedule"];
    assert_eq!(schedule.status, ChainStatus::Missing);
    assert_eq!(schedule.quality_impact_score, Some(0.0));

    let analytics = &day.phases[0];
    assert_eq!(analytics.chains["player_props"], ValidationStatus::Error);
    assert_eq!(analytics.status, ValidationStatus::Error);
}

#[tokio::test]
async fn missing_chain_carries_its_impact() {
    init_test_tracing();
    let clock = clock();
    let counting = MemoryCountingBackend::new();
    let day = date("2025-01-12");
    counting.set_count(&table("analytics.player_game_summary"), day, 90);
    let validator = validator(&clock, counting);

    let report = validator
        .validate(&request(&["analytics"], DateSelection::Single(day)))
        .await
        .unwrap();

    assert_eq!(report.outcome, ValidationOutcome::Incomplete);

    let day = &report.dates[0];
    let props = &day.chains["player_props"];
    assert_eq!(props.status, ChainStatus::Missing);
    assert_eq!(
        props.impact_message.as_deref(),
        Some("no prop lines, predictions use defaults")
    );
    assert_eq!(props.quality_impact_score, Some(0.3));

    let props_issue = day
        .issues
        .iter()
        .find(|finding| finding.subject == "player_props")
        .unwrap();
    assert!(props_issue.stage.is_none());
    assert!(props_issue.message.contains("predictions use defaults"));

    // A table with rows next to a missing chain makes the stage partial.
    assert_eq!(day.phases[0].status, ValidationStatus::Partial);
}

#[tokio::test]
async fn bootstrap_window_skips_history_stages() {
    init_test_tracing();
    let clock = clock();
    let counting = MemoryCountingBackend::new();
    let day = date("2024-10-25");
    counting.set_count(&table("raw.schedule"), day, 5);
    counting.set_count(&table("raw.box_scores"), day, 100);
    counting.set_count(&table("raw.odds"), day, 3);
    let validator = validator(&clock, counting);

    let report = validator
        .validate(&request(&[], DateSelection::Single(day)))
        .await
        .unwrap();

    assert_eq!(report.outcome, ValidationOutcome::Complete);

    let day = &report.dates[0];
    assert!(day.bootstrap_weights);
    assert!(day.chains.is_empty());
    assert_close(day.progress_percent, 100.0);

    let analytics = &day.phases[0];
    assert_eq!(analytics.mode, ProcessingMode::Bootstrap);
    assert_eq!(analytics.status, ValidationStatus::BootstrapSkip);
    assert_eq!(
        analytics.tables["player_game_summary"].status,
        ValidationStatus::BootstrapSkip
    );
    assert!(analytics.chains.is_empty());
}

#[tokio::test]
async fn mode_override_limits_expected_tables() {
    init_test_tracing();
    let clock = clock();
    let counting = MemoryCountingBackend::new();
    let day = date("2025-01-15");
    counting.set_count(&table("raw.schedule"), day, 12);
    counting.set_count(&table("raw.box_scores"), day, 100);
    let validator = validator(&clock, counting);

    let report = validator
        .validate(&ValidationRequest {
            stages: vec!["raw".to_string()],
            dates: DateSelection::Single(day),
            mode_override: Some(ProcessingMode::SameDay),
        })
        .await
        .unwrap();

    assert_eq!(report.outcome, ValidationOutcome::Complete);

    let raw = &report.dates[0].phases[0];
    assert_eq!(raw.mode, ProcessingMode::SameDay);
    assert_eq!(raw.tables["odds"].status, ValidationStatus::NotApplicable);
    assert_eq!(raw.tables["odds"].record_count, None);
    assert_eq!(raw.status, ValidationStatus::Complete);
}

#[tokio::test]
async fn date_ranges_report_every_date_in_order() {
    init_test_tracing();
    let clock = clock();
    let counting = MemoryCountingBackend::new();
    script_complete_date(&counting, "2025-01-15");
    let validator = validator(&clock, counting);

    let report = validator
        .validate(&request(
            &[],
            DateSelection::Range {
                start: date("2025-01-13"),
                end: date("2025-01-15"),
            },
        ))
        .await
        .unwrap();

    let dates: Vec<_> = report.dates.iter().map(|day| day.date).collect();
    assert_eq!(
        dates,
        vec![date("2025-01-13"), date("2025-01-14"), date("2025-01-15")]
    );
    assert!(!report.dates[0].is_complete());
    assert!(report.dates[2].is_complete());
    assert_eq!(report.outcome, ValidationOutcome::Incomplete);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    init_test_tracing();
    let clock = clock();
    let validator = validator(&clock, MemoryCountingBackend::new());

    let err = validator
        .validate(&request(
            &["reports"],
            DateSelection::Single(date("2025-01-15")),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownStage);

    let err = validator
        .validate(&request(
            &[],
            DateSelection::Range {
                start: date("2025-01-15"),
                end: date("2025-01-14"),
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}
