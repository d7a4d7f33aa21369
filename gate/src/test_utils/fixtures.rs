//! A small two-stage pipeline with chains, wired to in-memory backends.
//!
//! `raw` has two critical producers, one optional producer and one producer that does not run
//! intraday. Outside of same-day processing every producer is critical.
//! `analytics` needs history and validates the `player_props` chain, whose virtual source
//! derives from `game_schedule`. The season starts on 2024-10-22 with a 14 day bootstrap window.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use gate_config::shared::{
    ChainConfig, DeadlineConfig, SeasonConfig, StageConfig, TableReference, TrackerConfig,
    ValidationConfig,
};
use serde_json::json;
use uuid::Uuid;

use crate::chain::catalog::ChainCatalog;
use crate::chain::resolver::ChainResolver;
use crate::clock::ManualClock;
use crate::counting::memory::MemoryCountingBackend;
use crate::dispatch::memory::MemoryDispatcher;
use crate::expectation::{ExpectationResolver, SeasonCalendar, StageCatalog};
use crate::store::memory::MemoryCompletionStore;
use crate::tracker::CompletionTracker;
use crate::types::{CompletionEvent, ProducerStatus};
use crate::validation::validator::Validator;

pub type TestTracker = CompletionTracker<MemoryCompletionStore, MemoryDispatcher>;

pub fn date(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
}

pub fn at(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn table(value: &str) -> TableReference {
    TableReference::parse(value).unwrap()
}

pub fn stages() -> Vec<StageConfig> {
    serde_json::from_value(json!([
        {
            "name": "raw",
            "producers": [
                { "name": "ScheduleProcessor", "table": "raw.schedule" },
                {
                    "name": "BoxScoresProcessor",
                    "table": "raw.box_scores",
                    "expected_records": 100
                },
                { "name": "InjuryReportProcessor", "critical": false },
                {
                    "name": "OddsProcessor",
                    "critical": false,
                    "same_day": false,
                    "table": "raw.odds"
                }
            ],
            "aliases": { "BdlBoxScores": "box_scores" }
        },
        {
            "name": "analytics",
            "requires_history": true,
            "producers": [
                {
                    "name": "PlayerGameSummaryProcessor",
                    "table": "analytics.player_game_summary",
                    "quality_column": "quality_tier"
                }
            ],
            "chains": ["player_props"]
        }
    ]))
    .unwrap()
}

pub fn chains() -> Vec<ChainConfig> {
    serde_json::from_value(json!([
        {
            "name": "player_props",
            "severity": "critical",
            "quality_impact_score": 0.3,
            "missing_message": "no prop lines, predictions use defaults",
            "sources": [
                {
                    "name": "odds_api",
                    "table": "raw.odds_api_props",
                    "availability_table": "staging.odds_api_props",
                    "primary": true,
                    "quality_tier": "gold",
                    "quality_score": 1.0
                },
                {
                    "name": "bettingpros",
                    "table": "raw.bettingpros_props",
                    "quality_tier": "bronze",
                    "quality_score": 0.6,
                    "min_records": 10
                },
                {
                    "name": "schedule_estimates",
                    "virtual": true,
                    "depends_on": "game_schedule",
                    "quality_tier": "bronze",
                    "quality_score": 0.3
                }
            ]
        },
        {
            "name": "game_schedule",
            "severity": "warning",
            "sources": [
                {
                    "name": "nba_com",
                    "table": "raw.schedule",
                    "primary": true,
                    "quality_tier": "gold",
                    "quality_score": 1.0
                },
                {
                    "name": "espn",
                    "table": "raw.espn_schedule",
                    "quality_tier": "silver",
                    "quality_score": 0.8
                }
            ]
        }
    ]))
    .unwrap()
}

pub fn season() -> SeasonConfig {
    SeasonConfig {
        season_starts: vec![date("2024-10-22")],
        bootstrap_days: 14,
        utc_offset_minutes: 0,
    }
}

pub fn resolver() -> Arc<ExpectationResolver> {
    let catalog = StageCatalog::new(&stages()).unwrap();
    Arc::new(ExpectationResolver::new(
        Arc::new(catalog),
        SeasonCalendar::new(&season()),
    ))
}

/// Tracker settings with short backoffs.
pub fn tracker_config() -> TrackerConfig {
    TrackerConfig {
        max_commit_attempts: 8,
        initial_backoff_ms: 1,
        max_backoff_ms: 10,
        trigger_claim_timeout_ms: 60_000,
    }
}

pub fn deadline_config() -> DeadlineConfig {
    DeadlineConfig {
        timeout_secs: 4 * 60 * 60,
        sweep_interval_secs: 60,
    }
}

pub fn tracker(
    clock: &ManualClock,
    store: MemoryCompletionStore,
    dispatcher: MemoryDispatcher,
) -> Arc<TestTracker> {
    tracker_with_config(clock, store, dispatcher, tracker_config())
}

pub fn tracker_with_config(
    clock: &ManualClock,
    store: MemoryCompletionStore,
    dispatcher: MemoryDispatcher,
    config: TrackerConfig,
) -> Arc<TestTracker> {
    Arc::new(CompletionTracker::new(
        store,
        dispatcher,
        resolver(),
        Arc::new(clock.clone()),
        config,
    ))
}

/// Validation settings weighting `analytics` over `raw`, with only `raw` counting during
/// bootstrap.
pub fn validation_config() -> ValidationConfig {
    serde_json::from_value(json!({
        "progress": {
            "regular": { "raw": 0.4, "analytics": 0.6 },
            "bootstrap": { "raw": 1.0 }
        }
    }))
    .unwrap()
}

pub fn validator(
    clock: &ManualClock,
    counting: MemoryCountingBackend,
) -> Validator<MemoryCountingBackend> {
    let config = validation_config();
    let catalog = Arc::new(ChainCatalog::new(&chains()).unwrap());
    let chain_resolver = ChainResolver::new(
        counting.clone(),
        catalog,
        config.default_date_column.clone(),
    );

    Validator::new(
        resolver(),
        chain_resolver,
        counting,
        config,
        Arc::new(clock.clone()),
    )
}

pub fn event(
    stage: &str,
    logical_date: &str,
    producer_name: &str,
    status: ProducerStatus,
    timestamp: DateTime<Utc>,
) -> CompletionEvent {
    CompletionEvent {
        stage: stage.to_string(),
        logical_date: date(logical_date),
        producer_name: producer_name.to_string(),
        status,
        record_count: 100,
        correlation_id: Uuid::new_v4().to_string(),
        timestamp,
    }
}
