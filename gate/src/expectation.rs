//! Expected producer sets per stage, date and processing mode.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use gate_config::shared::{SeasonConfig, StageConfig, TableReference, ValidationError};
use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, GateResult};
use crate::types::normalize_producer_name;

/// How a batch is expected to be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Backfill of a past date. Every producer is expected.
    Historical,
    /// The date has not ended yet. Only producers able to run intraday are expected.
    SameDay,
    /// Early season. Stages that need history produce nothing.
    Bootstrap,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Historical => "historical",
            ProcessingMode::SameDay => "same_day",
            ProcessingMode::Bootstrap => "bootstrap",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A producer of a stage, with its name in canonical form.
#[derive(Debug, Clone)]
pub struct ProducerDefinition {
    pub name: String,
    pub critical: bool,
    pub same_day: bool,
    pub table: Option<TableReference>,
    pub date_column: Option<String>,
    pub expected_records: Option<u64>,
    pub quality_column: Option<String>,
}

/// A validated stage.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    pub name: String,
    pub requires_history: bool,
    pub producers: Vec<ProducerDefinition>,
    pub chains: Vec<String>,
    aliases: BTreeMap<String, String>,
}

impl StageDefinition {
    /// Maps a producer name as reported to its canonical name.
    pub fn canonical_producer(&self, raw: &str) -> String {
        let normalized = normalize_producer_name(raw);
        match self.aliases.get(&normalized) {
            Some(canonical) => canonical.clone(),
            None => normalized,
        }
    }
}

/// Stages known to the coordinator, built once from configuration.
#[derive(Debug, Clone, Default)]
pub struct StageCatalog {
    stages: BTreeMap<String, StageDefinition>,
}

impl StageCatalog {
    /// Builds the catalog, normalizing producer names and aliases.
    ///
    /// Fails when two producers of a stage share a canonical name or when an alias points to a
    /// producer the stage does not declare.
    pub fn new(configs: &[StageConfig]) -> Result<Self, ValidationError> {
        let mut stages = BTreeMap::new();

        for config in configs {
            config.validate()?;

            let mut producers: Vec<ProducerDefinition> = Vec::with_capacity(config.producers.len());
            for producer in &config.producers {
                let name = normalize_producer_name(&producer.name);
                if producers.iter().any(|p| p.name == name) {
                    return Err(ValidationError::DuplicateProducer {
                        stage: config.name.clone(),
                        producer: name,
                    });
                }

                producers.push(ProducerDefinition {
                    name,
                    critical: producer.critical,
                    same_day: producer.same_day,
                    table: producer.table.clone(),
                    date_column: producer.date_column.clone(),
                    expected_records: producer.expected_records,
                    quality_column: producer.quality_column.clone(),
                });
            }

            let mut aliases = BTreeMap::new();
            for (alias, target) in &config.aliases {
                let target = normalize_producer_name(target);
                if !producers.iter().any(|p| p.name == target) {
                    return Err(ValidationError::InvalidFieldValue {
                        field: format!("stages.{}.aliases.{alias}", config.name),
                        constraint: format!("`{target}` is not a producer of the stage"),
                    });
                }
                aliases.insert(normalize_producer_name(alias), target);
            }

            let stage = StageDefinition {
                name: config.name.clone(),
                requires_history: config.requires_history,
                producers,
                chains: config.chains.clone(),
                aliases,
            };

            if stages.insert(config.name.clone(), stage).is_some() {
                return Err(ValidationError::DuplicateStage(config.name.clone()));
            }
        }

        Ok(Self { stages })
    }

    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.get(name)
    }

    /// Returns the stage or an [`ErrorKind::UnknownStage`] error.
    pub fn require_stage(&self, name: &str) -> GateResult<&StageDefinition> {
        match self.stages.get(name) {
            Some(stage) => Ok(stage),
            None => bail!(
                ErrorKind::UnknownStage,
                "Stage is not declared",
                format!("stage `{name}` is not declared in the configuration")
            ),
        }
    }

    pub fn stages(&self) -> impl Iterator<Item = &StageDefinition> {
        self.stages.values()
    }
}

/// Season calendar deciding bootstrap windows and "today".
#[derive(Debug, Clone)]
pub struct SeasonCalendar {
    season_starts: Vec<NaiveDate>,
    bootstrap_days: u32,
    utc_offset: Duration,
}

impl SeasonCalendar {
    pub fn new(config: &SeasonConfig) -> Self {
        let mut season_starts = config.season_starts.clone();
        season_starts.sort_unstable();
        season_starts.dedup();

        Self {
            season_starts,
            bootstrap_days: config.bootstrap_days,
            utc_offset: Duration::minutes(i64::from(config.utc_offset_minutes)),
        }
    }

    /// Returns the calendar date at `now` in the configured offset.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        (now + self.utc_offset).date_naive()
    }

    /// Returns `true` when `date` falls within `bootstrap_days` of the latest season start on or
    /// before it.
    pub fn in_bootstrap_window(&self, date: NaiveDate) -> bool {
        let Some(season_start) = self.season_starts.iter().rev().find(|start| **start <= date)
        else {
            return false;
        };

        (date - *season_start).num_days() < i64::from(self.bootstrap_days)
    }
}

/// Expected and critical producers of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    pub mode: ProcessingMode,
    pub expected: BTreeSet<String>,
    pub critical: BTreeSet<String>,
}

/// Resolves which producers a batch waits for.
///
/// Resolution never reads the wall clock: callers pass "today" explicitly.
#[derive(Debug, Clone)]
pub struct ExpectationResolver {
    catalog: Arc<StageCatalog>,
    calendar: SeasonCalendar,
}

impl ExpectationResolver {
    pub fn new(catalog: Arc<StageCatalog>, calendar: SeasonCalendar) -> Self {
        Self { catalog, calendar }
    }

    pub fn catalog(&self) -> &Arc<StageCatalog> {
        &self.catalog
    }

    pub fn calendar(&self) -> &SeasonCalendar {
        &self.calendar
    }

    /// Derives the processing mode of a batch.
    pub fn mode_for(
        &self,
        stage: &StageDefinition,
        logical_date: NaiveDate,
        today: NaiveDate,
    ) -> ProcessingMode {
        if stage.requires_history && self.calendar.in_bootstrap_window(logical_date) {
            ProcessingMode::Bootstrap
        } else if logical_date >= today {
            ProcessingMode::SameDay
        } else {
            ProcessingMode::Historical
        }
    }

    /// Returns the expected and critical producers of `stage` in `mode`.
    ///
    /// Bootstrap only empties the sets of stages that require history. For other stages it
    /// expects what a historical run would.
    pub fn expected(&self, stage: &StageDefinition, mode: ProcessingMode) -> Expectation {
        let (expected, critical) = match mode {
            ProcessingMode::Bootstrap if stage.requires_history => {
                (BTreeSet::new(), BTreeSet::new())
            }
            ProcessingMode::Historical | ProcessingMode::Bootstrap => {
                let all: BTreeSet<String> =
                    stage.producers.iter().map(|p| p.name.clone()).collect();
                (all.clone(), all)
            }
            ProcessingMode::SameDay => {
                let expected = stage
                    .producers
                    .iter()
                    .filter(|p| p.same_day)
                    .map(|p| p.name.clone())
                    .collect();
                let critical = stage
                    .producers
                    .iter()
                    .filter(|p| p.same_day && p.critical)
                    .map(|p| p.name.clone())
                    .collect();
                (expected, critical)
            }
        };

        Expectation {
            mode,
            expected,
            critical,
        }
    }

    /// Derives the mode of a batch and returns its expectation.
    pub fn resolve(
        &self,
        stage: &str,
        logical_date: NaiveDate,
        today: NaiveDate,
    ) -> GateResult<Expectation> {
        let stage = self.catalog.require_stage(stage)?;
        let mode = self.mode_for(stage, logical_date, today);

        Ok(self.expected(stage, mode))
    }
}

#[cfg(test)]
mod tests {
    use gate_config::shared::ProducerConfig;

    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn producer(name: &str, critical: bool, same_day: bool) -> ProducerConfig {
        ProducerConfig {
            name: name.to_string(),
            critical,
            same_day,
            table: None,
            date_column: None,
            expected_records: None,
            quality_column: None,
        }
    }

    fn resolver() -> ExpectationResolver {
        let stages = vec![
            StageConfig {
                name: "raw".to_string(),
                requires_history: false,
                producers: vec![
                    producer("ScheduleProcessor", true, true),
                    producer("box_scores", true, false),
                    producer("injury_report", false, true),
                ],
                chains: vec![],
                aliases: BTreeMap::from([("bdl_box".to_string(), "box_scores".to_string())]),
            },
            StageConfig {
                name: "precompute".to_string(),
                requires_history: true,
                producers: vec![producer("rolling_averages", true, true)],
                chains: vec![],
                aliases: BTreeMap::new(),
            },
        ];
        let season = SeasonConfig {
            season_starts: vec![date("2024-10-22")],
            bootstrap_days: 14,
            utc_offset_minutes: -300,
        };

        ExpectationResolver::new(
            Arc::new(StageCatalog::new(&stages).unwrap()),
            SeasonCalendar::new(&season),
        )
    }

    #[test]
    fn historical_expects_every_producer_as_critical() {
        let expectation = resolver()
            .resolve("raw", date("2025-01-10"), date("2025-01-15"))
            .unwrap();

        assert_eq!(expectation.mode, ProcessingMode::Historical);
        assert_eq!(expectation.expected.len(), 3);
        assert_eq!(expectation.expected, expectation.critical);
        assert!(expectation.expected.contains("schedule"));
    }

    #[test]
    fn same_day_expects_intraday_producers() {
        let expectation = resolver()
            .resolve("raw", date("2025-01-15"), date("2025-01-15"))
            .unwrap();

        assert_eq!(expectation.mode, ProcessingMode::SameDay);
        assert_eq!(
            expectation.expected,
            BTreeSet::from(["injury_report".to_string(), "schedule".to_string()])
        );
        assert_eq!(
            expectation.critical,
            BTreeSet::from(["schedule".to_string()])
        );
    }

    #[test]
    fn bootstrap_window_empties_history_stages() {
        let resolver = resolver();

        let inside = resolver
            .resolve("precompute", date("2024-11-04"), date("2025-01-15"))
            .unwrap();
        assert_eq!(inside.mode, ProcessingMode::Bootstrap);
        assert!(inside.expected.is_empty());
        assert!(inside.critical.is_empty());

        let after = resolver
            .resolve("precompute", date("2024-11-05"), date("2025-01-15"))
            .unwrap();
        assert_eq!(after.mode, ProcessingMode::Historical);
    }

    #[test]
    fn bootstrap_does_not_apply_before_first_season() {
        let mode = resolver()
            .resolve("precompute", date("2024-10-01"), date("2025-01-15"))
            .unwrap()
            .mode;

        assert_eq!(mode, ProcessingMode::Historical);
    }

    #[test]
    fn today_honors_offset() {
        let calendar = resolver().calendar().clone();
        let now = DateTime::parse_from_rfc3339("2025-01-16T03:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(calendar.today(now), date("2025-01-15"));
    }

    #[test]
    fn aliases_map_to_canonical_producers() {
        let resolver = resolver();
        let stage = resolver.catalog().stage("raw").unwrap();

        assert_eq!(stage.canonical_producer("BdlBox"), "box_scores");
        assert_eq!(stage.canonical_producer("ScheduleProcessor"), "schedule");
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let err = resolver()
            .resolve("nope", date("2025-01-10"), date("2025-01-15"))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnknownStage);
    }

    #[test]
    fn duplicate_canonical_producers_are_rejected() {
        let stages = vec![StageConfig {
            name: "raw".to_string(),
            requires_history: false,
            producers: vec![
                producer("ScheduleProcessor", true, true),
                producer("schedule", true, true),
            ],
            chains: vec![],
            aliases: BTreeMap::new(),
        }];

        assert!(matches!(
            StageCatalog::new(&stages),
            Err(ValidationError::DuplicateProducer { .. })
        ));
    }
}
