//! Validation requests: which stages produced what, and which chain sources serve them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use futures::StreamExt;
use futures::future::join_all;
use futures::stream;
use gate_config::shared::{ChainSeverity, QualityTier, TableReference, ValidationConfig};
use tracing::info;

use crate::bail;
use crate::chain::resolver::{
    ChainResolver, ChainStatus, ChainValidation, SourceStatus, record_count_failure,
};
use crate::clock::Clock;
use crate::counting::base::CountingBackend;
use crate::error::{ErrorKind, GateResult};
use crate::expectation::{ExpectationResolver, ProcessingMode, ProducerDefinition, StageDefinition};
use crate::validation::phase::{
    Constituent, PhaseStatusAggregator, StageScore, WeightSet,
};
use crate::validation::report::{DateReport, Finding, PhaseValidationResult, ValidationReport};
use crate::validation::table::{
    QualityDistribution, TableValidation, ValidationStatus, table_status,
};

/// Dates a validation request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSelection {
    Single(NaiveDate),
    /// Inclusive range.
    Range { start: NaiveDate, end: NaiveDate },
}

impl DateSelection {
    /// Expands the selection into its dates, in order.
    pub fn dates(&self) -> GateResult<Vec<NaiveDate>> {
        match *self {
            DateSelection::Single(date) => Ok(vec![date]),
            DateSelection::Range { start, end } => {
                if start > end {
                    bail!(
                        ErrorKind::InvalidRequest,
                        "Date range is reversed",
                        format!("start {start} is after end {end}")
                    );
                }

                Ok(start.iter_days().take_while(|date| *date <= end).collect())
            }
        }
    }
}

/// A validation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRequest {
    /// Stages to validate. Empty means every stage.
    pub stages: Vec<String>,
    pub dates: DateSelection,
    /// Processing mode to use instead of the one derived from each date.
    pub mode_override: Option<ProcessingMode>,
}

/// A stage as evaluated on one date.
struct StagePlan<'a> {
    stage: &'a StageDefinition,
    mode: ProcessingMode,
    bootstrap_skip: bool,
    expected: BTreeSet<String>,
}

/// Validates stage outputs and chains against the counting backend.
#[derive(Debug)]
pub struct Validator<C> {
    resolver: Arc<ExpectationResolver>,
    chains: ChainResolver<C>,
    counting: C,
    aggregator: PhaseStatusAggregator,
    config: ValidationConfig,
    clock: Arc<dyn Clock>,
}

impl<C> Validator<C>
where
    C: CountingBackend + Sync,
{
    pub fn new(
        resolver: Arc<ExpectationResolver>,
        chains: ChainResolver<C>,
        counting: C,
        config: ValidationConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver,
            chains,
            counting,
            aggregator: PhaseStatusAggregator::new(&config),
            config,
            clock,
        }
    }

    /// Validates the requested stages on every requested date.
    ///
    /// Up to `max_concurrent_dates` dates are validated at the same time. Failed count queries
    /// are reported in the report, never as an error of this call.
    pub async fn validate(&self, request: &ValidationRequest) -> GateResult<ValidationReport> {
        let catalog = self.resolver.catalog();
        let stages: Vec<&StageDefinition> = if request.stages.is_empty() {
            catalog.stages().collect()
        } else {
            request
                .stages
                .iter()
                .map(|name| catalog.require_stage(name))
                .collect::<GateResult<_>>()?
        };

        let dates = request.dates.dates()?;
        let now = self.clock.now();
        let today = self.resolver.calendar().today(now);

        let reports: Vec<DateReport> = stream::iter(dates)
            .map(|date| self.validate_date(&stages, date, today, request.mode_override))
            .buffered(self.config.max_concurrent_dates.max(1))
            .collect()
            .await;

        let report = ValidationReport::new(now, reports);
        info!(
            dates = report.dates.len(),
            stages = stages.len(),
            outcome = ?report.outcome,
            "validation finished"
        );

        Ok(report)
    }

    async fn validate_date(
        &self,
        stages: &[&StageDefinition],
        date: NaiveDate,
        today: NaiveDate,
        mode_override: Option<ProcessingMode>,
    ) -> DateReport {
        let plans: Vec<StagePlan<'_>> = stages
            .iter()
            .map(|&stage| {
                let mode =
                    mode_override.unwrap_or_else(|| self.resolver.mode_for(stage, date, today));
                let expectation = self.resolver.expected(stage, mode);

                StagePlan {
                    stage,
                    mode,
                    bootstrap_skip: mode == ProcessingMode::Bootstrap && stage.requires_history,
                    expected: expectation.expected,
                }
            })
            .collect();

        let chain_names: BTreeSet<&str> = plans
            .iter()
            .filter(|plan| !plan.bootstrap_skip)
            .flat_map(|plan| plan.stage.chains.iter().map(String::as_str))
            .collect();
        let chains = self.chains.resolve_named(chain_names, date).await;

        let phases = join_all(
            plans
                .iter()
                .map(|plan| self.validate_phase(plan, date, &chains)),
        )
        .await;

        let weight_set = if mode_override == Some(ProcessingMode::Bootstrap)
            || self.resolver.calendar().in_bootstrap_window(date)
        {
            WeightSet::Bootstrap
        } else {
            WeightSet::Regular
        };

        let scores: Vec<StageScore> = phases
            .iter()
            .map(|phase| StageScore {
                stage: phase.stage.clone(),
                score: phase.score,
            })
            .collect();
        let progress_percent = self.aggregator.progress(&scores, weight_set);

        let mut issues = Vec::new();
        let mut warnings = Vec::new();
        for phase in &phases {
            collect_table_findings(phase, &mut issues);
        }
        for chain in chains.values() {
            collect_chain_findings(chain, &mut issues, &mut warnings);
        }

        info!(
            %date,
            progress_percent,
            issues = issues.len(),
            warnings = warnings.len(),
            "date validated"
        );

        DateReport {
            date,
            bootstrap_weights: weight_set == WeightSet::Bootstrap,
            phases,
            chains,
            progress_percent,
            issues,
            warnings,
        }
    }

    async fn validate_phase(
        &self,
        plan: &StagePlan<'_>,
        date: NaiveDate,
        chains: &BTreeMap<String, ChainValidation>,
    ) -> PhaseValidationResult {
        let tables: Vec<TableValidation> = join_all(plan.stage.producers.iter().filter_map(|producer| {
            let table = producer.table.as_ref()?;
            Some(self.validate_table(plan, producer, table, date))
        }))
        .await;

        let mut constituents: Vec<Constituent> = tables
            .iter()
            .map(|table| Constituent::new(table.status, table.record_count.unwrap_or(0)))
            .collect();

        let mut chain_statuses = BTreeMap::new();
        if !plan.bootstrap_skip {
            for name in &plan.stage.chains {
                let Some(chain) = chains.get(name) else {
                    continue;
                };

                let status = ValidationStatus::from(chain.status);
                let records = chain
                    .sources
                    .iter()
                    .filter_map(|source| source.authoritative_record_count)
                    .sum();

                constituents.push(Constituent::new(status, records));
                chain_statuses.insert(name.clone(), status);
            }
        }

        let status = PhaseStatusAggregator::aggregate(&constituents);
        let score = self.aggregator.stage_score(&constituents);
        let total_records = tables.iter().filter_map(|table| table.record_count).sum();

        PhaseValidationResult {
            stage: plan.stage.name.clone(),
            mode: plan.mode,
            tables: tables
                .into_iter()
                .map(|table| (table.name.clone(), table))
                .collect(),
            chains: chain_statuses,
            status,
            total_records,
            score,
        }
    }

    async fn validate_table(
        &self,
        plan: &StagePlan<'_>,
        producer: &ProducerDefinition,
        table: &TableReference,
        date: NaiveDate,
    ) -> TableValidation {
        let mut validation = TableValidation {
            name: producer.name.clone(),
            table: table.to_string(),
            record_count: None,
            expected_count: producer.expected_records,
            status: ValidationStatus::NotApplicable,
            quality: None,
            error: None,
        };

        if plan.bootstrap_skip {
            validation.status = ValidationStatus::BootstrapSkip;
            return validation;
        }

        if !plan.expected.contains(&producer.name) {
            return validation;
        }

        let date_column = producer
            .date_column
            .as_deref()
            .unwrap_or(&self.config.default_date_column);

        let counted = match &producer.quality_column {
            Some(quality_column) => self
                .counting
                .count_by_value(table, date_column, quality_column, date)
                .await
                .map(|value_counts| {
                    let distribution = QualityDistribution::from_value_counts(&value_counts);
                    (distribution.total(), Some(distribution))
                }),
            None => self
                .counting
                .count(table, date_column, date)
                .await
                .map(|count| (count, None)),
        };

        match counted {
            Ok((record_count, quality)) => {
                validation.record_count = Some(record_count);
                validation.quality = quality;
                validation.status = table_status(
                    record_count,
                    producer.expected_records,
                    self.config.thresholds.record_completeness_ratio,
                );
            }
            Err(err) => {
                record_count_failure(&validation.table, &err);
                validation.status = ValidationStatus::Error;
                validation.error = Some(err.to_string());
            }
        }

        validation
    }
}

fn collect_table_findings(phase: &PhaseValidationResult, issues: &mut Vec<Finding>) {
    for table in phase.tables.values() {
        let message = match table.status {
            ValidationStatus::Missing => format!("`{}` has no rows", table.table),
            ValidationStatus::Partial => match table.expected_count {
                Some(expected) => format!(
                    "`{}` has {} of {expected} expected rows",
                    table.table,
                    table.record_count.unwrap_or(0)
                ),
                None => format!("`{}` is incomplete", table.table),
            },
            ValidationStatus::Error => format!(
                "`{}` could not be counted: {}",
                table.table,
                table.error.as_deref().unwrap_or("unknown error")
            ),
            ValidationStatus::Complete
            | ValidationStatus::BootstrapSkip
            | ValidationStatus::NotApplicable => continue,
        };

        issues.push(Finding {
            stage: Some(phase.stage.clone()),
            subject: table.name.clone(),
            message,
        });
    }
}

fn collect_chain_findings(
    chain: &ChainValidation,
    issues: &mut Vec<Finding>,
    warnings: &mut Vec<Finding>,
) {
    let finding = |subject: &str, message: String| Finding {
        stage: None,
        subject: subject.to_string(),
        message,
    };

    match chain.status {
        ChainStatus::Missing => {
            let message = format!(
                "{} (quality impact {:.2})",
                chain.impact_message.as_deref().unwrap_or("no source has data"),
                chain.quality_impact_score.unwrap_or_default()
            );

            if chain.severity == ChainSeverity::Info {
                warnings.push(finding(&chain.chain, message));
            } else {
                issues.push(finding(&chain.chain, message));
            }
        }
        ChainStatus::Timeout => issues.push(finding(
            &chain.chain,
            "count queries timed out, availability is unknown".to_string(),
        )),
        ChainStatus::Error => issues.push(finding(
            &chain.chain,
            "count queries failed, availability is unknown".to_string(),
        )),
        ChainStatus::Partial => warnings.push(finding(
            &chain.chain,
            "sources have rows but none reaches its minimum".to_string(),
        )),
        ChainStatus::Complete => {}
    }

    if chain.fallback_used {
        let primary_uncounted = chain.sources.iter().any(|source| {
            source.primary && matches!(source.status, SourceStatus::Timeout | SourceStatus::Error)
        });
        let reason = if primary_uncounted {
            "primary source could not be counted"
        } else {
            "primary source unavailable"
        };

        warnings.push(finding(
            &chain.chain,
            format!(
                "{reason}, using fallback `{}`",
                chain.source_in_use.as_deref().unwrap_or_default()
            ),
        ));
    }

    if chain.quality_tier == Some(QualityTier::Bronze) {
        warnings.push(finding(
            &chain.chain,
            "source in use is bronze tier".to_string(),
        ));
    }

    for source in chain.sources.iter().filter(|source| source.raw_not_processed()) {
        warnings.push(finding(
            &source.source,
            format!(
                "{} raw rows exist but none were processed (chain `{}`)",
                source.raw_availability_count.unwrap_or(0),
                chain.chain
            ),
        ));
    }
}
