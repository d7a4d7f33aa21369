//! Resolution of chains to the source that serves them on a date.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join_all;
use gate_config::shared::{ChainConfig, ChainSeverity, QualityTier, SourceConfig};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};

use crate::chain::catalog::ChainCatalog;
use crate::counting::base::{CountError, CountingBackend};
use crate::metrics::{ERROR_KIND_LABEL, GATE_COUNT_QUERY_FAILURES_TOTAL, TABLE_NAME_LABEL};

/// Resolved status of one source of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// The chain's primary source, in use.
    Primary,
    /// A non-primary source in use because no earlier source had data.
    Fallback,
    /// Has data but is not in use.
    Available,
    /// Virtual source in use.
    VirtualUsed,
    /// Virtual source whose dependency chain has no usable data.
    VirtualUnavailable,
    Missing,
    /// The count query did not complete. Availability is unknown.
    Timeout,
    /// The count query failed.
    Error,
}

impl SourceStatus {
    pub fn is_in_use(&self) -> bool {
        matches!(
            self,
            SourceStatus::Primary | SourceStatus::Fallback | SourceStatus::VirtualUsed
        )
    }
}

/// Overall status of a chain on a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    /// A source is in use.
    Complete,
    /// No source is in use but some source has rows.
    Partial,
    Missing,
    /// No source has rows and a count query timed out.
    Timeout,
    /// No source has rows and a count query failed.
    Error,
}

impl ChainStatus {
    /// Whether the chain has data a virtual source can derive from.
    fn is_usable(&self, accepts_partial: bool) -> bool {
        match self {
            ChainStatus::Complete => true,
            ChainStatus::Partial => accepts_partial,
            _ => false,
        }
    }
}

/// Validation of one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceValidation {
    pub source: String,
    pub is_virtual: bool,
    pub primary: bool,
    pub quality_tier: QualityTier,
    pub quality_score: f64,
    /// Rows in the source's availability table, when it declares one and the query succeeded.
    pub raw_availability_count: Option<u64>,
    /// Rows in the source's table. `None` for virtual sources and failed queries.
    pub authoritative_record_count: Option<u64>,
    pub status: SourceStatus,
    /// Why the count could not be obtained.
    pub error: Option<String>,
}

impl SourceValidation {
    /// Returns `true` when raw rows exist but none were processed into the source's table.
    pub fn raw_not_processed(&self) -> bool {
        self.raw_availability_count.is_some_and(|raw| raw > 0)
            && self.authoritative_record_count == Some(0)
    }
}

/// Validation of one chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainValidation {
    pub chain: String,
    pub severity: ChainSeverity,
    pub sources: Vec<SourceValidation>,
    pub status: ChainStatus,
    pub primary_available: bool,
    pub fallback_used: bool,
    /// Name of the source in use.
    pub source_in_use: Option<String>,
    /// Quality tier of the source in use.
    pub quality_tier: Option<QualityTier>,
    /// Set when the chain is missing.
    pub impact_message: Option<String>,
    /// Set when the chain is missing.
    pub quality_impact_score: Option<f64>,
}

/// Outcome of counting a non-virtual source, before precedence is applied.
struct SourceCount {
    authoritative: Result<u64, CountError>,
    raw: Option<Result<u64, CountError>>,
}

/// Resolves chains against a counting backend.
///
/// Resolution is a read path with no shared mutable state and can run concurrently.
#[derive(Debug, Clone)]
pub struct ChainResolver<C> {
    backend: C,
    catalog: Arc<ChainCatalog>,
    default_date_column: String,
}

impl<C> ChainResolver<C>
where
    C: CountingBackend + Sync,
{
    pub fn new(backend: C, catalog: Arc<ChainCatalog>, default_date_column: String) -> Self {
        Self {
            backend,
            catalog,
            default_date_column,
        }
    }

    pub fn catalog(&self) -> &Arc<ChainCatalog> {
        &self.catalog
    }

    /// Resolves every chain of the catalog for `date`.
    pub async fn resolve_all(&self, date: NaiveDate) -> BTreeMap<String, ChainValidation> {
        self.resolve(&self.catalog.ordered(), date).await
    }

    /// Resolves the named chains and their dependencies for `date`.
    pub async fn resolve_named<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
        date: NaiveDate,
    ) -> BTreeMap<String, ChainValidation> {
        let chains = self.catalog.with_dependencies(names);
        self.resolve(&chains, date).await
    }

    /// Resolves `chains`, which must be in dependency order, for `date`.
    ///
    /// Each chain sees the results of the chains before it. A virtual source whose dependency
    /// was not resolved earlier is unavailable.
    pub async fn resolve(
        &self,
        chains: &[&ChainConfig],
        date: NaiveDate,
    ) -> BTreeMap<String, ChainValidation> {
        let mut resolved = BTreeMap::new();

        for chain in chains {
            let validation = self.resolve_chain(chain, date, &resolved).await;

            debug!(
                chain = %chain.name,
                %date,
                status = ?validation.status,
                source_in_use = ?validation.source_in_use,
                "chain resolved"
            );

            resolved.insert(chain.name.clone(), validation);
        }

        resolved
    }

    async fn resolve_chain(
        &self,
        chain: &ChainConfig,
        date: NaiveDate,
        resolved: &BTreeMap<String, ChainValidation>,
    ) -> ChainValidation {
        let counts = join_all(chain.sources.iter().map(|source| async move {
            if source.is_virtual {
                None
            } else {
                Some(self.count_source(source, date).await)
            }
        }))
        .await;

        let mut sources = Vec::with_capacity(chain.sources.len());
        let mut in_use: Option<usize> = None;
        let mut any_rows = false;
        let mut any_timeout = false;
        let mut any_error = false;

        for (index, (source, count)) in chain.sources.iter().zip(counts).enumerate() {
            let validation = match count {
                None => {
                    let usable = source
                        .depends_on
                        .as_deref()
                        .and_then(|dependency| resolved.get(dependency))
                        .is_some_and(|dependency| {
                            dependency.status.is_usable(chain.virtual_accepts_partial)
                        });

                    let status = match (usable, in_use.is_some()) {
                        (false, _) => SourceStatus::VirtualUnavailable,
                        (true, true) => SourceStatus::Available,
                        (true, false) => SourceStatus::VirtualUsed,
                    };

                    source_validation(source, None, None, status, None)
                }
                Some(count) => {
                    let raw = match count.raw {
                        Some(Ok(raw)) => Some(raw),
                        Some(Err(_)) | None => None,
                    };

                    match count.authoritative {
                        Ok(records) => {
                            any_rows |= records > 0;

                            let status = if records == 0 {
                                SourceStatus::Missing
                            } else if records < source.min_records || in_use.is_some() {
                                SourceStatus::Available
                            } else if source.primary {
                                SourceStatus::Primary
                            } else {
                                SourceStatus::Fallback
                            };

                            source_validation(source, raw, Some(records), status, None)
                        }
                        Err(err) => {
                            let status = match err {
                                CountError::Timeout => {
                                    any_timeout = true;
                                    SourceStatus::Timeout
                                }
                                CountError::NotFound(_) | CountError::PermanentError(_) => {
                                    any_error = true;
                                    SourceStatus::Error
                                }
                            };

                            source_validation(source, raw, None, status, Some(err.to_string()))
                        }
                    }
                }
            };

            if in_use.is_none() && validation.status.is_in_use() {
                in_use = Some(index);
            }

            sources.push(validation);
        }

        let status = if in_use.is_some() {
            ChainStatus::Complete
        } else if any_rows {
            ChainStatus::Partial
        } else if any_timeout {
            ChainStatus::Timeout
        } else if any_error {
            ChainStatus::Error
        } else {
            ChainStatus::Missing
        };

        let in_use_source = in_use.map(|index| &sources[index]);
        let primary_available = in_use_source.is_some_and(|source| source.primary);
        let fallback_used = in_use_source.is_some_and(|source| !source.primary);
        let source_in_use = in_use_source.map(|source| source.source.clone());
        let quality_tier = in_use_source.map(|source| source.quality_tier);

        let (impact_message, quality_impact_score) = if status == ChainStatus::Missing {
            let message = chain.missing_message.clone().unwrap_or_else(|| {
                format!("no source of chain `{}` has data for {date}", chain.name)
            });
            (Some(message), Some(chain.quality_impact_score))
        } else {
            (None, None)
        };

        ChainValidation {
            chain: chain.name.clone(),
            severity: chain.severity,
            sources,
            status,
            primary_available,
            fallback_used,
            source_in_use,
            quality_tier,
            impact_message,
            quality_impact_score,
        }
    }

    async fn count_source(&self, source: &SourceConfig, date: NaiveDate) -> SourceCount {
        let date_column = source
            .date_column
            .as_deref()
            .unwrap_or(&self.default_date_column);

        let authoritative = match &source.table {
            Some(table) => {
                let result = self.backend.count(table, date_column, date).await;
                if let Err(err) = &result {
                    record_count_failure(&table.to_string(), err);
                }
                result
            }
            None => Err(CountError::PermanentError(format!(
                "source `{}` has no table",
                source.name
            ))),
        };

        let raw = match &source.availability_table {
            Some(table) => {
                let result = self.backend.count(table, date_column, date).await;
                if let Err(err) = &result {
                    record_count_failure(&table.to_string(), err);
                }
                Some(result)
            }
            None => None,
        };

        SourceCount { authoritative, raw }
    }
}

fn source_validation(
    source: &SourceConfig,
    raw_availability_count: Option<u64>,
    authoritative_record_count: Option<u64>,
    status: SourceStatus,
    error: Option<String>,
) -> SourceValidation {
    SourceValidation {
        source: source.name.clone(),
        is_virtual: source.is_virtual,
        primary: source.primary,
        quality_tier: source.quality_tier,
        quality_score: source.quality_score,
        raw_availability_count,
        authoritative_record_count,
        status,
        error,
    }
}

/// Logs and counts a failed count query.
pub(crate) fn record_count_failure(table: &str, err: &CountError) {
    counter!(
        GATE_COUNT_QUERY_FAILURES_TOTAL,
        TABLE_NAME_LABEL => table.to_string(),
        ERROR_KIND_LABEL => err.kind()
    )
    .increment(1);

    warn!(table, error = %err, "count query failed");
}
