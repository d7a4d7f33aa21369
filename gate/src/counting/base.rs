use std::collections::BTreeMap;
use std::future::Future;

use chrono::NaiveDate;
use gate_config::shared::TableReference;
use thiserror::Error;

/// Why a count could not be obtained.
///
/// A failed count is never reported as zero rows: callers must surface it as its own status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CountError {
    /// The query did not complete in time. The row count is unknown.
    #[error("count query timed out")]
    Timeout,
    /// The table or column does not exist.
    #[error("table or column not found: {0}")]
    NotFound(String),
    /// Any other failure.
    #[error("count query failed: {0}")]
    PermanentError(String),
}

impl CountError {
    pub fn kind(&self) -> &'static str {
        match self {
            CountError::Timeout => "timeout",
            CountError::NotFound(_) => "not_found",
            CountError::PermanentError(_) => "permanent_error",
        }
    }
}

/// Row counts of one date grouped by a column value. `None` collects null values.
pub type ValueCounts = BTreeMap<Option<String>, u64>;

/// Reports how many rows a table holds for a date.
pub trait CountingBackend {
    /// Counts the rows of `table` whose `date_column` equals `date`.
    fn count(
        &self,
        table: &TableReference,
        date_column: &str,
        date: NaiveDate,
    ) -> impl Future<Output = Result<u64, CountError>> + Send;

    /// Counts the rows of `table` for `date`, grouped by the value of `value_column`.
    fn count_by_value(
        &self,
        table: &TableReference,
        date_column: &str,
        value_column: &str,
        date: NaiveDate,
    ) -> impl Future<Output = Result<ValueCounts, CountError>> + Send;
}
