use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use gate_config::shared::TableReference;

use crate::counting::base::{CountError, CountingBackend, ValueCounts};

#[derive(Debug, Default)]
struct Inner {
    counts: BTreeMap<(String, NaiveDate), u64>,
    value_counts: BTreeMap<(String, NaiveDate), ValueCounts>,
    failures: BTreeMap<String, CountError>,
}

/// Counting backend answering from scripted counts.
///
/// Tables without a scripted count hold zero rows. A scripted failure applies to every date of
/// the table.
#[derive(Debug, Clone, Default)]
pub struct MemoryCountingBackend {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryCountingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the row count of `table` on `date`.
    pub fn set_count(&self, table: &TableReference, date: NaiveDate, count: u64) {
        if let Ok(mut inner) = self.inner.write() {
            inner.counts.insert((table.to_string(), date), count);
        }
    }

    /// Sets the rows of `table` on `date` grouped by value. The total count follows.
    pub fn set_value_counts(
        &self,
        table: &TableReference,
        date: NaiveDate,
        value_counts: impl IntoIterator<Item = (Option<String>, u64)>,
    ) {
        let value_counts: ValueCounts = value_counts.into_iter().collect();
        let total = value_counts.values().sum();

        if let Ok(mut inner) = self.inner.write() {
            inner.counts.insert((table.to_string(), date), total);
            inner.value_counts.insert((table.to_string(), date), value_counts);
        }
    }

    /// Makes every query against `table` fail with `error`.
    pub fn fail_table(&self, table: &TableReference, error: CountError) {
        if let Ok(mut inner) = self.inner.write() {
            inner.failures.insert(table.to_string(), error);
        }
    }

    fn lookup<T>(
        &self,
        table: &TableReference,
        read: impl FnOnce(&Inner, &str) -> T,
    ) -> Result<T, CountError> {
        let inner = self
            .inner
            .read()
            .map_err(|err| CountError::PermanentError(err.to_string()))?;
        let table = table.to_string();

        if let Some(error) = inner.failures.get(&table) {
            return Err(error.clone());
        }

        Ok(read(&inner, &table))
    }
}

impl CountingBackend for MemoryCountingBackend {
    async fn count(
        &self,
        table: &TableReference,
        _date_column: &str,
        date: NaiveDate,
    ) -> Result<u64, CountError> {
        self.lookup(table, |inner, table| {
            inner
                .counts
                .get(&(table.to_string(), date))
                .copied()
                .unwrap_or(0)
        })
    }

    async fn count_by_value(
        &self,
        table: &TableReference,
        _date_column: &str,
        _value_column: &str,
        date: NaiveDate,
    ) -> Result<ValueCounts, CountError> {
        self.lookup(table, |inner, table| {
            inner
                .value_counts
                .get(&(table.to_string(), date))
                .cloned()
                .unwrap_or_default()
        })
    }
}
