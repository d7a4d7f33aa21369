use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use gate_config::shared::{CountingConfig, TableReference};
use gate_postgres::counts;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::debug;

use crate::counting::base::{CountError, CountingBackend, ValueCounts};

/// SQLSTATE of `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";

/// SQLSTATE of `undefined_column`.
const UNDEFINED_COLUMN: &str = "42703";

/// SQLSTATE of `invalid_schema_name`.
const INVALID_SCHEMA_NAME: &str = "3F000";

/// Counting backend querying Postgres tables.
///
/// Each query is bounded by the configured timeout, and at most `max_concurrent_queries` run at
/// the same time.
#[derive(Debug, Clone)]
pub struct PostgresCountingBackend {
    pool: PgPool,
    query_timeout: Duration,
    permits: Arc<Semaphore>,
}

impl PostgresCountingBackend {
    pub fn new(pool: PgPool, config: &CountingConfig) -> Self {
        Self {
            pool,
            query_timeout: Duration::from_millis(config.query_timeout_ms),
            permits: Arc::new(Semaphore::new(config.max_concurrent_queries)),
        }
    }
}

fn classify_sqlx_error(err: sqlx::Error) -> CountError {
    if let sqlx::Error::Database(db_err) = &err {
        if let Some(code) = db_err.code() {
            if code == UNDEFINED_TABLE || code == UNDEFINED_COLUMN || code == INVALID_SCHEMA_NAME {
                return CountError::NotFound(db_err.message().to_string());
            }
        }
    }

    if matches!(err, sqlx::Error::PoolTimedOut) {
        return CountError::Timeout;
    }

    CountError::PermanentError(err.to_string())
}

fn to_count(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

impl CountingBackend for PostgresCountingBackend {
    async fn count(
        &self,
        table: &TableReference,
        date_column: &str,
        date: NaiveDate,
    ) -> Result<u64, CountError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|err| CountError::PermanentError(err.to_string()))?;

        debug!(%table, date_column, %date, "counting rows");

        match timeout(
            self.query_timeout,
            counts::count_rows_for_date(&self.pool, table, date_column, date),
        )
        .await
        {
            Ok(Ok(count)) => Ok(to_count(count)),
            Ok(Err(err)) => Err(classify_sqlx_error(err)),
            Err(_) => Err(CountError::Timeout),
        }
    }

    async fn count_by_value(
        &self,
        table: &TableReference,
        date_column: &str,
        value_column: &str,
        date: NaiveDate,
    ) -> Result<ValueCounts, CountError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|err| CountError::PermanentError(err.to_string()))?;

        debug!(%table, date_column, value_column, %date, "counting rows by value");

        match timeout(
            self.query_timeout,
            counts::count_rows_by_value(&self.pool, table, date_column, value_column, date),
        )
        .await
        {
            Ok(Ok(rows)) => {
                let mut value_counts = ValueCounts::new();
                for (value, count) in rows {
                    *value_counts.entry(value).or_default() += to_count(count);
                }
                Ok(value_counts)
            }
            Ok(Err(err)) => Err(classify_sqlx_error(err)),
            Err(_) => Err(CountError::Timeout),
        }
    }
}
