use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Configuration for row count queries issued during validation.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CountingConfig {
    /// Milliseconds after which a single count query is abandoned and reported as timed out.
    ///
    /// Default: 10000
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Maximum number of count queries in flight at once.
    ///
    /// Default: 8
    #[serde(default = "default_max_concurrent_queries")]
    pub max_concurrent_queries: usize,
}

impl CountingConfig {
    /// Default query timeout: 10 seconds.
    pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 10_000;

    /// Default number of concurrent count queries.
    pub const DEFAULT_MAX_CONCURRENT_QUERIES: usize = 8;

    /// Validates the counting configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.query_timeout_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "counting.query_timeout_ms".to_string(),
                constraint: "must be greater than zero".to_string(),
            });
        }

        if self.max_concurrent_queries == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "counting.max_concurrent_queries".to_string(),
                constraint: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for CountingConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: Self::DEFAULT_QUERY_TIMEOUT_MS,
            max_concurrent_queries: Self::DEFAULT_MAX_CONCURRENT_QUERIES,
        }
    }
}

fn default_query_timeout_ms() -> u64 {
    CountingConfig::DEFAULT_QUERY_TIMEOUT_MS
}

fn default_max_concurrent_queries() -> usize {
    CountingConfig::DEFAULT_MAX_CONCURRENT_QUERIES
}
