//! Deadline configuration for forcing degraded triggers on batches that never complete.

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Configuration for the deadline monitor and the worker that drives it.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeadlineConfig {
    /// Seconds a batch may stay open, counted from its first seen completion, before a degraded
    /// trigger is considered.
    ///
    /// Default: 14400 (4 hours)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Seconds between two sweeps of open batches.
    ///
    /// Default: 60
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl DeadlineConfig {
    /// Default batch timeout: 4 hours.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 4 * 60 * 60;

    /// Default sweep interval: 1 minute.
    pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

    /// Validates the deadline configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "deadline.timeout_secs".to_string(),
                constraint: "must be greater than zero".to_string(),
            });
        }

        if self.sweep_interval_secs == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "deadline.sweep_interval_secs".to_string(),
                constraint: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
            sweep_interval_secs: Self::DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

fn default_timeout_secs() -> u64 {
    DeadlineConfig::DEFAULT_TIMEOUT_SECS
}

fn default_sweep_interval_secs() -> u64 {
    DeadlineConfig::DEFAULT_SWEEP_INTERVAL_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DeadlineConfig::default();
        assert_eq!(config.timeout_secs, 14_400);
        assert_eq!(config.sweep_interval_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = DeadlineConfig {
            sweep_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
