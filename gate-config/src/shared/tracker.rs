use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Configuration of the completion tracker's optimistic commit loop.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TrackerConfig {
    /// Maximum number of read-fold-commit attempts for one completion event.
    ///
    /// When exhausted the event fails with a transient error so that the message bus redelivers
    /// it. Default: 8
    #[serde(default = "default_max_commit_attempts")]
    pub max_commit_attempts: u32,

    /// Backoff in milliseconds after the first lost version race.
    ///
    /// Default: 5
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound in milliseconds for the backoff between commit attempts.
    ///
    /// Default: 250
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Age in milliseconds after which an in-flight trigger claim is considered abandoned and may
    /// be claimed again.
    ///
    /// Default: 60000 (1 minute)
    #[serde(default = "default_trigger_claim_timeout_ms")]
    pub trigger_claim_timeout_ms: u64,
}

impl TrackerConfig {
    /// Default number of commit attempts.
    pub const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 8;

    /// Default initial backoff: 5 milliseconds.
    pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 5;

    /// Default maximum backoff: 250 milliseconds.
    pub const DEFAULT_MAX_BACKOFF_MS: u64 = 250;

    /// Default trigger claim timeout: 1 minute.
    pub const DEFAULT_TRIGGER_CLAIM_TIMEOUT_MS: u64 = 60_000;

    /// Validates the tracker configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_commit_attempts == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "tracker.max_commit_attempts".to_string(),
                constraint: "must be greater than zero".to_string(),
            });
        }

        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ValidationError::InvalidFieldValue {
                field: "tracker.initial_backoff_ms".to_string(),
                constraint: "must be <= max_backoff_ms".to_string(),
            });
        }

        if self.trigger_claim_timeout_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "tracker.trigger_claim_timeout_ms".to_string(),
                constraint: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: Self::DEFAULT_MAX_COMMIT_ATTEMPTS,
            initial_backoff_ms: Self::DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: Self::DEFAULT_MAX_BACKOFF_MS,
            trigger_claim_timeout_ms: Self::DEFAULT_TRIGGER_CLAIM_TIMEOUT_MS,
        }
    }
}

fn default_max_commit_attempts() -> u32 {
    TrackerConfig::DEFAULT_MAX_COMMIT_ATTEMPTS
}

fn default_initial_backoff_ms() -> u64 {
    TrackerConfig::DEFAULT_INITIAL_BACKOFF_MS
}

fn default_max_backoff_ms() -> u64 {
    TrackerConfig::DEFAULT_MAX_BACKOFF_MS
}

fn default_trigger_claim_timeout_ms() -> u64 {
    TrackerConfig::DEFAULT_TRIGGER_CLAIM_TIMEOUT_MS
}
