use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Season calendar used to derive the processing mode of a batch.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SeasonConfig {
    /// First day of each season. Order does not matter.
    #[serde(default)]
    pub season_starts: Vec<NaiveDate>,

    /// Number of days, starting at a season start, during which stages that need history are
    /// expected to produce nothing.
    ///
    /// Default: 14
    #[serde(default = "default_bootstrap_days")]
    pub bootstrap_days: u32,

    /// Offset in minutes from UTC of the calendar that decides which date is "today".
    ///
    /// Default: 0
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl SeasonConfig {
    /// Default bootstrap window: two weeks.
    pub const DEFAULT_BOOTSTRAP_DAYS: u32 = 14;

    const MAX_UTC_OFFSET_MINUTES: i32 = 18 * 60;

    /// Validates the season configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.utc_offset_minutes.abs() > Self::MAX_UTC_OFFSET_MINUTES {
            return Err(ValidationError::InvalidFieldValue {
                field: "season.utc_offset_minutes".to_string(),
                constraint: format!("must be within +/-{}", Self::MAX_UTC_OFFSET_MINUTES),
            });
        }

        Ok(())
    }
}

impl Default for SeasonConfig {
    fn default() -> Self {
        Self {
            season_starts: Vec::new(),
            bootstrap_days: Self::DEFAULT_BOOTSTRAP_DAYS,
            utc_offset_minutes: 0,
        }
    }
}

fn default_bootstrap_days() -> u32 {
    SeasonConfig::DEFAULT_BOOTSTRAP_DAYS
}
