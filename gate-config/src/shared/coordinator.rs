use std::collections::HashSet;

use serde::Deserialize;

use crate::load::Config;
use crate::shared::{
    ChainConfig, CountingConfig, DeadlineConfig, DispatcherConfig, PgConnectionConfig,
    SeasonConfig, StageConfig, StateStoreConfig, TrackerConfig, ValidationConfig,
    ValidationError,
};

/// Top-level configuration of the coordinator.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid accidentally leaking
/// secrets in the config into serialized forms.
#[derive(Clone, Debug, Deserialize)]
pub struct CoordinatorConfig {
    /// Postgres database holding the completion state and the counted tables.
    #[serde(default)]
    pub postgres: Option<PgConnectionConfig>,
    #[serde(default)]
    pub state_store: StateStoreConfig,
    #[serde(default)]
    pub counting: CountingConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub deadline: DeadlineConfig,
    #[serde(default)]
    pub season: SeasonConfig,
    pub stages: Vec<StageConfig>,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Port of the Prometheus endpoint. Metrics are not exported when unset.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl CoordinatorConfig {
    /// Validates every section and the references between stages and chains.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match (&self.state_store, &self.postgres) {
            (StateStoreConfig::Postgres, None) => {
                return Err(ValidationError::MissingPostgresConnection(
                    "`state_store` is `postgres`",
                ));
            }
            (_, Some(postgres)) => postgres.validate()?,
            _ => {}
        }

        self.counting.validate()?;
        self.tracker.validate()?;
        self.deadline.validate()?;
        self.season.validate()?;
        self.validation.validate()?;

        let mut chain_names = HashSet::new();
        for chain in &self.chains {
            chain.validate()?;

            if !chain_names.insert(chain.name.as_str()) {
                return Err(ValidationError::DuplicateChain(chain.name.clone()));
            }
        }

        let mut stage_names = HashSet::new();
        for stage in &self.stages {
            stage.validate()?;

            if !stage_names.insert(stage.name.as_str()) {
                return Err(ValidationError::DuplicateStage(stage.name.clone()));
            }

            for chain in &stage.chains {
                if !chain_names.contains(chain.as_str()) {
                    return Err(ValidationError::UnknownChainReference {
                        stage: stage.name.clone(),
                        chain: chain.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

impl Config for CoordinatorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["season.season_starts"];
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "stages": [
            {
                "name": "raw",
                "producers": [{"name": "schedule"}, {"name": "box_scores", "same_day": false}],
                "chains": ["game_lines"]
            }
        ],
        "chains": [
            {
                "name": "game_lines",
                "severity": "critical",
                "sources": [
                    {"name": "odds_api", "table": "raw.odds_api_lines", "primary": true, "quality_tier": "gold"}
                ]
            }
        ]
    }"#;

    #[test]
    fn test_minimal_config_is_valid() {
        let config: CoordinatorConfig = serde_json::from_str(MINIMAL).unwrap();

        assert_eq!(config.state_store, StateStoreConfig::Memory);
        assert_eq!(config.dispatcher, DispatcherConfig::Stdout);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_postgres_store_requires_connection() {
        let mut config: CoordinatorConfig = serde_json::from_str(MINIMAL).unwrap();
        config.state_store = StateStoreConfig::Postgres;

        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingPostgresConnection(_))
        ));
    }

    #[test]
    fn test_unknown_chain_reference_rejected() {
        let mut config: CoordinatorConfig = serde_json::from_str(MINIMAL).unwrap();
        config.stages[0].chains.push("player_props".to_string());

        assert!(matches!(
            config.validate(),
            Err(ValidationError::UnknownChainReference { .. })
        ));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let mut config: CoordinatorConfig = serde_json::from_str(MINIMAL).unwrap();
        let stage = config.stages[0].clone();
        config.stages.push(stage);

        assert!(matches!(
            config.validate(),
            Err(ValidationError::DuplicateStage(_))
        ));
    }
}
