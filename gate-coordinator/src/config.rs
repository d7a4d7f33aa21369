use anyhow::Context;
use gate_config::load_config;
use gate_config::shared::CoordinatorConfig;

/// Loads and validates the coordinator configuration from `./configuration`.
pub fn load_coordinator_config() -> anyhow::Result<CoordinatorConfig> {
    let config = load_config::<CoordinatorConfig>()
        .context("failed to load the coordinator configuration")?;
    config
        .validate()
        .context("the coordinator configuration is invalid")?;

    Ok(config)
}
