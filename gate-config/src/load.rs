use std::{
    io,
    path::{Path, PathBuf},
};

use rust_cli_config::{Config as Layers, Environment as EnvSource, File};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory, relative to the working directory, that holds the layered files.
const CONFIGURATION_DIR: &str = "configuration";

/// Extensions tried, in order, for every layer.
const EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Overrides are read from `APP_*` variables, nested with `__` (`APP_TRACKER__MAX_COMMIT_ATTEMPTS`).
const ENV_PREFIX: &str = "APP";
const ENV_NESTING: &str = "__";
const ENV_LIST_SEPARATOR: &str = ",";

/// Implemented by top-level configuration structures.
pub trait Config {
    /// Keys whose environment overrides are comma-separated lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    /// No file with a supported extension exists for a layer.
    #[error("no {layer} file in `{directory}` (looked for {stem}.{{yaml,yml,json}})")]
    ConfigurationFileMissing {
        layer: String,
        directory: PathBuf,
        stem: String,
    },

    /// A layer file exists but is not valid YAML or JSON.
    #[error("failed to parse {layer} file `{path}`: {source}")]
    ConfigurationFileLoad {
        layer: String,
        path: PathBuf,
        source: rust_cli_config::ConfigError,
    },

    #[error("failed to determine the runtime environment: {0}")]
    Environment(#[from] io::Error),

    /// Merging the layers or applying the `APP_*` overrides failed.
    #[error("failed to merge configuration layers: {0}")]
    Builder(#[source] rust_cli_config::ConfigError),

    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] rust_cli_config::ConfigError),
}

/// Loads the configuration from `./configuration` for the environment named by `APP_ENVIRONMENT`.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let current_dir = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;

    load_config_from(&current_dir.join(CONFIGURATION_DIR))
}

/// Loads the configuration from `directory` for the environment named by `APP_ENVIRONMENT`.
///
/// Layers, lowest precedence first: `base.*`, `{dev,prod}.*`, then `APP_*` variables.
pub fn load_config_from<T>(directory: &Path) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let environment = Environment::load()?;

    load_layers(directory, environment)
}

fn load_layers<T>(directory: &Path, environment: Environment) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            directory.to_path_buf(),
        ));
    }

    let environment_layer = format!("{environment} configuration");
    let mut builder = Layers::builder();
    for (stem, layer) in [
        ("base", "base configuration"),
        (environment.as_str(), environment_layer.as_str()),
    ] {
        let path = layer_file(directory, stem, layer)?;
        builder = builder.add_source(File::from(path.as_path()));
        // Build each prefix so a parse error names the file that caused it.
        builder
            .build_cloned()
            .map_err(|source| LoadConfigError::ConfigurationFileLoad {
                layer: layer.to_owned(),
                path,
                source,
            })?;
    }

    builder
        .add_source(env_overrides::<T>())
        .build()
        .map_err(LoadConfigError::Builder)?
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

fn layer_file(directory: &Path, stem: &str, layer: &str) -> Result<PathBuf, LoadConfigError> {
    EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .find(|path| path.is_file())
        .ok_or_else(|| LoadConfigError::ConfigurationFileMissing {
            layer: layer.to_owned(),
            directory: directory.to_path_buf(),
            stem: stem.to_owned(),
        })
}

fn env_overrides<T: Config>() -> EnvSource {
    let source = EnvSource::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator(ENV_NESTING);

    if T::LIST_PARSE_KEYS.is_empty() {
        return source;
    }

    T::LIST_PARSE_KEYS.iter().fold(
        source.try_parsing(true).list_separator(ENV_LIST_SEPARATOR),
        |source, key| source.with_list_parse_key(key),
    )
}
