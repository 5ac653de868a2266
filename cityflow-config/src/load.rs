use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory containing configuration files relative to the process root.
const CONFIGURATION_DIR: &str = "configuration";

/// Extensions probed when locating base and environment configuration files.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Prefix for environment variable overrides, e.g. `APP_CONNECTION__HOST`.
const ENV_PREFIX: &str = "APP";
const ENV_PREFIX_SEPARATOR: &str = "_";
const ENV_SEPARATOR: &str = "__";
const LIST_SEPARATOR: &str = ",";

/// Implemented by top-level configuration structures loaded via [`load_config`].
pub trait Config {
    /// Keys whose environment-variable values are parsed as comma-separated lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Errors raised while locating, parsing, or merging configuration sources.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    /// Failed to determine the current working directory.
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    /// The `configuration` directory does not exist.
    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    /// No configuration file with a supported extension was found.
    #[error("no `{stem}` configuration file found in `{directory}`")]
    ConfigurationFileMissing { stem: String, directory: PathBuf },

    /// A configuration source failed to parse or merge.
    #[error("failed to load configuration: {0}")]
    Source(#[from] config::ConfigError),

    /// Failed to determine the runtime environment (`APP_ENVIRONMENT`).
    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] io::Error),
}

/// Loads hierarchical configuration from base file, environment file, and
/// `APP`-prefixed environment variables, in that precedence order.
///
/// Files are read from `configuration/base.(yaml|yml|json)` and
/// `configuration/{environment}.(yaml|yml|json)`. Nested keys in environment
/// variables use double underscores (`APP_POOL__MAX_WORKERS=8`), list values
/// are comma-separated.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let current_dir = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let configuration_dir = current_dir.join(CONFIGURATION_DIR);

    if !configuration_dir.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            configuration_dir,
        ));
    }

    let environment = Environment::load()?;
    let base_file = find_configuration_file(&configuration_dir, "base")?;
    let environment_file = find_configuration_file(&configuration_dir, environment.as_str())?;

    let mut environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if !T::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source
            .try_parsing(true)
            .list_separator(LIST_SEPARATOR);

        for key in T::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(base_file))
        .add_source(config::File::from(environment_file))
        .add_source(environment_source)
        .build()?;

    Ok(settings.try_deserialize::<T>()?)
}

fn find_configuration_file(directory: &Path, stem: &str) -> Result<PathBuf, LoadConfigError> {
    for extension in CONFIG_FILE_EXTENSIONS {
        let path = directory.join(format!("{stem}.{extension}"));
        if path.is_file() {
            return Ok(path);
        }
    }

    Err(LoadConfigError::ConfigurationFileMissing {
        stem: stem.to_string(),
        directory: directory.to_path_buf(),
    })
}
