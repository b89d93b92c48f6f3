use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use rust_cli_config::builder::{ConfigBuilder, DefaultState};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

const CONFIGURATION_DIR: &str = "configuration";
const FILE_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

const ENV_PREFIX: &str = "APP";
const ENV_PREFIX_SEPARATOR: &str = "_";
const ENV_NESTING_SEPARATOR: &str = "__";
const ENV_LIST_SEPARATOR: &str = ",";

/// Implemented by configuration structs loaded with [`load_config`].
pub trait Config {
    /// Keys whose environment variable values are comma-separated lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// A file layer of the configuration. Later layers override earlier ones.
#[derive(Debug, Clone, Copy)]
enum FileLayer {
    Base,
    Environment(Environment),
}

impl FileLayer {
    fn file_stem(&self) -> &'static str {
        match self {
            FileLayer::Base => "base",
            FileLayer::Environment(environment) => environment.as_str(),
        }
    }

    /// Returns the first existing file of this layer in `directory`.
    fn locate(&self, directory: &Path) -> Result<PathBuf, LoadConfigError> {
        let candidates = FILE_EXTENSIONS
            .iter()
            .map(|extension| directory.join(format!("{}.{extension}", self.file_stem())))
            .collect::<Vec<_>>();

        if let Some(path) = candidates.iter().find(|path| path.is_file()) {
            return Ok(path.clone());
        }

        Err(LoadConfigError::MissingFile {
            layer: self.to_string(),
            candidates: candidates
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

impl fmt::Display for FileLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileLayer::Base => f.write_str("base configuration"),
            FileLayer::Environment(environment) => {
                write!(f, "{environment} environment configuration")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    NoConfigurationDirectory(PathBuf),

    #[error("no {layer} file found, looked for {candidates}")]
    MissingFile { layer: String, candidates: String },

    #[error("{layer} file `{path}` is invalid: {source}")]
    InvalidFile {
        layer: String,
        path: PathBuf,
        source: rust_cli_config::ConfigError,
    },

    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] io::Error),

    #[error("failed to merge configuration sources: {0}")]
    Merge(#[source] rust_cli_config::ConfigError),

    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] rust_cli_config::ConfigError),
}

/// Loads the configuration of the current directory for the environment in `APP_ENVIRONMENT`.
///
/// See [`load_config_from`].
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let base_path = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    load_config_from(&base_path, Environment::load()?)
}

/// Loads the configuration rooted at `base_path`.
///
/// Layers, each overriding the previous one:
/// 1. `configuration/base.(yaml|yml|json)`
/// 2. `configuration/{environment}.(yaml|yml|json)`
/// 3. `APP_`-prefixed environment variables, with `__` between nested keys
///    (`APP_SOURCE__ENDPOINT__SLOT_NAME`) and comma-separated lists for
///    [`Config::LIST_PARSE_KEYS`].
pub fn load_config_from<T>(base_path: &Path, environment: Environment) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let directory = base_path.join(CONFIGURATION_DIR);
    if !directory.is_dir() {
        return Err(LoadConfigError::NoConfigurationDirectory(directory));
    }

    let mut builder = rust_cli_config::Config::builder();
    for layer in [FileLayer::Base, FileLayer::Environment(environment)] {
        builder = add_file_layer(builder, layer, &directory)?;
    }

    builder
        .add_source(environment_overrides::<T>())
        .build()
        .map_err(LoadConfigError::Merge)?
        .try_deserialize()
        .map_err(LoadConfigError::Deserialization)
}

/// Adds the file of `layer` and checks that it parses, so errors name the offending file.
fn add_file_layer(
    builder: ConfigBuilder<DefaultState>,
    layer: FileLayer,
    directory: &Path,
) -> Result<ConfigBuilder<DefaultState>, LoadConfigError> {
    let path = layer.locate(directory)?;
    let builder = builder.add_source(rust_cli_config::File::from(path.as_path()));

    if let Err(source) = builder.build_cloned() {
        return Err(LoadConfigError::InvalidFile {
            layer: layer.to_string(),
            path,
            source,
        });
    }

    Ok(builder)
}

fn environment_overrides<T: Config>() -> rust_cli_config::Environment {
    let overrides = rust_cli_config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_NESTING_SEPARATOR);

    if T::LIST_PARSE_KEYS.is_empty() {
        return overrides;
    }

    T::LIST_PARSE_KEYS.iter().fold(
        overrides.try_parsing(true).list_separator(ENV_LIST_SEPARATOR),
        |overrides, key| overrides.with_list_parse_key(key),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::fs;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        name: String,
        tables: Vec<String>,
    }

    impl Config for TestConfig {
        const LIST_PARSE_KEYS: &'static [&'static str] = &["tables"];
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "logrepl-config-{name}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join(CONFIGURATION_DIR)).unwrap();
        dir
    }

    #[test]
    fn environment_file_overrides_base_file() {
        let dir = temp_dir("override");
        fs::write(
            dir.join(CONFIGURATION_DIR).join("base.yaml"),
            "name: base\ntables: [users]\n",
        )
        .unwrap();
        fs::write(
            dir.join(CONFIGURATION_DIR).join("dev.json"),
            r#"{"name": "dev"}"#,
        )
        .unwrap();

        let config: TestConfig = load_config_from(&dir, Environment::Dev).unwrap();
        assert_eq!(config.name, "dev");
        assert_eq!(config.tables, vec!["users".to_string()]);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_environment_file_is_reported() {
        let dir = temp_dir("missing");
        fs::write(
            dir.join(CONFIGURATION_DIR).join("base.yaml"),
            "name: base\ntables: []\n",
        )
        .unwrap();

        let err = load_config_from::<TestConfig>(&dir, Environment::Prod).unwrap_err();
        let LoadConfigError::MissingFile { layer, candidates } = err else {
            panic!("expected a missing file error");
        };
        assert_eq!(layer, "prod environment configuration");
        assert!(candidates.contains("prod.yml"));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn invalid_file_is_named_in_the_error() {
        let dir = temp_dir("invalid");
        fs::write(dir.join(CONFIGURATION_DIR).join("base.json"), "{ not json").unwrap();

        let err = load_config_from::<TestConfig>(&dir, Environment::Dev).unwrap_err();
        let LoadConfigError::InvalidFile { layer, path, .. } = err else {
            panic!("expected an invalid file error");
        };
        assert_eq!(layer, "base configuration");
        assert!(path.ends_with("base.json"));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_configuration_directory_is_reported() {
        let dir = std::env::temp_dir().join("logrepl-config-does-not-exist");
        let err = load_config_from::<TestConfig>(&dir, Environment::Dev).unwrap_err();
        assert!(matches!(err, LoadConfigError::NoConfigurationDirectory(_)));
    }
}
