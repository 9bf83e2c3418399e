//! Building configurations from command lines.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::configuration::Configuration;
use crate::error::ConfigError;

/// Option values of this form are looked up in the keystore.
pub const KEYSTORE_PREFIX: &str = "USE_KEYSTORE@";

/// Source of credentials referenced from configuration options.
pub trait KeyStoreClient: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    fn fetch_key(&self, key: &str) -> Option<String>;
}

pub trait ConfigurationFactory: Send + Sync {
    /// Build a configuration from `args`: the configuration name first, then option overrides.
    fn create_configuration_from_args(
        &self,
        args: &[String],
        keystore: Option<&dyn KeyStoreClient>,
    ) -> Result<Configuration, ConfigError>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    options: BTreeMap<String, OptionValue>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OptionValue {
    Text(String),
    Flag(bool),
    Number(i64),
    List(Vec<String>),
}

impl OptionValue {
    fn into_values(self) -> Vec<String> {
        match self {
            Self::Text(value) => vec![value],
            Self::Flag(value) => vec![value.to_string()],
            Self::Number(value) => vec![value.to_string()],
            Self::List(values) => values,
        }
    }
}

/// Reads configurations rendered as TOML.
///
/// `args[0]` is the path of a file with a `name`, an optional `description`, and an
/// `[options]` table. Remaining args are `--key value` overrides; a `--key` with no
/// value is a boolean flag set to `true`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlConfigurationFactory;

impl TomlConfigurationFactory {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn load(path: &Path) -> Result<ConfigFile, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn parse_overrides(args: &[String]) -> Result<Vec<(String, String)>, ConfigError> {
    let mut overrides = Vec::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        let Some(key) = arg.strip_prefix("--").filter(|key| !key.is_empty()) else {
            return Err(ConfigError::Factory(format!("unexpected argument '{arg}'")));
        };
        let value = match iter.peek() {
            Some(next) if !next.starts_with("--") => iter.next().cloned(),
            _ => None,
        };
        overrides.push((key.to_string(), value.unwrap_or_else(|| "true".to_string())));
    }
    Ok(overrides)
}

fn resolve_secret(
    value: String,
    keystore: Option<&dyn KeyStoreClient>,
) -> Result<String, ConfigError> {
    let Some(keystore) = keystore else {
        return Ok(value);
    };
    if !value.starts_with(KEYSTORE_PREFIX) {
        return Ok(value);
    }
    let key = value[KEYSTORE_PREFIX.len()..].to_string();
    if !keystore.is_available() {
        return Err(ConfigError::KeyStore { key });
    }
    keystore
        .fetch_key(&key)
        .ok_or(ConfigError::KeyStore { key })
}

impl ConfigurationFactory for TomlConfigurationFactory {
    fn create_configuration_from_args(
        &self,
        args: &[String],
        keystore: Option<&dyn KeyStoreClient>,
    ) -> Result<Configuration, ConfigError> {
        let Some((name, rest)) = args.split_first() else {
            return Err(ConfigError::Factory("no configuration name given".to_string()));
        };
        let path = Path::new(name);
        let file = Self::load(path)?;

        let config_name = file.name.unwrap_or_else(|| {
            path.file_stem()
                .map_or_else(|| name.clone(), |stem| stem.to_string_lossy().into_owned())
        });
        let mut config = Configuration::new(config_name);
        if let Some(description) = file.description {
            config.set_description(description);
        }

        let mut options: BTreeMap<String, Vec<String>> = file
            .options
            .into_iter()
            .map(|(key, value)| (key, value.into_values()))
            .collect();
        let mut overridden = Vec::new();
        for (key, value) in parse_overrides(rest)? {
            let values = options.entry(key.clone()).or_default();
            if !overridden.contains(&key) {
                values.clear();
                overridden.push(key);
            }
            values.push(value);
        }

        for (key, values) in options {
            let values = values
                .into_iter()
                .map(|value| resolve_secret(value, keystore))
                .collect::<Result<Vec<_>, _>>()?;
            config.set_option(key, values);
        }
        config.set_command_line(args.to_vec());
        tracing::debug!(config = %config.name(), "Built configuration");
        Ok(config)
    }
}
