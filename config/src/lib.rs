//! Configuration layer.
//!
//! - [`Configuration`] and the [`ConfigurationFactory`] that builds one from a command line
//! - [`SandboxConfigurationResolver`], which resolves a configuration for a sandboxed run
//!   from a version-neutral dump produced inside the sandbox
//! - [`HarnessConfig`], the user settings file (`~/.harness/config.toml`)

mod configuration;
mod error;
mod factory;
mod resolver;
mod sandbox;
pub mod settings;

pub use configuration::{Configuration, SANDBOX_TYPE_NAME};
pub use error::ConfigError;
pub use factory::{ConfigurationFactory, KEYSTORE_PREFIX, KeyStoreClient, TomlConfigurationFactory};
pub use resolver::SandboxConfigurationResolver;
pub use sandbox::{
    ConfigDumper, ConfigFut, DEFAULT_DUMP_ENTRY_POINT, DumpKind, Sandbox, SubprocessConfigDumper,
};
pub use settings::{HarnessConfig, LauncherSettings, SandboxSettings, SettingsError};
