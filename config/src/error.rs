use std::io;
use std::path::PathBuf;

use harness_types::CommandStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration dump finished with status {status}: {stderr}")]
    Dump {
        status: CommandStatus,
        stderr: String,
    },
    #[error("sandbox environment unavailable: {0}")]
    Sandbox(String),
    #[error("{0}")]
    Factory(String),
    #[error("failed to read configuration {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse configuration {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("keystore could not resolve '{key}'")]
    KeyStore { key: String },
    #[error("configuration IO failed: {0}")]
    Io(#[from] io::Error),
}
