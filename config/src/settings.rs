//! User settings file (`~/.harness/config.toml`).
//!
//! Every value is optional; callers layer command-line flags over these and fall
//! back to their own defaults. String values support `${VAR}` expansion.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;
use thiserror::Error;

use crate::sandbox::SubprocessConfigDumper;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse settings {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl SettingsError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } => Some(path),
            Self::Invalid { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(default)]
    pub launcher: LauncherSettings,
    #[serde(default)]
    pub sandbox: SandboxSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LauncherSettings {
    pub max_run_time_minutes: Option<u64>,
    pub remote_debug: Option<bool>,
    pub interpreter: Option<String>,
    pub entry_point: Option<String>,
    pub use_virtual_device: Option<bool>,
    pub sub_branch: Option<String>,
    pub sub_build_flavor: Option<String>,
    pub sub_build_id: Option<String>,
    #[serde(default)]
    pub sub_apk_paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxSettings {
    pub interpreter: Option<String>,
    pub dump_entry_point: Option<String>,
    pub dump_timeout_minutes: Option<u64>,
}

impl SandboxSettings {
    /// A dumper with these settings applied over its defaults.
    #[must_use]
    pub fn dumper(&self) -> SubprocessConfigDumper {
        let mut dumper = SubprocessConfigDumper::new();
        if let Some(interpreter) = &self.interpreter {
            dumper = dumper.with_interpreter(interpreter.clone());
        }
        if let Some(entry_point) = &self.dump_entry_point {
            dumper = dumper.with_entry_point(entry_point.clone());
        }
        if let Some(minutes) = self.dump_timeout_minutes {
            dumper = dumper.with_timeout(Duration::from_secs(minutes.saturating_mul(60)));
        }
        dumper
    }
}

/// Expand `${VAR}` references. Unset variables expand to nothing; an unclosed
/// `${` is kept as written.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

fn expand_opt(value: &mut Option<String>) {
    if let Some(value) = value {
        *value = expand_env_vars(value);
    }
}

impl HarnessConfig {
    /// Load from the default location. A missing file yields the defaults.
    pub fn load() -> Result<Self, SettingsError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(source) => {
                tracing::warn!("Failed to read settings at {}: {source}", path.display());
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let mut config: Self = match toml::from_str(&content) {
            Ok(config) => config,
            Err(source) => {
                tracing::warn!("Failed to parse settings at {}: {source}", path.display());
                return Err(SettingsError::Parse {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        config.expand();
        config.validate()?;
        Ok(config)
    }

    fn expand(&mut self) {
        let launcher = &mut self.launcher;
        expand_opt(&mut launcher.interpreter);
        expand_opt(&mut launcher.entry_point);
        expand_opt(&mut launcher.sub_branch);
        expand_opt(&mut launcher.sub_build_flavor);
        expand_opt(&mut launcher.sub_build_id);
        for path in &mut launcher.sub_apk_paths {
            *path = expand_env_vars(path);
        }
        expand_opt(&mut self.sandbox.interpreter);
        expand_opt(&mut self.sandbox.dump_entry_point);
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.launcher.max_run_time_minutes == Some(0) {
            return Err(SettingsError::Invalid {
                key: "launcher.max_run_time_minutes",
                reason: "must be positive".to_string(),
            });
        }
        if self.sandbox.dump_timeout_minutes == Some(0) {
            return Err(SettingsError::Invalid {
                key: "sandbox.dump_timeout_minutes",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".harness").join("config.toml"))
}
