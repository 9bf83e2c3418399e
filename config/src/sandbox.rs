//! Sandbox environment and version-neutral configuration dump capabilities.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use harness_runner::{CommandOutput, ProcessRunner};
use tempfile::TempPath;

use crate::error::ConfigError;

pub type ConfigFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, ConfigError>> + Send + 'a>>;

pub const DEFAULT_DUMP_ENTRY_POINT: &str = "com.android.tradefed.sandbox.SandboxConfigDump";
const DEFAULT_DUMP_INTERPRETER: &str = "java";
const DEFAULT_DUMP_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// An isolated environment a configuration is run in.
pub trait Sandbox: Send + Sync + fmt::Debug {
    /// Root directory of the environment that will run `args`. May do setup work.
    fn environment_root<'a>(&'a self, args: &'a [String]) -> ConfigFut<'a, PathBuf>;

    /// Release everything the environment allocated.
    fn tear_down(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpKind {
    /// Everything, including version-specific defaults.
    Full,
    /// Structure only, with version-specific defaulting stripped.
    NonVersioned,
}

impl DumpKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "FULL_XML",
            Self::NonVersioned => "NON_VERSIONED_CONFIG",
        }
    }
}

impl fmt::Display for DumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Renders a configuration inside a sandbox environment into a file.
///
/// The returned [`TempPath`] deletes the dump when dropped.
pub trait ConfigDumper: Send + Sync {
    fn dump<'a>(
        &'a self,
        env_root: &'a Path,
        runner: &'a dyn ProcessRunner,
        args: &'a [String],
        kind: DumpKind,
    ) -> ConfigFut<'a, TempPath>;
}

/// Dumps by running the environment's own dump entry point out of process:
/// `<interpreter> -cp <env_root>/* <entry_point> <KIND> <output_file> <args...>`.
#[derive(Debug, Clone)]
pub struct SubprocessConfigDumper {
    interpreter: String,
    entry_point: String,
    timeout: Duration,
}

impl Default for SubprocessConfigDumper {
    fn default() -> Self {
        Self {
            interpreter: DEFAULT_DUMP_INTERPRETER.to_string(),
            entry_point: DEFAULT_DUMP_ENTRY_POINT.to_string(),
            timeout: DEFAULT_DUMP_TIMEOUT,
        }
    }
}

impl SubprocessConfigDumper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    #[must_use]
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command_line(
        &self,
        env_root: &Path,
        kind: DumpKind,
        output: &Path,
        args: &[String],
    ) -> Vec<String> {
        let mut argv = vec![
            self.interpreter.clone(),
            "-cp".to_string(),
            format!("{}/*", env_root.display()),
            self.entry_point.clone(),
            kind.as_str().to_string(),
            output.display().to_string(),
        ];
        argv.extend(args.iter().cloned());
        argv
    }

    async fn run_dump(
        &self,
        env_root: &Path,
        runner: &dyn ProcessRunner,
        args: &[String],
        kind: DumpKind,
    ) -> Result<TempPath, ConfigError> {
        let output = tempfile::Builder::new()
            .prefix("sandbox_config_")
            .suffix(".toml")
            .tempfile()?
            .into_temp_path();
        let argv = self.command_line(env_root, kind, &output, args);
        tracing::debug!(kind = %kind, root = %env_root.display(), "Dumping configuration");

        let result = runner
            .run_timed_cmd(self.timeout, CommandOutput::Capture, &argv)
            .await;
        if result.status.is_success() {
            return Ok(output);
        }

        if let Err(e) = output.close() {
            tracing::warn!("Failed to delete failed configuration dump: {e}");
        }
        Err(ConfigError::Dump {
            status: result.status,
            stderr: result.stderr,
        })
    }
}

impl ConfigDumper for SubprocessConfigDumper {
    fn dump<'a>(
        &'a self,
        env_root: &'a Path,
        runner: &'a dyn ProcessRunner,
        args: &'a [String],
        kind: DumpKind,
    ) -> ConfigFut<'a, TempPath> {
        Box::pin(self.run_dump(env_root, runner, args, kind))
    }
}
