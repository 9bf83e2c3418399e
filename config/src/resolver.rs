//! Configuration resolution for sandboxed invocations.

use std::sync::Arc;

use harness_runner::{GLOBAL_CONFIG_VARIABLE, ProcessRunner};

use crate::configuration::Configuration;
use crate::error::ConfigError;
use crate::factory::{ConfigurationFactory, KeyStoreClient};
use crate::sandbox::{ConfigDumper, DumpKind, Sandbox};

/// Resolves the configuration a sandboxed invocation will run.
///
/// The parent and the sandbox may run different versions, so the configuration is
/// rebuilt from a non-versioned dump produced inside the sandbox environment rather
/// than parsed locally.
pub struct SandboxConfigurationResolver {
    factory: Arc<dyn ConfigurationFactory>,
    dumper: Arc<dyn ConfigDumper>,
}

impl SandboxConfigurationResolver {
    #[must_use]
    pub fn new(factory: Arc<dyn ConfigurationFactory>, dumper: Arc<dyn ConfigDumper>) -> Self {
        Self { factory, dumper }
    }

    /// Resolve `args` inside `sandbox`.
    ///
    /// The returned configuration reports `args` as its command line and carries the
    /// sandbox. On failure the sandbox is torn down before the error is returned.
    /// The dump file is deleted on every path.
    ///
    /// `keystore` is not consulted while rebuilding from the dump: secrets are
    /// resolved by the sandboxed child during its full run.
    pub async fn resolve(
        &self,
        args: &[String],
        keystore: Option<&dyn KeyStoreClient>,
        sandbox: Arc<dyn Sandbox>,
        runner: &dyn ProcessRunner,
    ) -> Result<Configuration, ConfigError> {
        tracing::trace!(
            keystore = keystore.is_some_and(|keystore| keystore.is_available()),
            "Resolving sandboxed configuration"
        );
        match self.build(args, sandbox.as_ref(), runner).await {
            Ok(mut config) => {
                config.set_command_line(args.to_vec());
                config.set_sandbox(sandbox);
                Ok(config)
            }
            Err(e) => {
                tracing::error!("Sandbox configuration resolution failed: {e}");
                sandbox.tear_down();
                Err(e)
            }
        }
    }

    async fn build(
        &self,
        args: &[String],
        sandbox: &dyn Sandbox,
        runner: &dyn ProcessRunner,
    ) -> Result<Configuration, ConfigError> {
        runner.unset_env_variable(GLOBAL_CONFIG_VARIABLE);
        let env_root = sandbox.environment_root(args).await?;
        let dump = self
            .dumper
            .dump(&env_root, runner, args, DumpKind::NonVersioned)
            .await?;

        let dump_args = [dump.display().to_string()];
        let config = self.factory.create_configuration_from_args(&dump_args, None);
        if let Err(e) = dump.close() {
            tracing::warn!("Failed to delete configuration dump: {e}");
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use harness_runner::{CommandOutput, RunFut};
    use harness_types::{CommandResult, CommandStatus};

    use super::*;
    use crate::factory::TomlConfigurationFactory;
    use crate::sandbox::{ConfigFut, SubprocessConfigDumper};

    #[derive(Debug, Default)]
    struct FakeSandbox {
        root: PathBuf,
        fail_root: bool,
        teardowns: AtomicUsize,
    }

    impl Sandbox for FakeSandbox {
        fn environment_root<'a>(&'a self, _args: &'a [String]) -> ConfigFut<'a, PathBuf> {
            Box::pin(async move {
                if self.fail_root {
                    Err(ConfigError::Sandbox("no build".to_string()))
                } else {
                    Ok(self.root.clone())
                }
            })
        }

        fn tear_down(&self) {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Writes `dump` into the output slot of a dump command line.
    struct DumpRunner {
        status: CommandStatus,
        dump: &'static str,
        unset: Mutex<Vec<String>>,
        output_path: Mutex<Option<PathBuf>>,
    }

    impl DumpRunner {
        fn new(status: CommandStatus, dump: &'static str) -> Self {
            Self {
                status,
                dump,
                unset: Mutex::new(Vec::new()),
                output_path: Mutex::new(None),
            }
        }

        fn dump_path(&self) -> PathBuf {
            self.output_path.lock().unwrap().clone().unwrap()
        }
    }

    impl ProcessRunner for DumpRunner {
        fn unset_env_variable(&self, name: &str) {
            self.unset.lock().unwrap().push(name.to_string());
        }

        fn set_env_variable(&self, _name: &str, _value: &str) {}

        fn run_timed_cmd<'a>(
            &'a self,
            _timeout: Duration,
            _output: CommandOutput,
            argv: &'a [String],
        ) -> RunFut<'a> {
            Box::pin(async move {
                let path = PathBuf::from(&argv[5]);
                std::fs::write(&path, self.dump).unwrap();
                *self.output_path.lock().unwrap() = Some(path);
                CommandResult::new(self.status)
            })
        }
    }

    fn resolver() -> SandboxConfigurationResolver {
        SandboxConfigurationResolver::new(
            Arc::new(TomlConfigurationFactory::new()),
            Arc::new(SubprocessConfigDumper::new()),
        )
    }

    fn raw_args() -> Vec<String> {
        ["camera-suite", "--retries", "3"]
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    const DUMP: &str = "name = \"camera-suite\"\n[options]\nretries = \"3\"\n";

    #[tokio::test]
    async fn resolved_configuration_reports_original_args() {
        let sandbox = Arc::new(FakeSandbox {
            root: PathBuf::from("/sandbox"),
            ..FakeSandbox::default()
        });
        let runner = DumpRunner::new(CommandStatus::Success, DUMP);

        let config = resolver()
            .resolve(&raw_args(), None, sandbox.clone(), &runner)
            .await
            .unwrap();

        assert_eq!(config.name(), "camera-suite");
        assert_eq!(config.command_line(), raw_args().as_slice());
        assert_eq!(config.option_value("retries"), Some("3"));
        assert!(config.sandbox().is_some());
        assert_eq!(sandbox.teardowns.load(Ordering::SeqCst), 0);
        assert!(!runner.dump_path().exists());
        assert_eq!(*runner.unset.lock().unwrap(), vec![GLOBAL_CONFIG_VARIABLE]);
    }

    #[tokio::test]
    async fn failed_dump_tears_down_once() {
        let sandbox = Arc::new(FakeSandbox::default());
        let runner = DumpRunner::new(CommandStatus::Failed, "");

        let err = resolver()
            .resolve(&raw_args(), None, sandbox.clone(), &runner)
            .await
            .unwrap_err();

        assert!(matches!(err, ConfigError::Dump { status: CommandStatus::Failed, .. }));
        assert_eq!(sandbox.teardowns.load(Ordering::SeqCst), 1);
        assert!(!runner.dump_path().exists());
    }

    #[tokio::test]
    async fn unparseable_dump_is_cleaned_up() {
        let sandbox = Arc::new(FakeSandbox::default());
        let runner = DumpRunner::new(CommandStatus::Success, "name = [");

        let err = resolver()
            .resolve(&raw_args(), None, sandbox.clone(), &runner)
            .await
            .unwrap_err();

        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(sandbox.teardowns.load(Ordering::SeqCst), 1);
        assert!(!runner.dump_path().exists());
    }

    #[tokio::test]
    async fn sandbox_root_failure_tears_down() {
        let sandbox = Arc::new(FakeSandbox {
            fail_root: true,
            ..FakeSandbox::default()
        });
        let runner = DumpRunner::new(CommandStatus::Success, DUMP);

        let err = resolver()
            .resolve(&raw_args(), None, sandbox.clone(), &runner)
            .await
            .unwrap_err();

        assert!(matches!(err, ConfigError::Sandbox(_)));
        assert_eq!(sandbox.teardowns.load(Ordering::SeqCst), 1);
        assert!(runner.output_path.lock().unwrap().is_none());
    }
}
