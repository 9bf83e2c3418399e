use std::sync::Arc;

use harness_core::{InvocationContext, InvocationListener};
use harness_runner::{CommandOutput, GLOBAL_CONFIG_VARIABLE, ProcessRunner};
use harness_types::{BuildInfo, CommandStatus};

use crate::args::{SUBPROCESS_REPORT_FILE_FLAG, build_child_args};
use crate::artifacts::{CaptureArtifacts, read_capture};
use crate::error::LaunchError;
use crate::options::LauncherOptions;

/// Runs a configuration in a child harness process and relays its results.
pub struct SubprocessTestLauncher {
    options: LauncherOptions,
    runner: Arc<dyn ProcessRunner>,
    build: Option<BuildInfo>,
    context: Option<Arc<InvocationContext>>,
}

impl SubprocessTestLauncher {
    #[must_use]
    pub fn new(options: LauncherOptions, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            options,
            runner,
            build: None,
            context: None,
        }
    }

    pub fn set_build(&mut self, build: BuildInfo) {
        self.build = Some(build);
    }

    /// Invocation attributes reported by the child are merged into `context`.
    pub fn set_invocation_context(&mut self, context: Arc<InvocationContext>) {
        self.context = Some(context);
    }

    #[must_use]
    pub fn options(&self) -> &LauncherOptions {
        &self.options
    }

    /// Run the child to completion and forward its artifacts to `listener`.
    ///
    /// Any status other than success fails the invocation, after the captured
    /// output and the replayed events have been forwarded.
    pub async fn run(&self, listener: &dyn InvocationListener) -> Result<(), LaunchError> {
        let build = self.build.as_ref().ok_or(LaunchError::MissingBuildInfo)?;
        let config_name = self
            .options
            .config_name
            .as_deref()
            .ok_or(LaunchError::MissingConfigName)?;
        let args = build_child_args(&self.options, build, config_name)?;

        self.runner.unset_env_variable(GLOBAL_CONFIG_VARIABLE);

        let mut artifacts = CaptureArtifacts::default();
        let outcome = self.execute(&mut artifacts, args, build, config_name).await;
        let summary = artifacts.forward_and_clean(listener, self.context.as_deref());
        if let Some(summary) = summary {
            tracing::debug!(
                replayed = summary.replayed,
                skipped = summary.skipped,
                "Forwarded subprocess events"
            );
        }
        outcome
    }

    async fn execute(
        &self,
        artifacts: &mut CaptureArtifacts,
        mut args: Vec<String>,
        build: &BuildInfo,
        config_name: &str,
    ) -> Result<(), LaunchError> {
        let sinks = artifacts.create()?;
        args.push(SUBPROCESS_REPORT_FILE_FLAG.to_string());
        args.push(sinks.events.display().to_string());

        let output = CommandOutput::Redirect {
            stdout: sinks.stdout,
            stderr: sinks.stderr,
        };
        let result = self
            .runner
            .run_timed_cmd(self.options.max_run_time(), output, &args)
            .await;

        if result.status == CommandStatus::Success {
            tracing::debug!(build_id = %build.build_id, "Subprocess tests completed");
            return Ok(());
        }

        tracing::warn!(
            build_id = %build.build_id,
            status = %result.status,
            "Subprocess tests did not complete"
        );
        tracing::trace!(
            "Subprocess output:\nstdout:\n{}\nstderr:\n{}{}",
            read_capture(artifacts.stdout_path()),
            read_capture(artifacts.stderr_path()),
            result.stderr,
        );
        Err(LaunchError::SubprocessFailed {
            config: config_name.to_string(),
            status: result.status,
        })
    }
}
