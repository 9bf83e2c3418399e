use std::collections::BTreeMap;
use std::fs::File;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use harness_types::{CommandResult, CommandStatus};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::process::{ChildGuard, set_new_session, try_kill_process_group};

/// Environment variable through which a parent advertises its global configuration.
/// A child invocation must never inherit it.
pub const GLOBAL_CONFIG_VARIABLE: &str = "TF_GLOBAL_CONFIG";

/// Time allowed past the deadline for already-written output to drain.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Where a command's stdout and stderr go.
#[derive(Debug)]
pub enum CommandOutput {
    /// Collect both streams into the returned [`CommandResult`].
    Capture,
    /// Stream both directly into the given files.
    Redirect { stdout: File, stderr: File },
}

pub type RunFut<'a> = Pin<Box<dyn Future<Output = CommandResult> + Send + 'a>>;

/// Runs external commands with a wall-clock limit.
pub trait ProcessRunner: Send + Sync {
    /// Remove `name` from the environment of every command this runner spawns.
    fn unset_env_variable(&self, name: &str);

    /// Set `name` in the environment of every command this runner spawns.
    fn set_env_variable(&self, name: &str, value: &str);

    /// Run `argv` to completion or until `timeout` elapses.
    ///
    /// Never fails: spawn and wait errors are reported as [`CommandStatus::Exception`].
    fn run_timed_cmd<'a>(
        &'a self,
        timeout: Duration,
        output: CommandOutput,
        argv: &'a [String],
    ) -> RunFut<'a>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EnvOverride {
    Set(String),
    Unset,
}

/// Tokio-backed [`ProcessRunner`].
#[derive(Debug, Default)]
pub struct RunUtil {
    working_dir: Option<PathBuf>,
    env: Mutex<BTreeMap<String, EnvOverride>>,
}

impl RunUtil {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn apply_env(&self, command: &mut Command) {
        let env = self.env.lock().unwrap_or_else(PoisonError::into_inner);
        for (name, value) in env.iter() {
            match value {
                EnvOverride::Set(value) => {
                    command.env(name, value);
                }
                EnvOverride::Unset => {
                    command.env_remove(name);
                }
            }
        }
    }

    async fn run(&self, timeout: Duration, output: CommandOutput, argv: &[String]) -> CommandResult {
        let Some((program, args)) = argv.split_first() else {
            return CommandResult::exception("empty command line");
        };

        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        self.apply_env(&mut command);

        let capture = match output {
            CommandOutput::Capture => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
                true
            }
            CommandOutput::Redirect { stdout, stderr } => {
                command
                    .stdout(Stdio::from(stdout))
                    .stderr(Stdio::from(stderr));
                false
            }
        };
        set_new_session(&mut command);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(program = %program, "Failed to spawn command: {e}");
                return CommandResult::exception(format!("failed to spawn {program}: {e}"));
            }
        };
        let deadline = Instant::now() + timeout;
        let mut guard = ChildGuard::new(child);
        let pid = guard.child_mut().id();
        tracing::trace!(pid = ?pid, argv = ?argv, "Spawned command");

        let readers = capture.then(|| {
            let child = guard.child_mut();
            (
                OutputReader::spawn(child.stdout.take()),
                OutputReader::spawn(child.stderr.take()),
            )
        });

        let mut result = match tokio::time::timeout_at(deadline, guard.child_mut().wait()).await {
            Ok(Ok(status)) => {
                guard.disarm();
                let status_kind = if status.success() {
                    CommandStatus::Success
                } else {
                    CommandStatus::Failed
                };
                let mut result = CommandResult::new(status_kind);
                result.exit_code = status.code();
                result
            }
            Ok(Err(e)) => {
                tracing::warn!(program = %program, "Failed to wait for command: {e}");
                guard.terminate().await;
                CommandResult::exception(format!("failed to wait for {program}: {e}"))
            }
            Err(_) => {
                tracing::warn!(
                    program = %program,
                    timeout_ms = timeout.as_millis(),
                    "Command timed out, killing process group"
                );
                guard.terminate().await;
                CommandResult::new(CommandStatus::TimedOut)
            }
        };

        if let Some((stdout, stderr)) = readers {
            result.stdout = stdout.finish(deadline, pid).await;
            let captured_err = stderr.finish(deadline, pid).await;
            if result.stderr.is_empty() {
                result.stderr = captured_err;
            } else if !captured_err.is_empty() {
                result.stderr = format!("{captured_err}\n{}", result.stderr);
            }
        }
        result
    }
}

/// Drains one output pipe in the background.
///
/// The pipe stays open for as long as any descendant holds it, so collection is
/// bounded by the run deadline; whatever arrived before then is kept.
struct OutputReader {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl OutputReader {
    fn spawn<R>(stream: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let handle = tokio::spawn(async move {
            let Some(mut stream) = stream else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        tracing::debug!("Output stream read failed: {e}");
                        break;
                    }
                }
            }
        });
        Self { buf, handle }
    }

    async fn finish(mut self, deadline: Instant, pid: Option<u32>) -> String {
        let limit = deadline.max(Instant::now() + OUTPUT_DRAIN_GRACE);
        if tokio::time::timeout_at(limit, &mut self.handle).await.is_err() {
            tracing::warn!(pid = ?pid, "Output still open at deadline, killing process group");
            if let Some(pid) = pid
                && let Err(e) = try_kill_process_group(pid)
            {
                tracing::debug!(pid, "Process group kill failed: {e}");
            }
            self.handle.abort();
        }
        let bytes = std::mem::take(&mut *self.buf.lock().unwrap_or_else(PoisonError::into_inner));
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl ProcessRunner for RunUtil {
    fn unset_env_variable(&self, name: &str) {
        self.env
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), EnvOverride::Unset);
    }

    fn set_env_variable(&self, name: &str, value: &str) {
        self.env
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), EnvOverride::Set(value.to_string()));
    }

    fn run_timed_cmd<'a>(
        &'a self,
        timeout: Duration,
        output: CommandOutput,
        argv: &'a [String],
    ) -> RunFut<'a> {
        Box::pin(self.run(timeout, output, argv))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;

    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn captures_output_on_success() {
        let runner = RunUtil::new();
        let argv = sh("echo out; echo err >&2");
        let result = runner
            .run_timed_cmd(Duration::from_secs(10), CommandOutput::Capture, &argv)
            .await;

        assert_eq!(result.status, CommandStatus::Success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_failed() {
        let runner = RunUtil::new();
        let argv = sh("exit 3");
        let result = runner
            .run_timed_cmd(Duration::from_secs(10), CommandOutput::Capture, &argv)
            .await;
        assert_eq!(result.status, CommandStatus::Failed);
        assert_eq!(result.exit_code, Some(3));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let runner = RunUtil::new();
        let argv = sh("echo started; sleep 30");
        let result = runner
            .run_timed_cmd(Duration::from_millis(200), CommandOutput::Capture, &argv)
            .await;
        assert_eq!(result.status, CommandStatus::TimedOut);
        assert_eq!(result.exit_code, None);
    }

    #[tokio::test]
    async fn lingering_descendant_does_not_extend_the_budget() {
        let runner = RunUtil::new();
        let argv = sh("sleep 6 & echo hi");
        let started = std::time::Instant::now();
        let result = runner
            .run_timed_cmd(Duration::from_millis(500), CommandOutput::Capture, &argv)
            .await;

        assert!(
            started.elapsed() < Duration::from_secs(3),
            "run took {:?}",
            started.elapsed()
        );
        assert_eq!(result.status, CommandStatus::Success);
        assert_eq!(result.stdout, "hi\n");
    }

    #[tokio::test]
    async fn missing_program_is_exception() {
        let runner = RunUtil::new();
        let argv = vec!["/nonexistent/harness-test-binary".to_string()];
        let result = runner
            .run_timed_cmd(Duration::from_secs(1), CommandOutput::Capture, &argv)
            .await;
        assert_eq!(result.status, CommandStatus::Exception);
        assert!(result.stderr.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn empty_argv_is_exception() {
        let result = RunUtil::new()
            .run_timed_cmd(Duration::from_secs(1), CommandOutput::Capture, &[])
            .await;
        assert_eq!(result.status, CommandStatus::Exception);
    }

    #[tokio::test]
    async fn redirect_streams_into_files() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.log");
        let err_path = dir.path().join("err.log");
        let output = CommandOutput::Redirect {
            stdout: File::create(&out_path).unwrap(),
            stderr: File::create(&err_path).unwrap(),
        };

        let runner = RunUtil::new();
        let argv = sh("echo to-file; echo oops >&2; exit 1");
        let result = runner
            .run_timed_cmd(Duration::from_secs(10), output, &argv)
            .await;

        assert_eq!(result.status, CommandStatus::Failed);
        assert!(result.stdout.is_empty());
        assert_eq!(fs::read_to_string(&out_path).unwrap(), "to-file\n");
        assert_eq!(fs::read_to_string(&err_path).unwrap(), "oops\n");
    }

    #[tokio::test]
    async fn env_overrides_apply_to_children_only() {
        let runner = RunUtil::new();
        runner.set_env_variable("HARNESS_RUNNER_TEST", "set");
        runner.unset_env_variable("HOME");
        let argv = sh("echo \"$HARNESS_RUNNER_TEST:${HOME:-unset}\"");
        let result = runner
            .run_timed_cmd(Duration::from_secs(10), CommandOutput::Capture, &argv)
            .await;

        assert_eq!(result.stdout, "set:unset\n");
        assert!(std::env::var_os("HARNESS_RUNNER_TEST").is_none());
    }

    #[tokio::test]
    async fn working_dir_is_honoured() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("marker"), "here").unwrap();
        let runner = RunUtil::new().with_working_dir(dir.path());
        let argv = sh("cat marker");
        let result = runner
            .run_timed_cmd(Duration::from_secs(10), CommandOutput::Capture, &argv)
            .await;
        assert_eq!(result.stdout, "here");
    }
}
